//! Aspect-preserving resize onto a fixed transparent canvas

use crate::{
    config::ResizeMode,
    error::{ProcessingError, Result},
};
use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, RgbaImage};

/// Resize transform producing an exact `width x height` RGBA canvas
pub struct ResizeTransform;

impl ResizeTransform {
    /// Place `image` on a transparent `width x height` canvas
    ///
    /// * `ResizeMode::Fit` scales the source to fit entirely inside the
    ///   canvas and centers it; uncovered pixels stay transparent.
    /// * `ResizeMode::Fill` scales the source to cover the canvas along its
    ///   constraining axis and center-crops the overflow.
    ///
    /// # Errors
    /// Returns `ProcessingError::InvalidDimensions` if either target or
    /// source dimension is zero.
    pub fn resize(
        image: &DynamicImage,
        width: u32,
        height: u32,
        mode: ResizeMode,
    ) -> Result<RgbaImage> {
        if width == 0 || height == 0 {
            return Err(ProcessingError::invalid_dimensions(format!(
                "target {width}x{height} must be positive"
            )));
        }
        let (src_width, src_height) = image.dimensions();
        if src_width == 0 || src_height == 0 {
            return Err(ProcessingError::invalid_dimensions(format!(
                "source {src_width}x{src_height} is empty"
            )));
        }

        let content = match mode {
            ResizeMode::Fit => {
                let (scaled_width, scaled_height) =
                    Self::fit_dimensions((src_width, src_height), (width, height));
                image
                    .resize_exact(scaled_width, scaled_height, FilterType::Lanczos3)
                    .to_rgba8()
            },
            ResizeMode::Fill => {
                // Crop in source coordinates first so no intermediate buffer
                // is ever larger than the source or the canvas
                let (left, top, crop_width, crop_height) =
                    Self::fill_crop((src_width, src_height), (width, height));
                image
                    .crop_imm(left, top, crop_width, crop_height)
                    .resize_exact(width, height, FilterType::Lanczos3)
                    .to_rgba8()
            },
        };

        let mut canvas = RgbaImage::new(width, height);
        let offset_x = (width - content.width()) / 2;
        let offset_y = (height - content.height()) / 2;
        imageops::replace(
            &mut canvas,
            &content,
            i64::from(offset_x),
            i64::from(offset_y),
        );

        Ok(canvas)
    }

    /// Largest size with the source aspect ratio that fits inside the target
    #[must_use]
    pub fn fit_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
        let (src_width, src_height) = (f64::from(source.0), f64::from(source.1));
        let (width, height) = target;
        let scale = (f64::from(width) / src_width).min(f64::from(height) / src_height);

        let scaled_width = ((src_width * scale).round() as u32).clamp(1, width);
        let scaled_height = ((src_height * scale).round() as u32).clamp(1, height);
        (scaled_width, scaled_height)
    }

    /// Centered source rectangle `(left, top, width, height)` with the
    /// target aspect ratio
    ///
    /// Scaling this rectangle to the target covers the canvas exactly.
    #[must_use]
    pub fn fill_crop(source: (u32, u32), target: (u32, u32)) -> (u32, u32, u32, u32) {
        let (src_width, src_height) = source;
        let (width, height) = target;
        let source_ratio = f64::from(src_width) / f64::from(src_height);
        let target_ratio = f64::from(width) / f64::from(height);

        let (crop_width, crop_height) = if source_ratio > target_ratio {
            // Wider than the box: keep the full height, trim the sides
            let crop_width = (f64::from(src_height) * target_ratio).round() as u32;
            (crop_width.clamp(1, src_width), src_height)
        } else {
            let crop_height = (f64::from(src_width) / target_ratio).round() as u32;
            (src_width, crop_height.clamp(1, src_height))
        };

        (
            (src_width - crop_width) / 2,
            (src_height - crop_height) / 2,
            crop_width,
            crop_height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn opaque(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([40, 90, 200])))
    }

    /// Bounding box (width, height) of the non-transparent pixels
    fn content_box(canvas: &RgbaImage) -> (u32, u32) {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        for (x, y, pixel) in canvas.enumerate_pixels() {
            if pixel[3] > 0 {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
        (max_x - min_x + 1, max_y - min_y + 1)
    }

    #[test]
    fn test_canvas_size_is_exact_for_both_modes() {
        let sources = [(100, 50), (50, 100), (333, 333), (1, 900), (640, 479)];
        let targets = [(400, 400), (120, 80), (7, 300), (1, 1)];

        for mode in [ResizeMode::Fit, ResizeMode::Fill] {
            for (sw, sh) in sources {
                for (tw, th) in targets {
                    let canvas = ResizeTransform::resize(&opaque(sw, sh), tw, th, mode).unwrap();
                    assert_eq!(canvas.dimensions(), (tw, th), "{mode} {sw}x{sh} -> {tw}x{th}");
                }
            }
        }
    }

    #[test]
    fn test_fit_preserves_aspect_ratio() {
        let canvas =
            ResizeTransform::resize(&opaque(200, 100), 300, 300, ResizeMode::Fit).unwrap();
        let (content_width, content_height) = content_box(&canvas);
        assert_eq!(content_width, 300);
        assert!((i64::from(content_height) - 150).abs() <= 1);
    }

    #[test]
    fn test_fit_pads_with_transparency() {
        let canvas = ResizeTransform::resize(&opaque(100, 50), 100, 100, ResizeMode::Fit).unwrap();
        assert_eq!(canvas.get_pixel(50, 0)[3], 0);
        assert_eq!(canvas.get_pixel(50, 99)[3], 0);
        assert_eq!(canvas.get_pixel(50, 50)[3], 255);
    }

    #[test]
    fn test_fill_covers_whole_canvas() {
        let canvas =
            ResizeTransform::resize(&opaque(300, 100), 100, 100, ResizeMode::Fill).unwrap();
        assert!(canvas.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn test_fill_keeps_center_of_source() {
        // Left third red, middle third green, right third blue
        let source = DynamicImage::ImageRgba8(ImageBuffer::from_fn(300, 100, |x, _| match x {
            0..=99 => Rgba([255, 0, 0, 255]),
            100..=199 => Rgba([0, 255, 0, 255]),
            _ => Rgba([0, 0, 255, 255]),
        }));
        let canvas = ResizeTransform::resize(&source, 100, 100, ResizeMode::Fill).unwrap();
        let center = canvas.get_pixel(50, 50);
        assert!(center[1] > 200 && center[0] < 50 && center[2] < 50);
    }

    #[test]
    fn test_fill_crop_is_centered() {
        assert_eq!(
            ResizeTransform::fill_crop((1920, 1080), (400, 400)),
            (420, 0, 1080, 1080)
        );
        assert_eq!(
            ResizeTransform::fill_crop((1080, 1920), (400, 400)),
            (0, 420, 1080, 1080)
        );
        assert_eq!(
            ResizeTransform::fill_crop((1000, 500), (200, 100)),
            (0, 0, 1000, 500)
        );
    }

    #[test]
    fn test_fill_crop_extreme_ratio_stays_within_source() {
        assert_eq!(
            ResizeTransform::fill_crop((1, 4000), (4000, 1)),
            (0, 1999, 1, 1)
        );
        assert_eq!(
            ResizeTransform::fill_crop((4000, 1), (1, 4000)),
            (1999, 0, 1, 1)
        );
    }

    #[test]
    fn test_fill_extreme_ratio_produces_exact_canvas() {
        let canvas =
            ResizeTransform::resize(&opaque(1, 4000), 4000, 1, ResizeMode::Fill).unwrap();
        assert_eq!(canvas.dimensions(), (4000, 1));
        assert!(canvas.pixels().all(|p| p[3] == 255));

        let canvas =
            ResizeTransform::resize(&opaque(4000, 1), 1, 4000, ResizeMode::Fill).unwrap();
        assert_eq!(canvas.dimensions(), (1, 4000));
    }

    #[test]
    fn test_fit_dimensions() {
        assert_eq!(
            ResizeTransform::fit_dimensions((1920, 1080), (400, 400)),
            (400, 225)
        );
        assert_eq!(ResizeTransform::fit_dimensions((1, 1000), (10, 10)), (1, 10));
    }

    #[test]
    fn test_zero_target_is_rejected() {
        let err = ResizeTransform::resize(&opaque(10, 10), 0, 10, ResizeMode::Fit).unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidDimensions(_)));
        let err = ResizeTransform::resize(&opaque(10, 10), 10, 0, ResizeMode::Fill).unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidDimensions(_)));
    }

    #[test]
    fn test_transparent_source_stays_transparent() {
        let source = DynamicImage::ImageRgba8(RgbaImage::new(40, 40));
        let canvas = ResizeTransform::resize(&source, 20, 20, ResizeMode::Fit).unwrap();
        assert!(canvas.pixels().all(|p| p[3] == 0));
    }
}
