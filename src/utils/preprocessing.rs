//! Image preprocessing for segmentation inference
//!
//! The model sees a square letterboxed copy of the image: scaled to fit the
//! model input, centered on white padding and normalized into an NCHW
//! tensor.

use crate::{
    error::{ProcessingError, Result},
    models::PreprocessingConfig,
};
use image::{imageops, DynamicImage, ImageBuffer, RgbImage};
use ndarray::Array4;

/// Padding color used around the letterboxed image
pub const PADDING_COLOR: [u8; 3] = [255, 255, 255];

/// Placement of the scaled image inside the square model input
///
/// Shared by preprocessing and mask extraction so the inverse mapping uses
/// exactly the forward parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    /// Compute the letterbox of a `width x height` image in a square input
    #[must_use]
    pub fn compute(width: u32, height: u32, target_size: u32) -> Self {
        let target = target_size as f32;
        let scale = (target / width.max(1) as f32).min(target / height.max(1) as f32);

        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, target_size);

        Self {
            scale,
            scaled_width,
            scaled_height,
            offset_x: (target_size - scaled_width) / 2,
            offset_y: (target_size - scaled_height) / 2,
        }
    }
}

pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess image for model inference
    ///
    /// # Errors
    /// Returns `ProcessingError::Segmentation` for an empty image or invalid
    /// preprocessing parameters.
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        preprocessing_config
            .validate()
            .map_err(|e| ProcessingError::segmentation(e.to_string()))?;

        let rgb_image = image.to_rgb8();
        let (orig_width, orig_height) = rgb_image.dimensions();
        if orig_width == 0 || orig_height == 0 {
            return Err(ProcessingError::segmentation("Cannot segment an empty image"));
        }

        let target_size = preprocessing_config.target_size;
        let letterbox = Letterbox::compute(orig_width, orig_height, target_size);

        let resized = imageops::resize(
            &rgb_image,
            letterbox.scaled_width,
            letterbox.scaled_height,
            imageops::FilterType::Triangle,
        );

        let mut canvas: RgbImage =
            ImageBuffer::from_pixel(target_size, target_size, image::Rgb(PADDING_COLOR));
        imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset_x),
            i64::from(letterbox.offset_y),
        );

        Ok(Self::canvas_to_tensor(&canvas, preprocessing_config))
    }

    /// Convert canvas to normalized NCHW tensor
    fn canvas_to_tensor(canvas: &RgbImage, preprocessing_config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        for (x, y, pixel) in canvas.enumerate_pixels() {
            for (channel, ((value, mean), std)) in
                pixel.0.iter().zip(mean.iter()).zip(std.iter()).enumerate()
            {
                if let Some(slot) = tensor.get_mut([0, channel, y as usize, x as usize]) {
                    *slot = (f32::from(*value) / 255.0 - mean) / std;
                }
            }
        }

        tensor
    }
}
