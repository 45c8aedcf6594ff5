//! Background removal adapter
//!
//! `BackgroundRemover` is the seam the pipeline calls through. The model-backed
//! implementation letterboxes the image into the model input, runs inference,
//! maps the probability map back onto the original pixel grid and writes it
//! into the alpha channel.

use crate::{
    error::{ProcessingError, Result},
    inference::InferenceBackend,
    models::PreprocessingConfig,
    utils::{ImagePreprocessor, Letterbox},
};
use image::{DynamicImage, GenericImageView, RgbaImage};
use ndarray::Array4;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Capability that makes the background of an image transparent
///
/// Implementations are shared by every worker of a batch and may block for
/// a long time. They should give up with `ProcessingError::Cancelled` once
/// `cancel` fires, but callers never rely on it.
pub trait BackgroundRemover: Send + Sync {
    /// Return an RGBA image of the same size with background pixels transparent
    ///
    /// # Errors
    /// - `ProcessingError::Segmentation` on any internal fault
    /// - `ProcessingError::Cancelled` when the token fired before completion
    fn remove_background(
        &self,
        image: &DynamicImage,
        cancel: &CancellationToken,
    ) -> Result<RgbaImage>;

    /// Short name for logs and the health endpoint
    fn name(&self) -> &str;
}

/// Per-pixel foreground coverage, row-major, one byte per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    pub data: Vec<u8>,
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Coverage at `(x, y)`, zero outside the mask
    #[must_use]
    pub fn value_at(&self, x: u32, y: u32) -> u8 {
        let (width, height) = self.dimensions;
        if x >= width || y >= height {
            return 0;
        }
        let index = y as usize * width as usize + x as usize;
        self.data.get(index).copied().unwrap_or(0)
    }
}

/// Background remover driven by an ONNX segmentation model
///
/// The initialized backend is shared without a lock; concurrent workers run
/// inference in parallel.
pub struct ModelBackgroundRemover {
    backend: Box<dyn InferenceBackend>,
    preprocessing: PreprocessingConfig,
    name: &'static str,
}

impl ModelBackgroundRemover {
    /// Initialize the backend for shared use
    ///
    /// # Errors
    /// - Backend initialization failures (model load, optimization)
    pub fn new(mut backend: Box<dyn InferenceBackend>) -> Result<Self> {
        if let Some(load_time) = backend.initialize()? {
            log::info!(
                "{} backend ready in {}ms",
                backend.name(),
                load_time.as_millis()
            );
        }
        let preprocessing = backend.preprocessing_config().clone();
        let name = backend.name();

        Ok(Self {
            backend,
            preprocessing,
            name,
        })
    }

    fn check_cancelled(cancel: &CancellationToken, stage: &'static str) -> Result<()> {
        if cancel.is_cancelled() {
            Err(ProcessingError::Cancelled(stage))
        } else {
            Ok(())
        }
    }

    /// Map the model output back onto the original image grid
    ///
    /// # Errors
    /// Returns `ProcessingError::Segmentation` unless the tensor has shape
    /// `(1, 1, S, S)`.
    pub fn tensor_to_mask(
        tensor: &Array4<f32>,
        original_dimensions: (u32, u32),
    ) -> Result<SegmentationMask> {
        let (batch, channels, mask_height, mask_width) = tensor.dim();
        if batch != 1 || channels != 1 || mask_height != mask_width || mask_width == 0 {
            return Err(ProcessingError::segmentation(format!(
                "Invalid output tensor shape {:?}",
                tensor.shape()
            )));
        }

        let (orig_width, orig_height) = original_dimensions;
        let letterbox = Letterbox::compute(orig_width, orig_height, mask_width as u32);
        let mut mask_data = Vec::with_capacity(orig_width as usize * orig_height as usize);

        for y in 0..orig_height {
            let scaled_y = ((y as f32 * letterbox.scale).round() as u32)
                .min(letterbox.scaled_height - 1);
            let tensor_y = (scaled_y + letterbox.offset_y) as usize;

            for x in 0..orig_width {
                let scaled_x = ((x as f32 * letterbox.scale).round() as u32)
                    .min(letterbox.scaled_width - 1);
                let tensor_x = (scaled_x + letterbox.offset_x) as usize;

                let value = tensor.get([0, 0, tensor_y, tensor_x]).copied().unwrap_or(0.0);
                mask_data.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }

        Ok(SegmentationMask::new(mask_data, original_dimensions))
    }

    /// Write the mask into the alpha channel
    ///
    /// Existing transparency is kept: the resulting alpha is the product of
    /// source alpha and mask coverage. Fully transparent pixels are zeroed.
    #[must_use]
    pub fn apply_background_removal(image: &DynamicImage, mask: &SegmentationMask) -> RgbaImage {
        let mut result = image.to_rgba8();

        for (x, y, pixel) in result.enumerate_pixels_mut() {
            let coverage = u16::from(mask.value_at(x, y));
            let alpha = (u16::from(pixel[3]) * coverage / 255) as u8;

            *pixel = if alpha > 0 {
                image::Rgba([pixel[0], pixel[1], pixel[2], alpha])
            } else {
                image::Rgba([0, 0, 0, 0])
            };
        }

        result
    }
}

impl BackgroundRemover for ModelBackgroundRemover {
    #[instrument(skip_all, fields(backend = self.name, width = image.width(), height = image.height()))]
    fn remove_background(
        &self,
        image: &DynamicImage,
        cancel: &CancellationToken,
    ) -> Result<RgbaImage> {
        Self::check_cancelled(cancel, "segmentation")?;
        let input_tensor = ImagePreprocessor::preprocess_for_inference(image, &self.preprocessing)?;

        Self::check_cancelled(cancel, "segmentation")?;
        let output_tensor = self.backend.infer(&input_tensor)?;

        Self::check_cancelled(cancel, "segmentation")?;
        let mask = Self::tensor_to_mask(&output_tensor, image.dimensions())?;
        Ok(Self::apply_background_removal(image, &mask))
    }

    fn name(&self) -> &str {
        self.name
    }
}
