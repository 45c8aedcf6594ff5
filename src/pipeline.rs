//! Single-item processing pipeline
//!
//! Each item runs strictly through
//! `Validate -> Decode -> [RemoveBackground] -> [Resize] -> Encode`.
//! The first failing stage short-circuits into a stage-tagged
//! [`ItemFailure`]; nothing escapes [`ItemPipeline::process`] as an error.

use crate::{
    config::{ProcessingOptions, ProcessorConfig},
    error::{FailureKind, ProcessingError, Result},
    processor::BackgroundRemover,
    services::{FormatGate, ImageCodec, ResizeTransform},
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Payload of an input item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageData {
    /// Raw encoded image bytes
    Raw(Vec<u8>),
    /// Base64 text, optionally wrapped in a `data:` URI
    Encoded(String),
}

/// One named input image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageItem {
    pub filename: String,
    pub data: ImageData,
}

impl ImageItem {
    #[must_use]
    pub fn from_bytes<S: Into<String>>(filename: S, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            data: ImageData::Raw(bytes),
        }
    }

    #[must_use]
    pub fn from_base64<S: Into<String>, D: Into<String>>(filename: S, data: D) -> Self {
        Self {
            filename: filename.into(),
            data: ImageData::Encoded(data.into()),
        }
    }
}

/// Stage of the single-item state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Validate,
    Decode,
    RemoveBackground,
    Resize,
    Encode,
}

impl PipelineStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Decode => "decode",
            Self::RemoveBackground => "remove_background",
            Self::Resize => "resize",
            Self::Encode => "encode",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of the optional stages that actually ran for an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationsApplied {
    pub background_removed: bool,
    pub resized: bool,
    /// `"original"` or `"WxH"`
    pub dimensions: String,
    /// PNG optimization is always applied
    pub optimized: bool,
}

/// Successful pipeline outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSuccess {
    pub filename: String,
    /// Encoded PNG bytes
    pub png: Vec<u8>,
    pub operations: OperationsApplied,
    pub original_size: usize,
    pub final_size: usize,
    /// `(original - final) / original * 100`, 0 for an empty original
    pub compression_ratio: f64,
}

/// Failed pipeline outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub filename: String,
    /// Stage that failed; `None` when the coordinator gave up on the item
    pub stage: Option<PipelineStage>,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one item: exactly one variant per processed input
#[derive(Debug, Clone, PartialEq)]
pub enum ItemResult {
    Success(ItemSuccess),
    Failure(ItemFailure),
}

impl ItemResult {
    /// Failure tagged with the stage it happened in
    #[must_use]
    pub fn failure(filename: String, stage: Option<PipelineStage>, error: &ProcessingError) -> Self {
        let message = match stage {
            Some(stage) => format!("{stage}: {error}"),
            None => error.to_string(),
        };
        Self::Failure(ItemFailure {
            filename,
            stage,
            kind: error.kind(),
            message,
        })
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        match self {
            Self::Success(success) => &success.filename,
            Self::Failure(failure) => &failure.filename,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn as_success(&self) -> Option<&ItemSuccess> {
        match self {
            Self::Success(success) => Some(success),
            Self::Failure(_) => None,
        }
    }

    #[must_use]
    pub fn as_failure(&self) -> Option<&ItemFailure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }
}

/// Size reduction in percent; 0 when the original is empty
///
/// Negative when the output is larger than the input.
#[must_use]
pub fn compression_ratio(original_size: usize, final_size: usize) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    let original = original_size as f64;
    (original - final_size as f64) / original * 100.0
}

/// Round to one decimal place for reporting
#[must_use]
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Stateless single-item pipeline, cheap to clone into workers
#[derive(Clone)]
pub struct ItemPipeline {
    config: Arc<ProcessorConfig>,
    remover: Option<Arc<dyn BackgroundRemover>>,
}

impl ItemPipeline {
    #[must_use]
    pub fn new(config: ProcessorConfig, remover: Option<Arc<dyn BackgroundRemover>>) -> Self {
        Self {
            config: Arc::new(config),
            remover,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Whether a segmentation backend is configured
    #[must_use]
    pub fn has_background_removal(&self) -> bool {
        self.remover.is_some()
    }

    /// Run one item through every stage
    ///
    /// Blocking; call from a blocking-capable thread. The token is checked
    /// before each stage.
    #[instrument(skip_all, fields(filename = %item.filename))]
    pub fn process(
        &self,
        item: ImageItem,
        options: &ProcessingOptions,
        cancel: &CancellationToken,
    ) -> ItemResult {
        let start = instant::Instant::now();
        let ImageItem { filename, data } = item;

        match self.run_stages(&filename, data, options, cancel) {
            Ok((png, original_size)) => {
                let final_size = png.len();
                debug!(
                    original_size,
                    final_size,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "item processed"
                );
                ItemResult::Success(ItemSuccess {
                    filename,
                    png,
                    operations: OperationsApplied {
                        background_removed: options.remove_background,
                        resized: options.resize,
                        dimensions: options.dimensions_label(),
                        optimized: true,
                    },
                    original_size,
                    final_size,
                    compression_ratio: compression_ratio(original_size, final_size),
                })
            },
            Err((stage, error)) => {
                warn!(%stage, error = %error, "item failed");
                ItemResult::failure(filename, Some(stage), &error)
            },
        }
    }

    fn run_stages(
        &self,
        filename: &str,
        data: ImageData,
        options: &ProcessingOptions,
        cancel: &CancellationToken,
    ) -> std::result::Result<(Vec<u8>, usize), (PipelineStage, ProcessingError)> {
        let at = |stage: PipelineStage| move |error: ProcessingError| (stage, error);

        Self::stage_gate(cancel, PipelineStage::Validate).map_err(at(PipelineStage::Validate))?;
        Self::validate(filename, options).map_err(at(PipelineStage::Validate))?;

        Self::stage_gate(cancel, PipelineStage::Decode).map_err(at(PipelineStage::Decode))?;
        let bytes = match data {
            ImageData::Raw(bytes) => bytes,
            ImageData::Encoded(text) => {
                ImageCodec::decode_base64(&text).map_err(at(PipelineStage::Decode))?
            },
        };
        let original_size = bytes.len();
        let mut image = ImageCodec::decode(&bytes).map_err(at(PipelineStage::Decode))?;
        drop(bytes);

        if options.remove_background {
            let stage = PipelineStage::RemoveBackground;
            Self::stage_gate(cancel, stage).map_err(at(stage))?;
            let remover = self.remover.as_ref().ok_or_else(|| {
                (
                    stage,
                    ProcessingError::segmentation("Background removal is not available"),
                )
            })?;
            image = DynamicImage::ImageRgba8(
                remover.remove_background(&image, cancel).map_err(at(stage))?,
            );
        }

        if options.resize {
            let stage = PipelineStage::Resize;
            Self::stage_gate(cancel, stage).map_err(at(stage))?;
            image = DynamicImage::ImageRgba8(
                ResizeTransform::resize(
                    &image,
                    options.width,
                    options.height,
                    self.config.resize_mode,
                )
                .map_err(at(stage))?,
            );
        }

        Self::stage_gate(cancel, PipelineStage::Encode).map_err(at(PipelineStage::Encode))?;
        let png = ImageCodec::encode_png(&image, self.config.png_compression)
            .map_err(at(PipelineStage::Encode))?;

        Ok((png, original_size))
    }

    fn validate(filename: &str, options: &ProcessingOptions) -> Result<()> {
        if !FormatGate::is_supported(filename) {
            let ext = FormatGate::extension(filename).unwrap_or("(none)");
            return Err(ProcessingError::unsupported_format(format!(".{ext}")));
        }
        if options.resize {
            options
                .validate()
                .map_err(|e| ProcessingError::invalid_dimensions(e.to_string()))?;
        }
        Ok(())
    }

    fn stage_gate(cancel: &CancellationToken, stage: PipelineStage) -> Result<()> {
        if cancel.is_cancelled() {
            Err(ProcessingError::Cancelled(stage.as_str()))
        } else {
            Ok(())
        }
    }
}
