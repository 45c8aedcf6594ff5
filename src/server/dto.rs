//! Request and response bodies of the HTTP API

use crate::{
    batch::{BatchResult, BatchSummary},
    config::{ProcessingOptions, DEFAULT_DIMENSION},
    error::{FailureKind, ProcessingError, Result},
    pipeline::{round1, OperationsApplied, PipelineStage, ItemResult},
    services::ImageCodec,
};
use serde::{Deserialize, Serialize};

/// Width or height as sent by clients: a JSON number or a numeric string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DimensionField {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl DimensionField {
    /// Interpret the value as a whole number of pixels
    ///
    /// # Errors
    /// Returns `ProcessingError::Validation` for fractional, negative or
    /// non-numeric values.
    pub fn to_pixels(&self, name: &str) -> Result<u32> {
        let invalid = || ProcessingError::validation(format!("{name} must be an integer"));
        let value = match self {
            Self::Integer(value) => *value,
            Self::Float(value) if value.is_finite() && value.fract() == 0.0 => *value as i64,
            Self::Float(_) => return Err(invalid()),
            Self::Text(text) => text.trim().parse::<i64>().map_err(|_| invalid())?,
        };
        u32::try_from(value).map_err(|_| {
            ProcessingError::validation(format!("{name} must be between 1 and 4000"))
        })
    }
}

/// Processing switches shared by `/process-images` and `/process`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsFields {
    #[serde(default)]
    pub remove_background: bool,
    #[serde(default)]
    pub resize: bool,
    #[serde(default)]
    pub width: Option<DimensionField>,
    #[serde(default)]
    pub height: Option<DimensionField>,
}

impl OptionsFields {
    /// Build validated options; absent dimensions default to 400
    ///
    /// # Errors
    /// Returns `ProcessingError::Validation` for non-integer or
    /// out-of-range dimensions.
    pub fn to_options(&self) -> Result<ProcessingOptions> {
        let pixels = |field: &Option<DimensionField>, name: &str| {
            field
                .as_ref()
                .map_or(Ok(DEFAULT_DIMENSION), |value| value.to_pixels(name))
        };
        let options = ProcessingOptions {
            remove_background: self.remove_background,
            resize: self.resize,
            width: pixels(&self.width, "width")?,
            height: pixels(&self.height, "height")?,
        };
        options.validate()?;
        Ok(options)
    }
}

/// One inline image of a `/process-images` request
#[derive(Debug, Clone, Deserialize)]
pub struct ImagePayload {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessImagesRequest {
    #[serde(default)]
    pub images: Vec<ImagePayload>,
    #[serde(flatten)]
    pub options: OptionsFields,
}

/// Entry of a `/download-zip` request, shaped like a returned result
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadEntry {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub processed_image: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadZipRequest {
    #[serde(default)]
    pub images: Vec<DownloadEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSessionRequest {
    pub session_id: String,
    #[serde(default)]
    pub settings: OptionsFields,
}

/// Size statistics of a successful item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStats {
    pub original_size: usize,
    pub final_size: usize,
    pub compression_ratio: f64,
}

/// Serialized form of one [`ItemResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResultBody {
    pub success: bool,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<OperationsApplied>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ItemStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,
}

impl ItemResultBody {
    /// Result with the PNG inlined as a data URI
    #[must_use]
    pub fn inline(result: &ItemResult) -> Self {
        let mut body = Self::base(result);
        if let ItemResult::Success(success) = result {
            body.processed_image = Some(ImageCodec::to_png_data_uri(&success.png));
        }
        body
    }

    /// Result pointing at a file stored in a session
    #[must_use]
    pub fn stored(result: &ItemResult, output_file: Option<String>) -> Self {
        let mut body = Self::base(result);
        body.output_file = output_file;
        body
    }

    fn base(result: &ItemResult) -> Self {
        match result {
            ItemResult::Success(success) => Self {
                success: true,
                filename: success.filename.clone(),
                processed_image: None,
                output_file: None,
                operations: Some(success.operations.clone()),
                stats: Some(ItemStats {
                    original_size: success.original_size,
                    final_size: success.final_size,
                    compression_ratio: round1(success.compression_ratio),
                }),
                error: None,
                error_kind: None,
                stage: None,
            },
            ItemResult::Failure(failure) => Self {
                success: false,
                filename: failure.filename.clone(),
                processed_image: None,
                output_file: None,
                operations: None,
                stats: None,
                error: Some(failure.message.clone()),
                error_kind: Some(failure.kind),
                stage: failure.stage,
            },
        }
    }
}

/// Aggregate counts of a batch response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatsBody {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_extracted: Option<usize>,
}

impl From<&BatchSummary> for BatchStatsBody {
    fn from(summary: &BatchSummary) -> Self {
        Self {
            total_processed: summary.total,
            successful: summary.successful,
            failed: summary.failed,
            success_rate: summary.success_rate,
            total_extracted: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub results: Vec<ItemResultBody>,
    pub stats: BatchStatsBody,
}

impl ProcessResponse {
    #[must_use]
    pub fn inline(batch: &BatchResult) -> Self {
        Self {
            results: batch.results.iter().map(ItemResultBody::inline).collect(),
            stats: BatchStatsBody::from(&batch.summary),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProcessResponse {
    pub session_id: String,
    pub results: Vec<ItemResultBody>,
    pub stats: BatchStatsBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub size: usize,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub files: Vec<UploadedFile>,
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub supported_formats: Vec<String>,
    pub background_removal: bool,
}
