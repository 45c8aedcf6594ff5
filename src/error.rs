//! Error types for image processing operations

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for image processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Error taxonomy shared by the pipeline, the batch coordinator, the
/// session store and the HTTP layer
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// File extension is not in the supported allow-list
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Payload is not valid base64 or not a recognized image encoding
    #[error("Decode error: {0}")]
    Decode(String),

    /// Background removal failed inside the segmentation backend
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Target canvas dimensions are out of range
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// PNG encoding failed
    #[error("Encode error: {0}")]
    Encode(String),

    /// Item did not finish within the per-item timeout
    #[error("Processing timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Work was abandoned after its cancellation token fired
    #[error("Processing cancelled at stage '{0}'")]
    Cancelled(&'static str),

    /// Malformed request or invalid options
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session or filesystem bookkeeping failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Unknown session identifier or missing stored file
    #[error("Not found: {0}")]
    NotFound(String),

    /// Segmentation model loading, download or verification errors
    #[error("Model error: {0}")]
    Model(String),

    /// ZIP archive could not be read or written
    #[error("Archive error: {0}")]
    Archive(String),

    /// Input/output errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable classification of a per-item failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnsupportedFormat,
    Decode,
    Segmentation,
    InvalidDimensions,
    Encode,
    Timeout,
    Cancelled,
    Internal,
}

impl ProcessingError {
    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    pub fn invalid_dimensions<S: Into<String>>(msg: S) -> Self {
        Self::InvalidDimensions(msg.into())
    }

    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn archive<S: Into<String>>(msg: S) -> Self {
        Self::Archive(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Storage(format!(
            "Failed to {} '{}': {}",
            operation,
            path.as_ref().display(),
            error
        ))
    }

    /// Classify this error for a per-item failure record
    ///
    /// Request-level variants never reach an item result; they fold into
    /// `Internal` if they do.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            Self::Decode(_) => FailureKind::Decode,
            Self::Segmentation(_) | Self::Model(_) => FailureKind::Segmentation,
            Self::InvalidDimensions(_) => FailureKind::InvalidDimensions,
            Self::Encode(_) => FailureKind::Encode,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Cancelled(_) => FailureKind::Cancelled,
            Self::Validation(_)
            | Self::Storage(_)
            | Self::NotFound(_)
            | Self::Archive(_)
            | Self::Io(_)
            | Self::Internal(_) => FailureKind::Internal,
        }
    }
}

impl From<image::ImageError> for ProcessingError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Encoding(e) => Self::Encode(e.to_string()),
            image::ImageError::Parameter(e) => Self::InvalidDimensions(e.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for ProcessingError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ProcessingError::validation("width missing");
        assert!(matches!(err, ProcessingError::Validation(_)));

        let err = ProcessingError::unsupported_format(".xyz");
        assert!(matches!(err, ProcessingError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_error_display() {
        let err = ProcessingError::unsupported_format(".xyz");
        assert_eq!(err.to_string(), "Unsupported format: .xyz");

        let err = ProcessingError::Timeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "Processing timed out after 60s");
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            ProcessingError::decode("bad").kind(),
            FailureKind::Decode
        );
        assert_eq!(
            ProcessingError::model("missing").kind(),
            FailureKind::Segmentation
        );
        assert_eq!(
            ProcessingError::Cancelled("resize").kind(),
            FailureKind::Cancelled
        );
        assert_eq!(
            ProcessingError::storage("disk full").kind(),
            FailureKind::Internal
        );
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::UnsupportedFormat).unwrap();
        assert_eq!(json, "\"unsupported_format\"");
    }

    #[test]
    fn test_file_io_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = ProcessingError::file_io_error(
            "create upload directory",
            std::path::Path::new("/srv/sessions/x"),
            &io_error,
        );
        let message = err.to_string();
        assert!(message.contains("create upload directory"));
        assert!(message.contains("/srv/sessions/x"));
    }
}
