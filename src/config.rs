//! Configuration types for image processing operations

use crate::error::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest accepted target dimension in pixels
pub const MIN_DIMENSION: u32 = 1;
/// Largest accepted target dimension in pixels
pub const MAX_DIMENSION: u32 = 4000;
/// Target width and height used when a request does not specify them
pub const DEFAULT_DIMENSION: u32 = 400;

/// How the resize transform places the source inside the target canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Scale the whole image inside the canvas and pad with transparency
    #[default]
    Fit,
    /// Scale to cover the canvas and center-crop the overflowing axis
    Fill,
}

impl std::fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fit => write!(f, "fit"),
            Self::Fill => write!(f, "fill"),
        }
    }
}

impl std::str::FromStr for ResizeMode {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fit" | "pad" => Ok(Self::Fit),
            "fill" | "crop" => Ok(Self::Fill),
            other => Err(ProcessingError::validation(format!(
                "Unknown resize mode '{other}' (expected fit or fill)"
            ))),
        }
    }
}

/// Policy for two archive entries that normalize to the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveNaming {
    /// Later entries replace earlier ones with the same name
    #[default]
    LastWriteWins,
    /// Later entries get a numeric suffix: `a.png`, `a_1.png`, `a_2.png`
    Suffix,
}

impl std::str::FromStr for ArchiveNaming {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "last-write-wins" | "overwrite" => Ok(Self::LastWriteWins),
            "suffix" => Ok(Self::Suffix),
            other => Err(ProcessingError::validation(format!(
                "Unknown archive naming policy '{other}' (expected last-write-wins or suffix)"
            ))),
        }
    }
}

/// Per-request processing switches, shared read-only by every worker of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    pub remove_background: bool,
    pub resize: bool,
    pub width: u32,
    pub height: u32,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            remove_background: false,
            resize: false,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
        }
    }
}

impl ProcessingOptions {
    /// Validate the target dimensions
    ///
    /// Width and height are checked even when `resize` is off, so a request
    /// with out-of-range dimensions is rejected before any decoding happens.
    pub fn validate(&self) -> Result<()> {
        let range = MIN_DIMENSION..=MAX_DIMENSION;
        if !range.contains(&self.width) || !range.contains(&self.height) {
            return Err(ProcessingError::validation(format!(
                "Invalid dimensions {}x{} (allowed {MIN_DIMENSION}-{MAX_DIMENSION}px)",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Label used in the operations record: `"original"` or `"WxH"`
    #[must_use]
    pub fn dimensions_label(&self) -> String {
        if self.resize {
            format!("{}x{}", self.width, self.height)
        } else {
            "original".to_string()
        }
    }
}

/// Process-wide configuration for the pipeline and the batch coordinator
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Concurrent pipeline workers per batch
    pub workers: usize,
    /// Wall-clock limit for one item inside a batch
    pub item_timeout: Duration,
    /// PNG compression level (0-9)
    pub png_compression: u8,
    /// Canonical resize policy
    pub resize_mode: ResizeMode,
    /// Name collision policy for produced archives
    pub archive_naming: ArchiveNaming,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            item_timeout: Duration::from_secs(60),
            png_compression: 6,
            resize_mode: ResizeMode::Fit,
            archive_naming: ArchiveNaming::LastWriteWins,
        }
    }
}

impl ProcessorConfig {
    #[must_use]
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ProcessingError::validation("Worker count must be at least 1"));
        }
        if self.item_timeout.is_zero() {
            return Err(ProcessingError::validation("Item timeout must be positive"));
        }
        if self.png_compression > 9 {
            return Err(ProcessingError::validation(format!(
                "Invalid PNG compression level: {} (valid range: 0-9)",
                self.png_compression
            )));
        }
        Ok(())
    }
}

/// Builder for `ProcessorConfig`
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ProcessorConfig::default(),
        }
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    #[must_use]
    pub fn item_timeout(mut self, timeout: Duration) -> Self {
        self.config.item_timeout = timeout;
        self
    }

    #[must_use]
    pub fn png_compression(mut self, level: u8) -> Self {
        self.config.png_compression = level;
        self
    }

    #[must_use]
    pub fn resize_mode(mut self, mode: ResizeMode) -> Self {
        self.config.resize_mode = mode;
        self
    }

    #[must_use]
    pub fn archive_naming(mut self, naming: ArchiveNaming) -> Self {
        self.config.archive_naming = naming;
        self
    }

    /// Build the processor configuration
    ///
    /// # Errors
    ///
    /// Returns `ProcessingError::Validation` for a zero worker count, a zero
    /// timeout or a compression level above 9.
    pub fn build(self) -> Result<ProcessorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ProcessorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
