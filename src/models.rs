//! Segmentation model specification and loading
//!
//! A model comes either from a local ONNX file or from a URL that is
//! downloaded once into the model cache. `ModelManager` holds the resolved
//! file together with the preprocessing parameters the model expects.

use crate::cache::ModelCache;
use crate::download::{sha256_hex, ModelDownloader};
use crate::error::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Preprocessing parameters for a segmentation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Square input side length in pixels
    pub target_size: u32,
    /// Per-channel mean subtracted after scaling to `[0, 1]`
    pub normalization_mean: [f32; 3],
    /// Per-channel divisor applied after mean subtraction
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    /// `ISNet` general-use parameters
    fn default() -> Self {
        Self {
            target_size: 1024,
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

impl PreprocessingConfig {
    /// Validate the parameters
    ///
    /// # Errors
    /// Returns `ProcessingError::Model` for a zero target size or a
    /// non-positive standard deviation.
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(ProcessingError::model("Model input size must be positive"));
        }
        if self.normalization_std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(ProcessingError::model(format!(
                "Normalization std must be positive, got {:?}",
                self.normalization_std
            )));
        }
        Ok(())
    }
}

/// Where the model file comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Local ONNX file
    File(PathBuf),
    /// Remote ONNX file, cached after the first download
    Url(String),
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => write!(f, "{url}"),
        }
    }
}

/// Full description of the segmentation model to load
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub source: ModelSource,
    /// Expected SHA-256 of the model file, hex encoded
    pub sha256: Option<String>,
    pub preprocessing: PreprocessingConfig,
}

impl ModelSpec {
    #[must_use]
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            source: ModelSource::File(path.into()),
            sha256: None,
            preprocessing: PreprocessingConfig::default(),
        }
    }

    #[must_use]
    pub fn from_url<S: Into<String>>(url: S) -> Self {
        Self {
            source: ModelSource::Url(url.into()),
            sha256: None,
            preprocessing: PreprocessingConfig::default(),
        }
    }

    #[must_use]
    pub fn with_sha256<S: Into<String>>(mut self, sha256: S) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    #[must_use]
    pub fn with_preprocessing(mut self, preprocessing: PreprocessingConfig) -> Self {
        self.preprocessing = preprocessing;
        self
    }
}

/// Resolved model file plus the parameters needed to run it
#[derive(Debug, Clone)]
pub struct ModelManager {
    model_path: PathBuf,
    preprocessing: PreprocessingConfig,
}

impl ModelManager {
    /// Resolve a model spec to a local file, downloading it if needed
    ///
    /// # Errors
    /// - Local model file missing or failing checksum verification
    /// - Download or cache errors for URL sources
    /// - Invalid preprocessing parameters
    pub async fn resolve(spec: &ModelSpec, cache: ModelCache) -> Result<Self> {
        spec.preprocessing.validate()?;

        let model_path = match &spec.source {
            ModelSource::File(path) => {
                if !path.is_file() {
                    return Err(ProcessingError::model(format!(
                        "Model file not found: {}",
                        path.display()
                    )));
                }
                if !ModelDownloader::verify_file_integrity(path, spec.sha256.as_deref())? {
                    return Err(ProcessingError::model(format!(
                        "Model file {} does not match the expected checksum",
                        path.display()
                    )));
                }
                path.clone()
            },
            ModelSource::Url(url) => {
                let downloader = ModelDownloader::new(cache)?;
                downloader.ensure_model(url, spec.sha256.as_deref()).await?
            },
        };

        log::info!("Segmentation model resolved to {}", model_path.display());
        Ok(Self {
            model_path,
            preprocessing: spec.preprocessing.clone(),
        })
    }

    /// Use an existing model file as-is
    #[must_use]
    pub fn from_path<P: Into<PathBuf>>(model_path: P, preprocessing: PreprocessingConfig) -> Self {
        Self {
            model_path: model_path.into(),
            preprocessing,
        }
    }

    /// Read the model bytes
    ///
    /// # Errors
    /// - Failed to read the model file
    pub fn load_model(&self) -> Result<Vec<u8>> {
        let data = std::fs::read(&self.model_path)
            .map_err(|e| ProcessingError::file_io_error("read model", &self.model_path, &e))?;
        log::debug!(
            "Loaded model {} ({} bytes, sha256 {})",
            self.model_path.display(),
            data.len(),
            sha256_hex(&data)
        );
        Ok(data)
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    #[must_use]
    pub fn get_preprocessing_config(&self) -> &PreprocessingConfig {
        &self.preprocessing
    }
}
