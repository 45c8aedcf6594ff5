//! Model cache management for downloaded segmentation models
//!
//! Downloaded ONNX files live in a flat, XDG-compliant cache directory. Each
//! file is keyed by the URL it was fetched from so that two URLs ending in
//! the same file name never collide.

use crate::error::{ProcessingError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the cache root
pub const CACHE_DIR_ENV: &str = "IMAGE_PROCESSOR_CACHE_DIR";

/// Default segmentation model (`ISNet` general, FP32)
pub const DEFAULT_MODEL_URL: &str =
    "https://huggingface.co/imgly/isnet-general-onnx/resolve/main/onnx/model.onnx";

/// Flat on-disk cache of model files
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache rooted at the default location
    ///
    /// # Errors
    /// - Failed to determine the user cache directory
    /// - Failed to create the cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_dir()?;
        Self::with_custom_cache_dir(&cache_dir)
    }

    /// Create a cache rooted at an explicit directory
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(cache_dir).map_err(|e| {
                ProcessingError::file_io_error("create cache directory", cache_dir, &e)
            })?;
        }

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    /// Resolve the cache root: env override first, then the XDG cache dir
    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                ProcessingError::model(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("image-processor")
            .join("models"))
    }

    /// Cache-safe file name for a model URL
    ///
    /// The name is a 16 hex digit URL hash followed by the last path segment,
    /// so the origin stays recognizable in directory listings.
    ///
    /// # Examples
    /// ```
    /// use image_processor::cache::ModelCache;
    ///
    /// let name = ModelCache::url_to_file_name("https://example.com/models/isnet.onnx");
    /// assert!(name.ends_with("-isnet.onnx"));
    /// assert_eq!(name.len(), 16 + 1 + "isnet.onnx".len());
    /// ```
    #[must_use]
    pub fn url_to_file_name(url: &str) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        let prefix = hash.get(..16).unwrap_or(&hash);

        let last_segment = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                segment
                    .chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                            c
                        } else {
                            '_'
                        }
                    })
                    .collect::<String>()
            })
            .unwrap_or_else(|| "model.onnx".to_string());

        format!("{prefix}-{last_segment}")
    }

    /// Path a model downloaded from `url` is stored at
    #[must_use]
    pub fn model_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(Self::url_to_file_name(url))
    }

    /// Check if a model for `url` is present and non-empty
    #[must_use]
    pub fn is_model_cached(&self, url: &str) -> bool {
        fs::metadata(self.model_path(url)).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
    }

    /// Remove a cached model, returning whether a file was deleted
    ///
    /// # Errors
    /// - Failed to delete the file
    pub fn clear_model(&self, url: &str) -> Result<bool> {
        let path = self.model_path(url);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .map_err(|e| ProcessingError::file_io_error("remove cached model", &path, &e))?;
        log::info!("Removed cached model {}", path.display());
        Ok(true)
    }

    #[must_use]
    pub fn get_current_cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }
}

/// Format a byte count for log output
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS.get(unit).copied().unwrap_or("GB"))
    }
}
