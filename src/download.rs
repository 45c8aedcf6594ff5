//! Model downloading with integrity verification
//!
//! Models are streamed to a `.part` file next to their final cache location,
//! hashed while streaming, and renamed into place only once complete and
//! verified.

use crate::cache::{format_size, ModelCache};
use crate::error::{ProcessingError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Model downloader backed by the on-disk cache
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader for the given cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ProcessingError::model(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, cache })
    }

    /// Return the cached model for `url`, downloading it first if needed
    ///
    /// A cached file that fails verification against `expected_sha256` is
    /// discarded and fetched again.
    ///
    /// # Errors
    /// - Invalid model URL
    /// - Network or HTTP errors during download
    /// - File system errors while writing the cache
    /// - Checksum mismatch after download
    pub async fn ensure_model(&self, url: &str, expected_sha256: Option<&str>) -> Result<PathBuf> {
        validate_model_url(url)?;
        let target = self.cache.model_path(url);

        if self.cache.is_model_cached(url) {
            if Self::verify_file_integrity(&target, expected_sha256)? {
                log::debug!("Using cached model {}", target.display());
                return Ok(target);
            }
            log::warn!(
                "Cached model {} failed verification, downloading again",
                target.display()
            );
        }

        log::info!("Downloading segmentation model from {url}");
        let partial = target.with_extension("part");
        let digest = match self.download_file(url, &partial).await {
            Ok(digest) => digest,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e);
            },
        };

        if let Some(expected) = expected_sha256 {
            if !digest.eq_ignore_ascii_case(expected) {
                let _ = fs::remove_file(&partial);
                return Err(ProcessingError::model(format!(
                    "Checksum mismatch for {url}: expected {expected}, got {digest}"
                )));
            }
        }

        fs::rename(&partial, &target)
            .map_err(|e| ProcessingError::file_io_error("move downloaded model", &target, &e))?;
        Ok(target)
    }

    /// Stream `url` into `local_path`, returning the hex SHA-256 of the body
    async fn download_file(&self, url: &str, local_path: &Path) -> Result<String> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ProcessingError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProcessingError::model(format!("Failed to download {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(ProcessingError::model(format!(
                "HTTP error {} for {url}",
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| ProcessingError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream.read(&mut buffer).await.map_err(|e| {
                ProcessingError::model(format!("Failed to read download stream: {e}"))
            })?;
            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| ProcessingError::file_io_error("write to file", local_path, &e))?;
            downloaded += bytes_read as u64;
        }

        file.flush()
            .await
            .map_err(|e| ProcessingError::file_io_error("flush file", local_path, &e))?;

        log::info!(
            "Downloaded {} to {}",
            format_size(downloaded),
            local_path.display()
        );
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Verify a file against an expected SHA-256 hex digest
    ///
    /// Returns `Ok(true)` when no digest is expected.
    ///
    /// # Errors
    /// - Failed to read the file
    pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        let contents = fs::read(file_path).map_err(|e| {
            ProcessingError::file_io_error("read file for verification", file_path, &e)
        })?;

        let actual_hash = sha256_hex(&contents);
        if actual_hash.eq_ignore_ascii_case(expected) {
            Ok(true)
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {}, got {}",
                file_path.display(),
                expected,
                actual_hash
            );
            Ok(false)
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Hex-encoded SHA-256 digest of a byte slice
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Validate that a model URL is fetchable over HTTP(S)
///
/// # Errors
/// Returns `ProcessingError::Model` for empty or non-HTTP URLs.
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(ProcessingError::model("Model URL cannot be empty"));
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            ProcessingError::model(format!(
                "Unsupported model URL: {url}. Only http:// and https:// are supported"
            ))
        })?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(ProcessingError::model(format!(
            "Model URL has no host: {url}"
        )));
    }

    Ok(())
}
