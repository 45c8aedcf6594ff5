//! Conversion of command line arguments into library configuration

use super::main_impl::{Cli, CliLogFormat};
use crate::{
    cache::{ModelCache, DEFAULT_MODEL_URL},
    config::ProcessorConfig,
    models::{ModelSpec, PreprocessingConfig},
    server::RouterSettings,
    tracing_config::{TracingConfig, TracingFormat},
};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use super::main_impl::CliBackend;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn processor_config(cli: &Cli) -> Result<ProcessorConfig> {
        Ok(ProcessorConfig::builder()
            .workers(cli.workers)
            .item_timeout(Duration::from_secs(cli.item_timeout_secs))
            .png_compression(cli.png_compression)
            .resize_mode(cli.resize_mode)
            .archive_naming(cli.archive_naming)
            .build()?)
    }

    /// Model to load, or `None` when segmentation is disabled
    pub(crate) fn model_spec(cli: &Cli) -> Result<Option<ModelSpec>> {
        if cli.backend == CliBackend::None {
            return Ok(None);
        }

        let preprocessing = PreprocessingConfig {
            target_size: cli.model_input_size,
            normalization_mean: Self::per_channel(&cli.model_mean, "--model-mean")?,
            normalization_std: Self::per_channel(&cli.model_std, "--model-std")?,
        };
        preprocessing.validate()?;

        let spec = match (&cli.model_path, &cli.model_url) {
            (Some(path), _) => ModelSpec::from_file(path.clone()),
            (None, Some(url)) => ModelSpec::from_url(url.clone()),
            (None, None) => ModelSpec::from_url(DEFAULT_MODEL_URL),
        };
        let spec = match &cli.model_sha256 {
            Some(hash) => spec.with_sha256(hash.clone()),
            None => spec,
        };

        Ok(Some(spec.with_preprocessing(preprocessing)))
    }

    pub(crate) fn model_cache(cli: &Cli) -> Result<ModelCache> {
        match &cli.cache_dir {
            Some(dir) => ModelCache::with_custom_cache_dir(dir)
                .with_context(|| format!("Invalid cache directory {}", dir.display())),
            None => ModelCache::new().context("Failed to open model cache"),
        }
    }

    pub(crate) fn session_root(cli: &Cli) -> PathBuf {
        cli.session_root.clone().unwrap_or_else(|| {
            std::env::temp_dir()
                .join("image-processor")
                .join("sessions")
        })
    }

    pub(crate) fn router_settings(cli: &Cli) -> RouterSettings {
        RouterSettings {
            max_body_bytes: cli.max_body_bytes,
            cors_origins: cli
                .cors_origins
                .iter()
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        }
    }

    pub(crate) fn tracing_config(cli: &Cli) -> Result<TracingConfig> {
        let format = match cli.log_format {
            CliLogFormat::Console => TracingFormat::Console,
            CliLogFormat::Compact => TracingFormat::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => TracingFormat::Json,
            #[cfg(not(feature = "tracing-json"))]
            CliLogFormat::Json => bail!("JSON logging requires the 'tracing-json' feature"),
        };

        let config = TracingConfig::new()
            .with_verbosity(cli.verbose)
            .with_format(format);
        Ok(match &cli.log_filter {
            Some(filter) if !filter.trim().is_empty() => config.with_env_filter(filter.clone()),
            _ => config,
        })
    }

    fn per_channel(values: &[f32], flag: &str) -> Result<[f32; 3]> {
        match values {
            [value] => Ok([*value; 3]),
            [r, g, b] => Ok([*r, *g, *b]),
            _ => bail!("{flag} takes one value or three comma separated values"),
        }
    }
}
