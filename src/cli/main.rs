//! Image processing server
//!
//! Parses the command line, resolves the segmentation model, builds the
//! pipeline and serves the HTTP API until SIGINT/SIGTERM.

use super::backend_factory::BackendFactory;
use super::config::CliConfigBuilder;
use crate::{
    batch::BatchProcessor,
    config::{ArchiveNaming, ResizeMode},
    models::ModelManager,
    pipeline::ItemPipeline,
    server::{self, AppState, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_EXTRACTED_BYTES},
    session::SessionStore,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// HTTP backend for background removal, canvas resize and PNG optimization
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(name = "image-processor")]
pub struct Cli {
    /// Address to bind
    #[arg(long, env = "IMAGE_PROCESSOR_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "IMAGE_PROCESSOR_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Maximum request body size in bytes
    #[arg(long, env = "IMAGE_PROCESSOR_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Maximum total uncompressed size of the images in one uploaded ZIP
    #[arg(long, env = "IMAGE_PROCESSOR_MAX_EXTRACTED_BYTES", default_value_t = DEFAULT_MAX_EXTRACTED_BYTES)]
    pub max_extracted_bytes: u64,

    /// Directory holding session uploads and outputs [default: <tmp>/image-processor/sessions]
    #[arg(long, env = "IMAGE_PROCESSOR_SESSION_ROOT", value_name = "PATH")]
    pub session_root: Option<PathBuf>,

    /// Remove sessions idle for this many seconds (sessions are kept until cleanup otherwise)
    #[arg(long, env = "IMAGE_PROCESSOR_SESSION_TTL_SECS")]
    pub session_ttl_secs: Option<u64>,

    /// Allowed CORS origins, comma separated [default: any]
    #[arg(long = "cors-origin", env = "IMAGE_PROCESSOR_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Segmentation backend
    #[arg(short, long, env = "IMAGE_PROCESSOR_BACKEND", value_enum, default_value_t = CliBackend::Tract)]
    pub backend: CliBackend,

    /// Local ONNX segmentation model; takes precedence over --model-url
    #[arg(long, env = "IMAGE_PROCESSOR_MODEL_PATH", value_name = "PATH")]
    pub model_path: Option<PathBuf>,

    /// Model to download when no local path is given [default: ISNet general]
    #[arg(long, env = "IMAGE_PROCESSOR_MODEL_URL")]
    pub model_url: Option<String>,

    /// Expected SHA-256 of the model file
    #[arg(long, env = "IMAGE_PROCESSOR_MODEL_SHA256")]
    pub model_sha256: Option<String>,

    /// Directory for downloaded models
    #[arg(long, env = "IMAGE_PROCESSOR_CACHE_DIR", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Square input size of the model
    #[arg(long, env = "IMAGE_PROCESSOR_MODEL_INPUT_SIZE", default_value_t = 1024)]
    pub model_input_size: u32,

    /// Normalization mean, one value or one per RGB channel
    #[arg(long, env = "IMAGE_PROCESSOR_MODEL_MEAN", value_delimiter = ',', default_value = "0.5")]
    pub model_mean: Vec<f32>,

    /// Normalization standard deviation, one value or one per RGB channel
    #[arg(long, env = "IMAGE_PROCESSOR_MODEL_STD", value_delimiter = ',', default_value = "1.0")]
    pub model_std: Vec<f32>,

    /// Inference threads per ONNX session (0 = cores split across sessions)
    #[arg(long, env = "IMAGE_PROCESSOR_MODEL_THREADS", default_value_t = 0)]
    pub model_threads: usize,

    /// Concurrent pipeline workers per batch
    #[arg(short, long, env = "IMAGE_PROCESSOR_WORKERS", default_value_t = 5)]
    pub workers: usize,

    /// Per-item timeout in seconds
    #[arg(long, env = "IMAGE_PROCESSOR_ITEM_TIMEOUT_SECS", default_value_t = 60)]
    pub item_timeout_secs: u64,

    /// PNG compression level (0-9)
    #[arg(long, env = "IMAGE_PROCESSOR_PNG_COMPRESSION", default_value_t = 6)]
    pub png_compression: u8,

    /// Resize policy: fit (pad) or fill (crop)
    #[arg(long, env = "IMAGE_PROCESSOR_RESIZE_MODE", default_value = "fit")]
    pub resize_mode: ResizeMode,

    /// Duplicate output names: last-write-wins or suffix
    #[arg(long, env = "IMAGE_PROCESSOR_ARCHIVE_NAMING", default_value = "last-write-wins")]
    pub archive_naming: ArchiveNaming,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, env = "IMAGE_PROCESSOR_LOG_FORMAT", value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Filter directives overriding --verbose (e.g. "image_processor=debug")
    #[arg(long, env = "RUST_LOG")]
    pub log_filter: Option<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliBackend {
    /// Pure Rust inference
    Tract,
    /// ONNX Runtime
    Onnx,
    /// No segmentation; background removal requests fail per item
    None,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    Json,
}

/// Main entry point
///
/// # Errors
/// - Invalid configuration
/// - Model resolution or backend initialization failures
/// - Bind or serve failures
pub async fn main() -> Result<()> {
    run(Cli::parse()).await
}

/// Run the server with already parsed arguments
///
/// # Errors
/// Same as [`main`].
pub async fn run(cli: Cli) -> Result<()> {
    CliConfigBuilder::tracing_config(&cli)?
        .init()
        .context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::processor_config(&cli).context("Invalid processor settings")?;
    info!(
        workers = config.workers,
        item_timeout_secs = config.item_timeout.as_secs(),
        resize_mode = %config.resize_mode,
        "processor configured"
    );

    let workers = config.workers;
    let remover = match CliConfigBuilder::model_spec(&cli).context("Invalid model settings")? {
        Some(spec) => {
            let cache = CliConfigBuilder::model_cache(&cli)?;
            info!(model = %spec.source, "resolving segmentation model");
            let manager = ModelManager::resolve(&spec, cache)
                .await
                .context("Failed to resolve segmentation model")?;
            Some(
                BackendFactory::create_remover(cli.backend, manager, cli.model_threads, workers)
                    .await
                    .context("Failed to initialize segmentation backend")?,
            )
        },
        None => {
            warn!("no segmentation backend configured; background removal is disabled");
            None
        },
    };

    let processor = BatchProcessor::new(ItemPipeline::new(config, remover));

    let session_root = CliConfigBuilder::session_root(&cli);
    tokio::fs::create_dir_all(&session_root)
        .await
        .with_context(|| format!("Failed to create session root {}", session_root.display()))?;
    let sessions = Arc::new(SessionStore::new(&session_root));

    let shutdown = CancellationToken::new();
    if let Some(ttl) = cli.session_ttl_secs.map(Duration::from_secs) {
        spawn_session_janitor(Arc::clone(&sessions), ttl, shutdown.child_token());
    }

    let state = AppState::new(processor, sessions).with_max_extracted_bytes(cli.max_extracted_bytes);
    let router = server::build_router(state, &CliConfigBuilder::router_settings(&cli));

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        %addr,
        session_root = %session_root.display(),
        max_body_bytes = cli.max_body_bytes,
        "server ready"
    );

    let signal_token = shutdown.clone();
    server::serve(listener, router, async move {
        shutdown_signal().await;
        signal_token.cancel();
    })
    .await
    .context("Server error")?;

    info!("server stopped");
    Ok(())
}

fn spawn_session_janitor(sessions: Arc<SessionStore>, ttl: Duration, stop: CancellationToken) {
    let period = ttl.min(Duration::from_secs(60)).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => {
                    sessions.purge_expired(ttl).await;
                },
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received terminate signal"),
    }
}
