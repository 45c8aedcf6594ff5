#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Image Processor
//!
//! Batch image processing behind an HTTP API: optional background removal
//! with an ONNX segmentation model, optional resize onto a fixed transparent
//! canvas, and PNG re-encoding. Results come back inline as JSON, as a ZIP
//! download, or through an upload / process / download session.
//!
//! ## Features
//!
//! - **Format gate**: extension allow-list checked before any decoding
//! - **Single-item pipeline**: `Validate -> Decode -> [RemoveBackground] ->
//!   [Resize] -> Encode`, failures become per-item results
//! - **Fan-out**: bounded worker pool with a per-item timeout and
//!   cancellation
//! - **Backends**: Tract (pure Rust, default) and ONNX Runtime
//! - **Archives**: ZIP packing with a configurable duplicate-name policy and
//!   ZIP upload extraction
//! - **Sessions**: UUID-keyed upload/output directories with optional expiry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use image_processor::{
//!     BatchProcessor, ImageItem, ItemPipeline, ProcessingOptions, ProcessorConfig,
//! };
//!
//! # async fn example(png: Vec<u8>) -> image_processor::Result<()> {
//! let config = ProcessorConfig::builder().workers(4).build()?;
//! let processor = BatchProcessor::new(ItemPipeline::new(config, None));
//!
//! let options = ProcessingOptions {
//!     resize: true,
//!     width: 800,
//!     height: 600,
//!     ..ProcessingOptions::default()
//! };
//! let batch = processor
//!     .process_batch(vec![ImageItem::from_bytes("photo.png", png)], options)
//!     .await?;
//! println!("{} of {} succeeded", batch.summary.successful, batch.summary.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `tract` (default): pure Rust segmentation backend
//! - `onnx`: ONNX Runtime segmentation backend
//! - `server` (default): HTTP API, command line and subscriber setup
//! - `tracing-json`: JSON log output
//!
//! Library-only usage:
//!
//! ```toml
//! [dependencies]
//! image-processor = { version = "0.1", default-features = false, features = ["tract"] }
//! ```

pub mod archive;
pub mod backends;
pub mod batch;
pub mod cache;
#[cfg(feature = "server")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod processor;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
pub mod session;
#[cfg(feature = "server")]
pub mod tracing_config;
pub mod utils;

// Public API exports
pub use archive::{png_name, sanitize_filename, ArchivePacker, EntryNamer};
pub use backends::*;
pub use batch::{BatchProcessor, BatchResult, BatchSummary};
pub use cache::{format_size, ModelCache};
pub use config::{
    ArchiveNaming, ProcessingOptions, ProcessorConfig, ProcessorConfigBuilder, ResizeMode,
};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{FailureKind, ProcessingError, Result};
pub use inference::InferenceBackend;
pub use models::{ModelManager, ModelSource, ModelSpec, PreprocessingConfig};
pub use pipeline::{
    ImageData, ImageItem, ItemFailure, ItemPipeline, ItemResult, ItemSuccess, OperationsApplied,
    PipelineStage,
};
pub use processor::{BackgroundRemover, ModelBackgroundRemover, SegmentationMask};
pub use services::{FormatGate, ImageCodec, ResizeTransform, SUPPORTED_FORMATS};
pub use session::{SessionInfo, SessionState, SessionStore, StoredFile};
pub use utils::{ImagePreprocessor, Letterbox};

#[cfg(feature = "server")]
pub use tracing_config::{TracingConfig, TracingFormat};
