//! Stateless image services used by the single-item pipeline
//!
//! - Format gate: extension allow-list checks
//! - Codec adapter: decode any supported encoding, encode PNG
//! - Resize transform: fixed canvas with aspect preservation

pub mod codec;
pub mod format;
pub mod resize;

pub use codec::{ImageCodec, PNG_DATA_URI_PREFIX};
pub use format::{FormatGate, SUPPORTED_FORMATS};
pub use resize::ResizeTransform;
