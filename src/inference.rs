//! Inference backend abstraction

use crate::{error::Result, models::PreprocessingConfig};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for segmentation inference backends
///
/// Backends take a normalized NCHW tensor of shape `(1, 3, S, S)` and return
/// a single-channel foreground probability map of shape `(1, 1, S, S)`.
///
/// Once initialized, a backend is shared by every worker of a batch and
/// `infer` is called concurrently.
pub trait InferenceBackend: Send + Sync {
    /// Load the model, returning the load time on first initialization
    ///
    /// # Errors
    /// - Model loading or optimization failures
    fn initialize(&mut self) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output tensor is not 4D
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Preprocessing parameters the model was trained with
    fn preprocessing_config(&self) -> &PreprocessingConfig;

    /// Short backend name for logs and the health endpoint
    fn name(&self) -> &'static str;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}
