//! Tract backend implementation for segmentation models
//!
//! Tract is a pure Rust ONNX runtime: no native libraries, slower than ONNX
//! Runtime but portable everywhere the crate builds.

use crate::error::{ProcessingError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelManager, PreprocessingConfig};
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend for running segmentation models using pure Rust inference
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: ModelManager,
}

impl TractBackend {
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager,
        }
    }

    fn load_model(&mut self) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_manager.load_model()?;

        log::info!(
            "Initializing Tract backend with {}",
            self.model_manager.model_path().display()
        );

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| ProcessingError::model(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| ProcessingError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                ProcessingError::model(format!("Failed to create runnable model: {e}"))
            })?;

        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    #[allow(clippy::get_first)]
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ProcessingError::segmentation("Tract model not initialized"))?;

        log::debug!("Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| ProcessingError::segmentation(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ProcessingError::segmentation("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            ProcessingError::segmentation(format!("Failed to convert output tensor: {e}"))
        })?;

        let output_shape = output_data.shape();
        if output_shape.len() != 4 {
            return Err(ProcessingError::segmentation(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        }

        let output_array = Array4::from_shape_vec(
            (
                output_shape.get(0).copied().unwrap_or(1),
                output_shape.get(1).copied().unwrap_or(1),
                output_shape.get(2).copied().unwrap_or(1),
                output_shape.get(3).copied().unwrap_or(1),
            ),
            output_data.to_owned().into_raw_vec_and_offset().0,
        )
        .map_err(|e| {
            ProcessingError::segmentation(format!("Failed to reshape output tensor: {e}"))
        })?;

        log::debug!(
            "Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(output_array)
    }

    fn preprocessing_config(&self) -> &PreprocessingConfig {
        self.model_manager.get_preprocessing_config()
    }

    fn name(&self) -> &'static str {
        "tract"
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }
}

#[cfg(all(test, feature = "tract"))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend_for(path: &std::path::Path) -> TractBackend {
        TractBackend::with_model_manager(ModelManager::from_path(
            path,
            PreprocessingConfig::default(),
        ))
    }

    #[test]
    fn test_tract_backend_starts_uninitialized() {
        let backend = backend_for(std::path::Path::new("/nonexistent/model.onnx"));
        assert!(!backend.is_initialized());
        assert_eq!(backend.name(), "tract");
        assert_eq!(backend.preprocessing_config().target_size, 1024);
    }

    #[test]
    fn test_tract_backend_infer_requires_initialization() {
        let backend = backend_for(std::path::Path::new("/nonexistent/model.onnx"));
        let input = Array4::<f32>::zeros((1, 3, 8, 8));
        let err = backend.infer(&input).unwrap_err();
        assert!(matches!(err, ProcessingError::Segmentation(_)));
    }

    #[test]
    fn test_tract_backend_rejects_invalid_model() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("garbage.onnx");
        std::fs::write(&path, b"not an onnx graph").unwrap();

        let mut backend = backend_for(&path);
        let err = backend.initialize().unwrap_err();
        assert!(matches!(err, ProcessingError::Model(_)));
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_tract_backend_missing_file() {
        let mut backend = backend_for(std::path::Path::new("/nonexistent/model.onnx"));
        assert!(backend.initialize().is_err());
    }
}
