//! Construction of the segmentation backend selected on the command line

use super::main_impl::CliBackend;
use crate::{
    error::{ProcessingError, Result},
    inference::InferenceBackend,
    models::ModelManager,
    processor::{BackgroundRemover, ModelBackgroundRemover},
};
use std::sync::Arc;

pub(crate) struct BackendFactory;

impl BackendFactory {
    /// Create and initialize the inference backend for `backend`
    ///
    /// `sessions` bounds how many inferences the ONNX backend runs at once;
    /// tract plans are shared directly. Model loading and graph optimization
    /// are blocking and run on the blocking thread pool.
    pub(crate) async fn create_remover(
        backend: CliBackend,
        model_manager: ModelManager,
        threads: usize,
        sessions: usize,
    ) -> Result<Arc<dyn BackgroundRemover>> {
        let inference = Self::create_backend(backend, model_manager, threads, sessions)?;
        let remover = tokio::task::spawn_blocking(move || ModelBackgroundRemover::new(inference))
            .await
            .map_err(|e| ProcessingError::internal(format!("Backend initialization panicked: {e}")))??;
        Ok(Arc::new(remover))
    }

    #[allow(unused_variables)]
    fn create_backend(
        backend: CliBackend,
        model_manager: ModelManager,
        threads: usize,
        sessions: usize,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend {
            #[cfg(feature = "tract")]
            CliBackend::Tract => Ok(Box::new(crate::backends::TractBackend::with_model_manager(
                model_manager,
            ))),
            #[cfg(feature = "onnx")]
            CliBackend::Onnx => Ok(Box::new(
                crate::backends::OnnxBackend::with_model_manager(model_manager)
                    .with_intra_threads(threads)
                    .with_sessions(sessions),
            )),
            CliBackend::None => Err(ProcessingError::model("No segmentation backend selected")),
            #[allow(unreachable_patterns)]
            other => Err(ProcessingError::model(format!(
                "Backend {other:?} is not compiled in; rebuild with the matching feature"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PreprocessingConfig;

    #[test]
    fn test_none_backend_rejected() {
        let manager = ModelManager::from_path("missing.onnx", PreprocessingConfig::default());
        assert!(BackendFactory::create_backend(CliBackend::None, manager, 0, 1).is_err());
    }

    #[cfg(feature = "tract")]
    #[tokio::test]
    async fn test_missing_model_fails_initialization() {
        let manager = ModelManager::from_path("/nonexistent/model.onnx", PreprocessingConfig::default());
        assert!(BackendFactory::create_remover(CliBackend::Tract, manager, 0, 1)
            .await
            .is_err());
    }
}
