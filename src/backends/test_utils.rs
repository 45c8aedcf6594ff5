//! Mock inference backend for unit tests
//!
//! `MockBackend` needs no model file. It marks a tensor pixel as foreground
//! when the red channel of the normalized input is darker than near-white,
//! so a white-padded dark subject produces a predictable mask.

use crate::{
    error::{ProcessingError, Result},
    inference::InferenceBackend,
    models::PreprocessingConfig,
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Normalized red value at or above which a pixel counts as background
const BACKGROUND_THRESHOLD: f32 = 0.45;

#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    preprocessing_config: PreprocessingConfig,
    inference_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    delay: Option<Duration>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            preprocessing_config: PreprocessingConfig {
                target_size: 32,
                ..PreprocessingConfig::default()
            },
            inference_calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            delay: None,
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    #[must_use]
    pub fn new_failing_init() -> Self {
        Self {
            should_fail_init: true,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn new_failing_inference() -> Self {
        Self {
            should_fail_inference: true,
            ..Self::new()
        }
    }

    /// Make every `infer` call block for `delay`
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Highest number of `infer` calls observed running at once
    #[must_use]
    pub fn peak_concurrency(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak_in_flight)
    }

    /// Shared counter of `infer` calls, readable after the backend is moved
    #[must_use]
    pub fn inference_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.inference_calls)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.should_fail_init {
            return Err(ProcessingError::model("Mock initialization failure"));
        }
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(ProcessingError::segmentation("Mock backend not initialized"));
        }
        self.inference_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.should_fail_inference {
            return Err(ProcessingError::segmentation("Mock inference failure"));
        }

        let (batch, _, height, width) = input.dim();
        let mut output = Array4::<f32>::zeros((batch, 1, height, width));
        for ((n, _, y, x), value) in output.indexed_iter_mut() {
            let red = input.get([n, 0, y, x]).copied().unwrap_or(1.0);
            *value = if red < BACKGROUND_THRESHOLD { 1.0 } else { 0.0 };
        }
        Ok(output)
    }

    fn preprocessing_config(&self) -> &PreprocessingConfig {
        &self.preprocessing_config
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_lifecycle() {
        let mut backend = MockBackend::new();
        assert!(!backend.is_initialized());
        assert!(backend.initialize().unwrap().is_some());
        assert!(backend.initialize().unwrap().is_none());
        assert!(backend.is_initialized());
    }

    #[test]
    fn test_mock_backend_thresholds_red_channel() {
        let mut backend = MockBackend::new();
        backend.initialize().unwrap();

        let mut input = Array4::<f32>::from_elem((1, 3, 2, 2), 0.5);
        input[[0, 0, 1, 1]] = -0.5;
        let output = backend.infer(&input).unwrap();

        assert_eq!(output.dim(), (1, 1, 2, 2));
        assert_eq!(output[[0, 0, 0, 0]], 0.0);
        assert_eq!(output[[0, 0, 1, 1]], 1.0);
        assert_eq!(backend.inference_counter().load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mock_backend_failures() {
        assert!(MockBackend::new_failing_init().initialize().is_err());

        let mut backend = MockBackend::new_failing_inference();
        backend.initialize().unwrap();
        let input = Array4::<f32>::zeros((1, 3, 2, 2));
        assert!(backend.infer(&input).is_err());
    }
}
