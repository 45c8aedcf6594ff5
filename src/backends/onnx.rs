//! ONNX Runtime backend implementation for segmentation models
//!
//! Uses the CPU execution provider with full graph optimization. A session
//! runs one inference at a time, so the backend keeps a small pool of
//! sessions built from the same model bytes and hands a free one to each
//! caller.

use crate::error::{ProcessingError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelManager, PreprocessingConfig};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::{self, value::Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

/// ONNX Runtime backend for running segmentation models
#[derive(Debug)]
pub struct OnnxBackend {
    sessions: Vec<Mutex<Session>>,
    next_session: AtomicUsize,
    model_manager: ModelManager,
    intra_threads: usize,
    pool_size: usize,
}

impl OnnxBackend {
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            sessions: Vec::new(),
            next_session: AtomicUsize::new(0),
            model_manager,
            intra_threads: 0,
            pool_size: 1,
        }
    }

    /// Number of sessions that can run inference at the same time
    #[must_use]
    pub fn with_sessions(mut self, sessions: usize) -> Self {
        self.pool_size = sessions.max(1);
        self
    }

    /// Threads used within one operator per session (0 = cores split
    /// across the session pool)
    #[must_use]
    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self
    }

    fn load_model(&mut self) -> Result<std::time::Duration> {
        let model_load_start = std::time::Instant::now();
        let model_data = self.model_manager.load_model()?;

        let intra_threads = if self.intra_threads > 0 {
            self.intra_threads
        } else {
            let cores = std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(4);
            (cores / self.pool_size).max(1)
        };

        let sessions = (0..self.pool_size)
            .map(|_| Self::build_session(&model_data, intra_threads).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "ONNX Runtime pool created: {} sessions, {} intra-op threads each, optimization Level3",
            sessions.len(),
            intra_threads
        );

        self.sessions = sessions;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "ONNX backend initialized in {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }

    fn build_session(model_data: &[u8], intra_threads: usize) -> Result<Session> {
        Session::builder()
            .map_err(|e| ProcessingError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                ProcessingError::model(format!("Failed to set optimization level: {e}"))
            })?
            .with_intra_threads(intra_threads)
            .map_err(|e| ProcessingError::model(format!("Failed to set intra threads: {e}")))?
            .commit_from_memory(model_data)
            .map_err(|e| {
                ProcessingError::model(format!("Failed to create session from model data: {e}"))
            })
    }

    /// First idle session, or a wait on one chosen round-robin when all are busy
    fn acquire_session(&self) -> Result<MutexGuard<'_, Session>> {
        if self.sessions.is_empty() {
            return Err(ProcessingError::segmentation("ONNX session not initialized"));
        }
        let poisoned = || ProcessingError::segmentation("ONNX session lock poisoned");

        let start = self.next_session.fetch_add(1, Ordering::Relaxed);
        let count = self.sessions.len();
        for offset in 0..count {
            let Some(slot) = self.sessions.get((start + offset) % count) else {
                continue;
            };
            match slot.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => {},
                Err(TryLockError::Poisoned(_)) => return Err(poisoned()),
            }
        }

        self.sessions
            .get(start % count)
            .ok_or_else(|| ProcessingError::segmentation("ONNX session not initialized"))?
            .lock()
            .map_err(|_| poisoned())
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self) -> Result<Option<std::time::Duration>> {
        if !self.sessions.is_empty() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let mut session = self.acquire_session()?;

        let inference_start = std::time::Instant::now();
        log::debug!("Starting ONNX inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            ProcessingError::segmentation(format!("Failed to convert input tensor: {e}"))
        })?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| ProcessingError::segmentation(format!("ONNX inference failed: {e}")))?;

        // Positional access to the first output
        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| ProcessingError::segmentation("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| ProcessingError::segmentation("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    ProcessingError::segmentation(format!("Failed to extract output tensor: {e}"))
                })?
        };

        let output_shape = output_tensor.shape().to_vec();
        if output_shape.len() != 4 {
            return Err(ProcessingError::segmentation(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        }

        let output_array = Array4::from_shape_vec(
            (
                output_shape.first().copied().unwrap_or(1),
                output_shape.get(1).copied().unwrap_or(1),
                output_shape.get(2).copied().unwrap_or(1),
                output_shape.get(3).copied().unwrap_or(1),
            ),
            output_tensor.view().to_owned().into_raw_vec_and_offset().0,
        )
        .map_err(|e| {
            ProcessingError::segmentation(format!("Failed to reshape output tensor: {e}"))
        })?;

        log::debug!(
            "ONNX inference completed in {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(output_array)
    }

    fn preprocessing_config(&self) -> &PreprocessingConfig {
        self.model_manager.get_preprocessing_config()
    }

    fn name(&self) -> &'static str {
        "onnx"
    }

    fn is_initialized(&self) -> bool {
        !self.sessions.is_empty()
    }
}
