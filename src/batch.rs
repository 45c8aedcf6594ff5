//! Fan-out coordinator for batches of images
//!
//! Every batch gets its own pool of `workers` slots, so concurrent requests
//! never wait on each other's slots. Items run on the blocking thread pool
//! with at most `workers` of one batch in flight. Each item is bounded by
//! `item_timeout`; on timeout its cancellation token fires and a timeout
//! failure is recorded. A pipeline call that is already inside a library
//! routine (decode, inference, encode) cannot be interrupted: it keeps
//! running as orphaned work and keeps its batch's slot until it returns.

use crate::{
    config::ProcessingOptions,
    error::{ProcessingError, Result},
    pipeline::{round1, ImageItem, ItemPipeline, ItemResult},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Aggregate counts derived from a batch of results
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage of successful items, one decimal, 0 for an empty batch
    pub success_rate: f64,
}

impl BatchSummary {
    #[must_use]
    pub fn from_results(results: &[ItemResult]) -> Self {
        let total = results.len();
        let successful = results.iter().filter(|r| r.is_success()).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            round1(successful as f64 / total as f64 * 100.0)
        };

        Self {
            total,
            successful,
            failed: total - successful,
            success_rate,
        }
    }
}

/// Results of one batch in completion order, plus their summary
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: Vec<ItemResult>,
    pub summary: BatchSummary,
}

impl BatchResult {
    #[must_use]
    pub fn new(results: Vec<ItemResult>) -> Self {
        let summary = BatchSummary::from_results(&results);
        Self { results, summary }
    }
}

/// Runs the single-item pipeline over many items with bounded parallelism
#[derive(Clone)]
pub struct BatchProcessor {
    pipeline: ItemPipeline,
}

impl BatchProcessor {
    #[must_use]
    pub fn new(pipeline: ItemPipeline) -> Self {
        Self { pipeline }
    }

    #[must_use]
    pub fn pipeline(&self) -> &ItemPipeline {
        &self.pipeline
    }

    /// Process a batch; see [`Self::process_batch_with_cancel`]
    ///
    /// # Errors
    /// Returns `ProcessingError::Validation` for out-of-range options.
    pub async fn process_batch(
        &self,
        items: Vec<ImageItem>,
        options: ProcessingOptions,
    ) -> Result<BatchResult> {
        self.process_batch_with_cancel(items, options, CancellationToken::new())
            .await
    }

    /// Process a batch under a parent cancellation token
    ///
    /// Options are validated before any item is touched. Every input yields
    /// exactly one result. Dropping the returned future cancels the tokens
    /// of all items still running.
    ///
    /// # Errors
    /// Returns `ProcessingError::Validation` for out-of-range options.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn process_batch_with_cancel(
        &self,
        items: Vec<ImageItem>,
        options: ProcessingOptions,
        cancel: CancellationToken,
    ) -> Result<BatchResult> {
        options.validate()?;
        let cancel = cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let start = instant::Instant::now();

        let results = match items.len() {
            0 => Vec::new(),
            1 => {
                let mut items = items;
                let item = items.pop().ok_or_else(|| ProcessingError::internal("empty batch"))?;
                vec![self.run_single(item, options, cancel).await]
            },
            _ => self.run_pooled(items, options, &cancel).await,
        };

        let batch = BatchResult::new(results);
        info!(
            total = batch.summary.total,
            successful = batch.summary.successful,
            failed = batch.summary.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch complete"
        );
        Ok(batch)
    }

    /// Run one item directly, without pool or timeout
    async fn run_single(
        &self,
        item: ImageItem,
        options: ProcessingOptions,
        cancel: CancellationToken,
    ) -> ItemResult {
        let filename = item.filename.clone();
        let pipeline = self.pipeline.clone();

        match task::spawn_blocking(move || pipeline.process(item, &options, &cancel)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%filename, error = %e, "pipeline worker failed");
                ItemResult::failure(
                    filename,
                    None,
                    &ProcessingError::internal(format!("Worker failed: {e}")),
                )
            },
        }
    }

    async fn run_pooled(
        &self,
        items: Vec<ImageItem>,
        options: ProcessingOptions,
        cancel: &CancellationToken,
    ) -> Vec<ItemResult> {
        let timeout = self.pipeline.config().item_timeout;
        let workers = Arc::new(Semaphore::new(self.pipeline.config().workers.max(1)));
        let filenames: Vec<String> = items.iter().map(|item| item.filename.clone()).collect();
        let mut pending: Vec<bool> = vec![true; items.len()];
        let mut results = Vec::with_capacity(items.len());
        let mut join_set = JoinSet::new();

        for (idx, item) in items.into_iter().enumerate() {
            let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
                break;
            };
            let pipeline = self.pipeline.clone();
            let item_cancel = cancel.child_token();

            join_set.spawn(async move {
                let filename = item.filename.clone();
                let worker_cancel = item_cancel.clone();
                let work = task::spawn_blocking(move || {
                    let _permit = permit;
                    pipeline.process(item, &options, &worker_cancel)
                });

                let result = match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => ItemResult::failure(
                        filename,
                        None,
                        &ProcessingError::internal(format!("Worker failed: {e}")),
                    ),
                    Err(_) => {
                        item_cancel.cancel();
                        warn!(%filename, timeout_secs = timeout.as_secs(), "item timed out");
                        ItemResult::failure(filename, None, &ProcessingError::Timeout(timeout))
                    },
                };
                (idx, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, result)) => {
                    if let Some(slot) = pending.get_mut(idx) {
                        *slot = false;
                    }
                    results.push(result);
                },
                Err(e) => warn!(error = %e, "batch task failed"),
            }
        }

        // Anything that never reported still gets exactly one result
        for (filename, still_pending) in filenames.into_iter().zip(pending) {
            if still_pending {
                results.push(ItemResult::failure(
                    filename,
                    None,
                    &ProcessingError::internal("Item was not processed"),
                ));
            }
        }

        results
    }
}
