use std::sync::Arc;

use log::{debug, info};
use shared::ImageResult;
use tokio_util::sync::CancellationToken;

use super::worker_pool::{TaskSettings, WorkerPool};
use super::ImageDescriptor;
use crate::detector::Detector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One image at a time, in source order.
    Sequential,
    Parallel { workers: usize, batch_size: usize },
}

impl ExecutionMode {
    /// `worker_count <= 0` selects sequential mode.
    pub fn new(worker_count: i64, batch_size: usize) -> Self {
        if worker_count <= 0 {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Parallel {
                workers: worker_count as usize,
                batch_size: batch_size.max(1),
            }
        }
    }

    pub fn plan(&self, total: usize) -> BatchPlan {
        if total == 0 {
            return BatchPlan {
                workers: 0,
                batch_size: 0,
                batches: 0,
            };
        }
        let (workers, batch_size) = match *self {
            ExecutionMode::Sequential => (1, 1),
            ExecutionMode::Parallel {
                workers,
                batch_size,
            } => (workers.min(total), batch_size.min(total)),
        };
        BatchPlan {
            workers,
            batch_size,
            batches: total.div_ceil(batch_size),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub workers: usize,
    pub batch_size: usize,
    pub batches: usize,
}

/// Drives an ordered image list through the worker pool one batch at a time.
/// Batch `i + 1` is only submitted once every task of batch `i` has resolved.
pub struct BatchScheduler {
    mode: ExecutionMode,
    settings: TaskSettings,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(mode: ExecutionMode, settings: TaskSettings) -> Self {
        Self {
            mode,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Returns one result per image, in completion order.
    pub async fn run<D: Detector>(
        &self,
        images: &[ImageDescriptor],
        detector: Arc<D>,
    ) -> Vec<ImageResult> {
        let total = images.len();
        let plan = self.mode.plan(total);
        if plan.batches == 0 {
            return Vec::new();
        }

        match self.mode {
            ExecutionMode::Sequential => info!("Processing {} images sequentially", total),
            ExecutionMode::Parallel { .. } => info!(
                "Processing {} images in {} batches (batch_size={}, workers={})",
                total, plan.batches, plan.batch_size, plan.workers
            ),
        }

        let pool = WorkerPool::new(detector, plan.workers, self.settings)
            .with_cancellation(self.cancel.clone());
        let mut results = Vec::with_capacity(total);
        let mut succeeded = 0;

        for (index, batch) in images.chunks(plan.batch_size).enumerate() {
            let handles = batch.iter().cloned().map(|image| pool.submit(image)).collect();
            let batch_results = pool.drain(handles).await;
            succeeded += batch_results.iter().filter(|r| r.outcome.is_success()).count();
            results.extend(batch_results);

            let failed = results.len() - succeeded;
            match self.mode {
                ExecutionMode::Sequential => debug!(
                    "Detected image [{}/{}] ({} succeeded, {} failed)",
                    results.len(),
                    total,
                    succeeded,
                    failed
                ),
                ExecutionMode::Parallel { .. } => info!(
                    "Batch {}/{} complete [{}/{}] ({} succeeded, {} failed)",
                    index + 1,
                    plan.batches,
                    results.len(),
                    total,
                    succeeded,
                    failed
                ),
            }
        }

        results
    }
}
