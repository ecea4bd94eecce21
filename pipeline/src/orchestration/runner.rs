use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use shared::{ImageResult, ImagesetId, ImagesetStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::scheduler::BatchScheduler;
use super::status::StatusMachine;
use super::{ImageSource, Imageset, ResultSink, StatusStore};
use crate::config::PipelineConfig;
use crate::detector::{DetectError, Detector};
use crate::error::{error_chain, RunError};

/// Summary of a finished imageset run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub imageset_id: ImagesetId,
    pub status: ImagesetStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip)]
    pub results: Vec<ImageResult>,
}

/// Runs PII detection over every image of one imageset: status bookkeeping,
/// batched detection, and the durable handoff of the results.
pub struct ImagesetRunner<S, T, R> {
    source: S,
    status_store: T,
    sink: R,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl<S, T, R> ImagesetRunner<S, T, R>
where
    S: ImageSource,
    T: StatusStore,
    R: ResultSink,
{
    pub fn new(source: S, status_store: T, sink: R, config: PipelineConfig) -> Self {
        Self {
            source,
            status_store,
            sink,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The detector is only loaded once the imageset is known to have images.
    pub async fn run<D, L>(&self, imageset_id: ImagesetId, load_detector: L) -> Result<RunReport, RunError>
    where
        D: Detector,
        L: FnOnce() -> Result<D, DetectError>,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let dry_run = self.config.dry_run;
        if dry_run {
            info!("Dry run, results and status will not be saved (run_id={})", run_id);
        }

        info!("Fetching imageset (imageset_id={})", imageset_id);
        let imageset = self
            .source
            .fetch_imageset(imageset_id)
            .await
            .map_err(RunError::ImageFetch)?
            .ok_or(RunError::NotFound(imageset_id))?;

        // A dry run writes nothing, so it may look at an imageset mid-run.
        let initial = if imageset.status == ImagesetStatus::Processing {
            if !dry_run && !self.config.force {
                return Err(RunError::AlreadyProcessing(imageset_id));
            }
            warn!(
                "Imageset is already PROCESSING, running anyway (imageset_id={})",
                imageset_id
            );
            ImagesetStatus::Pending
        } else {
            imageset.status
        };

        let mut status = StatusMachine::new(&self.status_store, imageset_id, initial, !dry_run);
        status.transition(ImagesetStatus::Processing).await?;

        match self.execute(&imageset, load_detector).await {
            Ok(results) => {
                status.transition(ImagesetStatus::Done).await?;
                let succeeded = results.iter().filter(|r| r.outcome.is_success()).count();
                let report = RunReport {
                    run_id,
                    imageset_id,
                    status: status.current(),
                    total: results.len(),
                    succeeded,
                    failed: results.len() - succeeded,
                    dry_run,
                    started_at,
                    finished_at: Utc::now(),
                    results,
                };
                info!(
                    "Imageset complete (imageset_id={}, images={}, succeeded={}, failed={})",
                    imageset_id, report.total, report.succeeded, report.failed
                );
                Ok(report)
            }
            Err(e) => {
                error!(
                    "Imageset run failed (imageset_id={}): {}",
                    imageset_id,
                    error_chain(&e)
                );
                status.transition(ImagesetStatus::Failed).await?;
                Err(e)
            }
        }
    }

    async fn execute<D, L>(&self, imageset: &Imageset, load_detector: L) -> Result<Vec<ImageResult>, RunError>
    where
        D: Detector,
        L: FnOnce() -> Result<D, DetectError>,
    {
        info!("Fetching images (imageset_id={})", imageset.id);
        let images = self
            .source
            .fetch_images(imageset.id, self.config.image_limit())
            .await
            .map_err(RunError::ImageFetch)?;
        if images.is_empty() {
            return Err(RunError::EmptyInput(imageset.id));
        }

        info!("Loading detector (model_file={})", self.config.model_file);
        let detector = Arc::new(load_detector().map_err(RunError::DetectorLoad)?);

        let scheduler = BatchScheduler::new(self.config.execution_mode(), self.config.task_settings())
            .with_cancellation(self.cancel.clone());
        let results = scheduler.run(&images, detector).await;
        let succeeded = results.iter().filter(|r| r.outcome.is_success()).count();

        // A cancelled run is incomplete, so nothing is handed to the sink.
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled {
                succeeded,
                failed: results.len() - succeeded,
            });
        }

        if self.config.dry_run {
            return Ok(results);
        }

        if let Err(source) = self.sink.persist(imageset, &results).await {
            return Err(RunError::Persistence {
                source,
                succeeded,
                failed: results.len() - succeeded,
            });
        }
        Ok(results)
    }
}
