use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use shared::{DetectionOutcome, FailureKind, ImageId, ImageResult};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ImageDescriptor;
use crate::detector::{Detector, ImageLocator};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskSettings {
    pub min_confidence: f32,
    /// Limit on a single detection, counted from when it gets a worker slot.
    pub timeout: Option<Duration>,
}

/// A submitted detection. Redeem it with [`WorkerPool::drain`].
pub struct TaskHandle {
    image_id: ImageId,
    file: String,
    join: JoinHandle<ImageResult>,
}

impl TaskHandle {
    pub fn image_id(&self) -> ImageId {
        self.image_id
    }
}

/// Runs detections on tokio tasks with at most `workers` in flight.
///
/// Every submitted image resolves to exactly one [`ImageResult`]: detector
/// errors, timeouts, panics and cancellation all become failure outcomes for
/// that image and never reach sibling tasks.
pub struct WorkerPool<D> {
    detector: Arc<D>,
    permits: Arc<Semaphore>,
    workers: usize,
    settings: TaskSettings,
    cancel: CancellationToken,
}

impl<D: Detector> WorkerPool<D> {
    pub fn new(detector: Arc<D>, workers: usize, settings: TaskSettings) -> Self {
        let workers = workers.max(1);
        Self {
            detector,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Cancelling resolves every outstanding task as `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn submit(&self, image: ImageDescriptor) -> TaskHandle {
        let detector = Arc::clone(&self.detector);
        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.clone();
        let settings = self.settings;
        let image_id = image.id;
        let file = image.file_name();

        let task_file = file.clone();
        let join = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => cancelled(),
                outcome = async {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return cancelled(),
                    };
                    detect_with_timeout(detector.as_ref(), &image.locator, settings).await
                } => outcome,
            };
            ImageResult {
                image_id,
                file: task_file,
                outcome,
            }
        });

        TaskHandle {
            image_id,
            file,
            join,
        }
    }

    /// Waits for every handle and returns the results in completion order.
    pub async fn drain(&self, handles: Vec<TaskHandle>) -> Vec<ImageResult> {
        let mut pending: FuturesUnordered<_> = handles.into_iter().map(join_task).collect();
        let mut results = Vec::with_capacity(pending.len());

        while let Some(result) = pending.next().await {
            match &result.outcome {
                DetectionOutcome::Success(detections) => debug!(
                    "Detection results (image_id={}, file={}): {} detections",
                    result.image_id,
                    result.file,
                    detections.detections.len()
                ),
                DetectionOutcome::Failure { kind, error } => warn!(
                    "Detection failed (image_id={}, file={}, kind={:?}): {}",
                    result.image_id, result.file, kind, error
                ),
            }
            results.push(result);
        }

        results
    }
}

async fn join_task(handle: TaskHandle) -> ImageResult {
    let TaskHandle {
        image_id,
        file,
        join,
    } = handle;

    match join.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => ImageResult {
            image_id,
            file,
            outcome: DetectionOutcome::failure(
                FailureKind::Panicked,
                format!("detection task panicked: {}", panic_message(e.into_panic())),
            ),
        },
        Err(e) => ImageResult {
            image_id,
            file,
            outcome: DetectionOutcome::failure(FailureKind::Cancelled, e.to_string()),
        },
    }
}

pub(crate) async fn detect_with_timeout<D: Detector>(
    detector: &D,
    locator: &ImageLocator,
    settings: TaskSettings,
) -> DetectionOutcome {
    let attempt = detector.detect(locator, settings.min_confidence);
    let result = match settings.timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                return DetectionOutcome::failure(
                    FailureKind::Timeout,
                    format!("detection timed out after {:?}", limit),
                );
            }
        },
        None => attempt.await,
    };

    match result {
        Ok(detections) => DetectionOutcome::Success(detections),
        Err(e) => DetectionOutcome::failure(FailureKind::Error, e.to_string()),
    }
}

fn cancelled() -> DetectionOutcome {
    DetectionOutcome::failure(FailureKind::Cancelled, "detection cancelled")
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectError;
    use shared::DetectionResult;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedDetector {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Detector for ScriptedDetector {
        fn detect(
            &self,
            locator: &ImageLocator,
            _min_confidence: f32,
        ) -> impl Future<Output = Result<DetectionResult, DetectError>> + Send {
            let name = locator.file_name();
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                let delay = if name.starts_with("hang") { 3600 } else { 10 };
                tokio::time::sleep(Duration::from_millis(delay * 1000)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                match name.as_str() {
                    n if n.starts_with("bad") => Err(DetectError::Inference("corrupt tensor".into())),
                    n if n.starts_with("boom") => panic!("model exploded"),
                    _ => Ok(DetectionResult::default()),
                }
            }
        }
    }

    fn image(id: i64, name: &str) -> ImageDescriptor {
        ImageDescriptor::new(id, ImageLocator::Local(name.into()))
    }

    fn settings(timeout_secs: Option<u64>) -> TaskSettings {
        TaskSettings {
            min_confidence: 0.1,
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }

    fn outcome_for(results: &[ImageResult], id: i64) -> &DetectionOutcome {
        &results.iter().find(|r| r.image_id == ImageId(id)).unwrap().outcome
    }

    #[tokio::test(start_paused = true)]
    async fn failures_stay_with_their_image() {
        let detector = Arc::new(ScriptedDetector::default());
        let pool = WorkerPool::new(detector.clone(), 3, settings(None));

        let handles = vec![
            pool.submit(image(1, "a.jpg")),
            pool.submit(image(2, "bad.jpg")),
            pool.submit(image(3, "boom.jpg")),
            pool.submit(image(4, "d.jpg")),
        ];
        let results = pool.drain(handles).await;

        assert_eq!(results.len(), 4);
        assert!(outcome_for(&results, 1).is_success());
        assert_eq!(outcome_for(&results, 2).failure_kind(), Some(FailureKind::Error));
        assert_eq!(outcome_for(&results, 3).failure_kind(), Some(FailureKind::Panicked));
        assert!(outcome_for(&results, 4).is_success());
        assert_eq!(results.iter().find(|r| r.image_id == ImageId(2)).unwrap().file, "bad.jpg");
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_never_exceeds_worker_count() {
        let detector = Arc::new(ScriptedDetector::default());
        let pool = WorkerPool::new(detector.clone(), 2, settings(None));

        let handles = (0..7).map(|i| pool.submit(image(i, "img.jpg"))).collect();
        let results = pool.drain(handles).await;

        assert_eq!(results.len(), 7);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 7);
        assert_eq!(detector.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_detection_times_out() {
        let detector = Arc::new(ScriptedDetector::default());
        let pool = WorkerPool::new(detector, 2, settings(Some(30)));

        let handles = vec![pool.submit(image(1, "hang.jpg")), pool.submit(image(2, "ok.jpg"))];
        let results = pool.drain(handles).await;

        assert_eq!(outcome_for(&results, 1).failure_kind(), Some(FailureKind::Timeout));
        assert!(outcome_for(&results, 2).is_success());
        // the quick image finishes first
        assert_eq!(results[0].image_id, ImageId(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_resolves_outstanding_tasks() {
        let detector = Arc::new(ScriptedDetector::default());
        let pool = WorkerPool::new(detector, 1, settings(None));

        let handles = vec![
            pool.submit(image(1, "hang-1.jpg")),
            pool.submit(image(2, "hang-2.jpg")),
        ];
        pool.cancel();
        let results = pool.drain(handles).await;

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.outcome.failure_kind(), Some(FailureKind::Cancelled));
        }
    }
}
