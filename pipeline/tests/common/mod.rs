#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipeline::config::PipelineConfig;
use pipeline::db::RepositoryError;
use pipeline::detector::{DetectError, Detector, ImageLocator};
use pipeline::orchestration::{ImageDescriptor, ImageSource, Imageset, ResultSink, StatusStore};
use pipeline::storage::{PersistError, S3ServiceError};
use shared::{
    Category, Detection, DetectionResult, ImageId, ImageResult, ImagesetId, ImagesetStatus,
};

pub const IMAGESET: ImagesetId = ImagesetId(7);

/// Images `img1.jpg ..= imgN.jpg`, except ids in `failing` which are named
/// `fail{id}.jpg` and make [`FakeDetector`] return an error.
pub fn images(count: i64, failing: &[i64]) -> Vec<ImageDescriptor> {
    (1..=count)
        .map(|id| {
            let name = if failing.contains(&id) {
                format!("fail{}.jpg", id)
            } else {
                format!("img{}.jpg", id)
            };
            ImageDescriptor::new(id, ImageLocator::s3("fpe-images", format!("sets/7/{}", name)))
        })
        .collect()
}

pub fn config(worker_count: i64, batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        worker_count,
        batch_size,
        task_timeout_secs: 0,
        s3_bucket: Some("fpe-results".into()),
        ..Default::default()
    }
}

#[derive(Default)]
struct RepositoryState {
    imageset: Option<Imageset>,
    images: Vec<ImageDescriptor>,
    fail_images: bool,
    status_calls: Vec<ImagesetStatus>,
    max_images_seen: Vec<Option<i64>>,
}

/// In-memory `imagesets` and `images` tables. Clones share state.
#[derive(Clone, Default)]
pub struct FakeRepository {
    state: Arc<Mutex<RepositoryState>>,
}

impl FakeRepository {
    pub fn with_images(status: ImagesetStatus, images: Vec<ImageDescriptor>) -> Self {
        let repository = Self::default();
        {
            let mut state = repository.state.lock().unwrap();
            state.imageset = Some(Imageset {
                id: IMAGESET,
                uuid: "5f0c2d8e-4b7a-4c1e-9a53-2f6a8d1b9e40".into(),
                status,
            });
            state.images = images;
        }
        repository
    }

    pub fn fail_image_fetch(&self) {
        self.state.lock().unwrap().fail_images = true;
    }

    pub fn status_calls(&self) -> Vec<ImagesetStatus> {
        self.state.lock().unwrap().status_calls.clone()
    }

    pub fn stored_status(&self) -> Option<ImagesetStatus> {
        self.state.lock().unwrap().imageset.as_ref().map(|i| i.status)
    }

    pub fn max_images_seen(&self) -> Vec<Option<i64>> {
        self.state.lock().unwrap().max_images_seen.clone()
    }
}

impl ImageSource for FakeRepository {
    async fn fetch_imageset(&self, imageset_id: ImagesetId) -> Result<Option<Imageset>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state.imageset.clone().filter(|i| i.id == imageset_id))
    }

    async fn fetch_images(
        &self,
        _imageset_id: ImagesetId,
        max_images: Option<i64>,
    ) -> Result<Vec<ImageDescriptor>, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.max_images_seen.push(max_images);
        if state.fail_images {
            return Err(RepositoryError::InvalidData("connection reset by peer".into()));
        }
        let limit = max_images.map(|n| n as usize).unwrap_or(usize::MAX);
        Ok(state.images.iter().take(limit).cloned().collect())
    }
}

impl StatusStore for FakeRepository {
    async fn set_status(&self, _imageset_id: ImagesetId, status: ImagesetStatus) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.status_calls.push(status);
        if let Some(imageset) = state.imageset.as_mut() {
            imageset.status = status;
        }
        Ok(())
    }
}

#[derive(Default)]
struct SinkState {
    rows: HashMap<ImageId, DetectionResult>,
    payloads: Vec<Vec<ImageResult>>,
    fail: bool,
}

/// Upserts successful results by image id, like the `images` row update.
#[derive(Clone, Default)]
pub struct FakeSink {
    state: Arc<Mutex<SinkState>>,
}

impl FakeSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.state.lock().unwrap().fail = true;
        sink
    }

    pub fn persist_calls(&self) -> usize {
        self.state.lock().unwrap().payloads.len()
    }

    pub fn rows(&self) -> HashMap<ImageId, DetectionResult> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn last_payload(&self) -> Option<Vec<ImageResult>> {
        self.state.lock().unwrap().payloads.last().cloned()
    }
}

impl ResultSink for FakeSink {
    async fn persist(&self, _imageset: &Imageset, results: &[ImageResult]) -> Result<(), PersistError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(PersistError::ObjectStore(S3ServiceError::S3("access denied".into())));
        }
        state.payloads.push(results.to_vec());
        for result in results {
            if let Some(detections) = result.outcome.result() {
                state.rows.insert(result.image_id, detections.clone());
            }
        }
        Ok(())
    }
}

/// Detector keyed on the file name: `fail*` files error, everything else
/// yields one person detection. Higher-numbered files finish first.
#[derive(Clone, Default)]
pub struct FakeDetector {
    calls: Arc<AtomicUsize>,
}

impl FakeDetector {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for FakeDetector {
    async fn detect(&self, locator: &ImageLocator, min_confidence: f32) -> Result<DetectionResult, DetectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = locator.file_name();
        let number: u64 = name
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .trim_end_matches(".jpg")
            .parse()
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(1000u64.saturating_sub(number * 10))).await;

        if name.starts_with("fail") {
            return Err(DetectError::Inference(format!("corrupt image {}", name)));
        }
        let confidence = 0.5 + number as f32 / 100.0;
        let detections = if confidence >= min_confidence {
            vec![Detection {
                category: Category::Person,
                confidence,
                bbox: [0, 0, 10, 10],
            }]
        } else {
            Vec::new()
        };
        Ok(DetectionResult::from_detections(detections))
    }
}

pub fn result_ids(results: &[ImageResult]) -> Vec<i64> {
    results.iter().map(|r| r.image_id.0).collect()
}
