//! Imageset batch orchestration: scheduling detections over a bounded worker
//! pool, tracking the imageset status, and handing the aggregated results to
//! durable storage.

pub mod runner;
pub mod scheduler;
pub mod status;
pub mod worker_pool;

use std::future::Future;

use shared::{ImageId, ImageResult, ImagesetId, ImagesetStatus};

use crate::db::RepositoryError;
use crate::detector::ImageLocator;
use crate::storage::PersistError;

pub use runner::{ImagesetRunner, RunReport};
pub use scheduler::{BatchPlan, BatchScheduler, ExecutionMode};
pub use status::StatusMachine;
pub use worker_pool::{TaskHandle, TaskSettings, WorkerPool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub id: ImageId,
    pub locator: ImageLocator,
}

impl ImageDescriptor {
    pub fn new(id: impl Into<ImageId>, locator: ImageLocator) -> Self {
        Self {
            id: id.into(),
            locator,
        }
    }

    pub fn file_name(&self) -> String {
        self.locator.file_name()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imageset {
    pub id: ImagesetId,
    pub uuid: String,
    pub status: ImagesetStatus,
}

pub trait ImageSource: Send + Sync {
    fn fetch_imageset(
        &self,
        imageset_id: ImagesetId,
    ) -> impl Future<Output = Result<Option<Imageset>, RepositoryError>> + Send;

    /// Images of the imageset in primary key order, capped at `max_images`.
    /// An imageset without images yields an empty list.
    fn fetch_images(
        &self,
        imageset_id: ImagesetId,
        max_images: Option<i64>,
    ) -> impl Future<Output = Result<Vec<ImageDescriptor>, RepositoryError>> + Send;
}

pub trait StatusStore: Send + Sync {
    fn set_status(
        &self,
        imageset_id: ImagesetId,
        status: ImagesetStatus,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

pub trait ResultSink: Send + Sync {
    fn persist(
        &self,
        imageset: &Imageset,
        results: &[ImageResult],
    ) -> impl Future<Output = Result<(), PersistError>> + Send;
}
