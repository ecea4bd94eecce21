use shared::ImagesetId;

use crate::db::RepositoryError;
use crate::detector::DetectError;
use crate::orchestration::status::InvalidTransition;
use crate::storage::PersistError;

/// Fatal errors that end an imageset run. Per-image detection failures are
/// not here: they are recorded as failure outcomes and the run continues.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Imageset not found (imageset_id={0})")]
    NotFound(ImagesetId),
    #[error("Imageset is already being processed (imageset_id={0}), use --force to take it over")]
    AlreadyProcessing(ImagesetId),
    #[error("No images found for imageset (imageset_id={0})")]
    EmptyInput(ImagesetId),
    #[error("Failed to fetch imageset data")]
    ImageFetch(#[source] RepositoryError),
    #[error("Failed to load detector")]
    DetectorLoad(#[source] DetectError),
    #[error("Failed to persist results ({succeeded} images processed, {failed} failed)")]
    Persistence {
        #[source]
        source: PersistError,
        succeeded: usize,
        failed: usize,
    },
    #[error("Run cancelled ({succeeded} images processed, {failed} not completed)")]
    Cancelled { succeeded: usize, failed: usize },
    #[error(transparent)]
    Status(#[from] InvalidTransition),
}

impl RunError {
    /// Images that were detected successfully before the run failed.
    pub fn images_processed(&self) -> usize {
        match self {
            RunError::Persistence { succeeded, .. } | RunError::Cancelled { succeeded, .. } => {
                *succeeded
            }
            _ => 0,
        }
    }
}

/// Renders an error and its `source()` chain on one line.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
