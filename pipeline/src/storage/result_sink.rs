use log::{debug, info};
use shared::ImageResult;

use super::s3_service::{S3Service, S3ServiceError};
use crate::db::image_repository::ImageRepository;
use crate::db::RepositoryError;
use crate::orchestration::{Imageset, ResultSink};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Failed to write results to object storage")]
    ObjectStore(#[from] S3ServiceError),
    #[error("Failed to save results to database")]
    Database(#[from] RepositoryError),
}

/// Writes the full result payload to S3, then applies it to the image rows.
/// Both writes must succeed for the run to count as done.
#[derive(Clone)]
pub struct DurableResultSink {
    s3_service: S3Service,
    repository: ImageRepository,
}

impl DurableResultSink {
    pub fn new(s3_service: S3Service, repository: ImageRepository) -> Self {
        Self {
            s3_service,
            repository,
        }
    }
}

impl ResultSink for DurableResultSink {
    async fn persist(&self, imageset: &Imageset, results: &[ImageResult]) -> Result<(), PersistError> {
        let key = S3Service::results_key(&imageset.uuid);
        info!(
            "Saving results to S3 (bucket={}, key={})",
            self.s3_service.results_bucket().unwrap_or("<unset>"),
            key
        );
        let digest = self.s3_service.put_json(&key, results).await?;
        debug!("Results uploaded (key={}, sha256={})", key, digest);

        info!("Saving results to database (imageset_id={})", imageset.id);
        let updated = self.repository.save_results(results).await?;
        info!(
            "Updated {} image rows (imageset_id={}, results={})",
            updated,
            imageset.id,
            results.len()
        );
        Ok(())
    }
}
