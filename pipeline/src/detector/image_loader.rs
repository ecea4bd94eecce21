use image::RgbImage;

use super::{DetectError, ImageLocator};
use crate::storage::s3_service::S3Service;

/// Fetches raw image bytes from S3 or the local filesystem.
#[derive(Clone, Default)]
pub struct ImageLoader {
    s3: Option<S3Service>,
}

impl ImageLoader {
    pub fn new(s3: Option<S3Service>) -> Self {
        Self { s3 }
    }

    pub async fn read_bytes(&self, locator: &ImageLocator) -> Result<Vec<u8>, DetectError> {
        let read_error = |reason: String| DetectError::Read {
            locator: locator.to_string(),
            reason,
        };

        match locator {
            ImageLocator::S3 { bucket, key } => {
                let s3 = self
                    .s3
                    .as_ref()
                    .ok_or_else(|| read_error("no S3 client configured".to_string()))?;
                s3.get_object(bucket, key)
                    .await
                    .map_err(|e| read_error(e.to_string()))
            }
            ImageLocator::Local(path) => tokio::fs::read(path)
                .await
                .map_err(|e| read_error(e.to_string())),
        }
    }
}

pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, DetectError> {
    let image = image::load_from_memory(bytes).map_err(DetectError::Decode)?;
    Ok(image.to_rgb8())
}
