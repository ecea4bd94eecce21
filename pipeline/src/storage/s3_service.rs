use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use hex;
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    results_bucket: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum S3ServiceError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("Failed to serialize results")]
    Serialization(#[from] serde_json::Error),
    #[error("No results bucket configured")]
    NoBucket,
}

impl S3Service {
    pub fn new(client: Client, results_bucket: Option<String>) -> Self {
        Self {
            client,
            results_bucket,
        }
    }

    pub fn results_bucket(&self) -> Option<&str> {
        self.results_bucket.as_deref()
    }

    pub fn calculate_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    pub fn results_key(imageset_uuid: &str) -> String {
        format!("imagesets/{}/pii.json", imageset_uuid)
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, S3ServiceError> {
        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| S3ServiceError::S3(e.to_string()))?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| S3ServiceError::S3(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }

    /// Writes `value` as JSON into the results bucket and returns the
    /// SHA-256 of the uploaded body.
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<String, S3ServiceError> {
        let bucket = self.results_bucket.as_deref().ok_or(S3ServiceError::NoBucket)?;
        let body = serde_json::to_vec(value)?;
        let digest = S3Service::calculate_hash(&body);

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .metadata("sha256", &digest)
            .send()
            .await
            .map_err(|e| S3ServiceError::S3(e.to_string()))?;

        Ok(digest)
    }
}
