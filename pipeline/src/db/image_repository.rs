use std::str::FromStr;

use log::{debug, warn};
use serde::Deserialize;
use shared::{Detection, ImageResult, ImagesetId, ImagesetStatus};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use super::RepositoryError;
use crate::detector::ImageLocator;
use crate::orchestration::{ImageDescriptor, ImageSource, Imageset, StatusStore};

const INSERT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, FromRow)]
struct ImagesetRow {
    id: i64,
    uuid: String,
    pii_status: Option<String>,
}

/// `images.full_s3` as written by the upload service.
#[derive(Debug, Clone, Deserialize)]
struct S3Object {
    #[serde(rename = "Bucket")]
    bucket: String,
    #[serde(rename = "Key")]
    key: String,
}

#[derive(Debug, FromRow)]
struct ImageRow {
    id: i64,
    full_s3: Option<Json<S3Object>>,
}

/// One staged row of the result update.
struct PiiRow {
    image_id: i64,
    animal: f64,
    person: f64,
    vehicle: f64,
    detections: Json<Vec<Detection>>,
}

impl PiiRow {
    fn from_result(result: &ImageResult) -> Option<Self> {
        let detection = result.outcome.result()?;
        Some(Self {
            image_id: result.image_id.0,
            animal: f64::from(detection.max_conf.animal),
            person: f64::from(detection.max_conf.person),
            vehicle: f64::from(detection.max_conf.vehicle),
            detections: Json(detection.detections.clone()),
        })
    }
}

#[derive(Clone)]
pub struct ImageRepository {
    pool: PgPool,
}

impl ImageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn fetch_imageset(&self, imageset_id: ImagesetId) -> Result<Option<Imageset>, RepositoryError> {
        let row = sqlx::query_as::<_, ImagesetRow>(
            r#"
            SELECT id::bigint AS id, uuid::text AS uuid, pii_status::text AS pii_status
            FROM imagesets WHERE id = $1
            "#,
        )
        .bind(imageset_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            warn!("No imageset found with (imageset_id={})", imageset_id);
            return Ok(None);
        };

        let status = match row.pii_status.as_deref() {
            None | Some("") => ImagesetStatus::Pending,
            Some(raw) => ImagesetStatus::from_str(raw).map_err(|_| {
                RepositoryError::InvalidData(format!(
                    "unknown pii_status '{}' for imageset {}",
                    raw, row.id
                ))
            })?,
        };

        Ok(Some(Imageset {
            id: ImagesetId(row.id),
            uuid: row.uuid,
            status,
        }))
    }

    pub async fn fetch_images(
        &self,
        imageset_id: ImagesetId,
        max_images: Option<i64>,
    ) -> Result<Vec<ImageDescriptor>, RepositoryError> {
        // LIMIT NULL is no limit.
        let rows = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT id::bigint AS id, full_s3
            FROM images WHERE imageset_id = $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(imageset_id.0)
        .bind(max_images)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            warn!("No images found for imageset (imageset_id={})", imageset_id);
        }

        let mut images = Vec::with_capacity(rows.len());
        for row in rows {
            match row.full_s3 {
                Some(Json(object)) => {
                    images.push(ImageDescriptor::new(
                        row.id,
                        ImageLocator::s3(object.bucket, object.key),
                    ));
                }
                None => warn!("Skipping image without S3 location (image_id={})", row.id),
            }
        }
        debug!(
            "Fetched {} images (imageset_id={})",
            images.len(),
            imageset_id
        );
        Ok(images)
    }

    pub async fn set_status(
        &self,
        imageset_id: ImagesetId,
        status: ImagesetStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE imagesets SET pii_status = $1 WHERE id = $2")
            .bind(status.as_ref())
            .bind(imageset_id.0)
            .execute(&self.pool)
            .await?;
        debug!(
            "Updated imageset status to {} (imageset_id={})",
            status, imageset_id
        );
        Ok(())
    }

    /// Writes the per-category maxima and detections of every successful
    /// result onto its `images` row in one transaction. Failed results are
    /// left out so their rows keep the previous values. Returns the number
    /// of rows updated.
    pub async fn save_results(&self, results: &[ImageResult]) -> Result<usize, RepositoryError> {
        let rows: Vec<PiiRow> = results.iter().filter_map(PiiRow::from_result).collect();
        if rows.is_empty() {
            debug!("No successful results to save");
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TEMPORARY TABLE pii_results (
                image_id BIGINT PRIMARY KEY,
                pii_animal DOUBLE PRECISION,
                pii_person DOUBLE PRECISION,
                pii_vehicle DOUBLE PRECISION,
                pii_detections JSONB
            ) ON COMMIT DROP
            "#,
        )
        .execute(&mut *tx)
        .await?;

        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO pii_results (image_id, pii_animal, pii_person, pii_vehicle, pii_detections) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.image_id)
                    .push_bind(row.animal)
                    .push_bind(row.person)
                    .push_bind(row.vehicle)
                    .push_bind(row.detections.clone());
            });
            builder.build().execute(&mut *tx).await?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE images
            SET pii_animal = pii_results.pii_animal,
                pii_person = pii_results.pii_person,
                pii_vehicle = pii_results.pii_vehicle,
                pii_detections = pii_results.pii_detections
            FROM pii_results
            WHERE images.id = pii_results.image_id
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if (updated as usize) < rows.len() {
            warn!(
                "Staged {} results but only {} image rows were updated",
                rows.len(),
                updated
            );
        }
        Ok(updated as usize)
    }
}

impl ImageSource for ImageRepository {
    async fn fetch_imageset(&self, imageset_id: ImagesetId) -> Result<Option<Imageset>, RepositoryError> {
        ImageRepository::fetch_imageset(self, imageset_id).await
    }

    async fn fetch_images(
        &self,
        imageset_id: ImagesetId,
        max_images: Option<i64>,
    ) -> Result<Vec<ImageDescriptor>, RepositoryError> {
        ImageRepository::fetch_images(self, imageset_id, max_images).await
    }
}

impl StatusStore for ImageRepository {
    async fn set_status(&self, imageset_id: ImagesetId, status: ImagesetStatus) -> Result<(), RepositoryError> {
        ImageRepository::set_status(self, imageset_id, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Category, DetectionOutcome, DetectionResult, FailureKind, ImageId};

    fn success(id: i64, confidence: f32) -> ImageResult {
        ImageResult {
            image_id: ImageId(id),
            file: format!("{}.jpg", id),
            outcome: DetectionOutcome::Success(DetectionResult::from_detections(vec![Detection {
                category: Category::Person,
                confidence,
                bbox: [1, 2, 3, 4],
            }])),
        }
    }

    #[test]
    fn only_successful_results_are_staged() {
        let failed = ImageResult {
            image_id: ImageId(2),
            file: "2.jpg".into(),
            outcome: DetectionOutcome::failure(FailureKind::Timeout, "timed out"),
        };
        let results = [success(1, 0.5), failed];
        let rows: Vec<PiiRow> = results.iter().filter_map(PiiRow::from_result).collect();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].image_id, 1);
        assert_eq!(rows[0].person, 0.5);
        assert_eq!(rows[0].animal, 0.0);
        assert_eq!(rows[0].detections.0.len(), 1);
    }

    #[test]
    fn full_s3_object_uses_upload_field_names() {
        let object: S3Object =
            serde_json::from_str(r#"{"Bucket": "fpe-images", "Key": "sets/1/img 001.jpg"}"#).unwrap();
        assert_eq!(object.bucket, "fpe-images");
        assert_eq!(object.key, "sets/1/img 001.jpg");
    }
}
