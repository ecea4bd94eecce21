use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aws_config::SdkConfig;
use log::{info, warn};
use shared::{DetectionOutcome, ImageResult, ImagesetId};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::db::{CredentialsError, DbCredentials, ImageRepository};
use crate::detector::{self, DetectError, Detector, ImageLoader, ImageLocator};
use crate::error::RunError;
use crate::orchestration::worker_pool::detect_with_timeout;
use crate::orchestration::{BatchScheduler, ImageDescriptor, ImagesetRunner, RunReport};
use crate::storage::{DurableResultSink, S3Service};

const DB_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Failed to read CSV file")]
    Csv(#[from] csv::Error),
    #[error("CSV file has no '{0}' column")]
    MissingColumn(String),
    #[error("Failed to load detector")]
    DetectorLoad(#[source] DetectError),
    #[error("No results bucket configured, pass --s3-bucket or set FPE_S3_BUCKET")]
    MissingBucket,
    #[error("Failed to get database credentials")]
    Credentials(#[from] CredentialsError),
    #[error("Failed to connect to database")]
    Connect(#[source] sqlx::Error),
    #[error(transparent)]
    Run(#[from] RunError),
}

impl CommandError {
    pub fn images_processed(&self) -> usize {
        match self {
            CommandError::Run(e) => e.images_processed(),
            _ => 0,
        }
    }
}

/// Detects a single image with the configured confidence and timeout.
pub async fn detect_image<D: Detector>(
    detector: &D,
    locator: &ImageLocator,
    config: &PipelineConfig,
) -> DetectionOutcome {
    info!("Detecting PII in image (filename={})", locator);
    detect_with_timeout(detector, locator, config.task_settings()).await
}

/// Reads image locators from `column` of a CSV file. Relative local paths
/// are joined onto `root_dir`. Image ids are 1-based row numbers; rows with
/// an empty or malformed locator are skipped.
pub fn read_image_csv(
    csv_path: &Path,
    column: &str,
    root_dir: Option<&Path>,
) -> Result<Vec<ImageDescriptor>, CommandError> {
    info!("Reading CSV file (filename={})", csv_path.display());
    let mut reader = csv::Reader::from_path(csv_path)?;
    let index = reader
        .headers()?
        .iter()
        .position(|header| header.trim() == column)
        .ok_or_else(|| CommandError::MissingColumn(column.to_string()))?;

    let mut images = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let raw = record.get(index).unwrap_or_default();
        match ImageLocator::parse_with_root(raw, root_dir) {
            Ok(locator) => images.push(ImageDescriptor::new(row as i64 + 1, locator)),
            Err(e) => warn!("Skipping CSV row {} ({}={:?}): {}", row + 1, column, raw, e),
        }
    }
    Ok(images)
}

/// Runs every image of a CSV file through the batch scheduler. The CSV is
/// read before the detector is loaded.
pub async fn detect_image_batch<D, L>(
    csv_path: &Path,
    column: &str,
    root_dir: Option<&Path>,
    config: &PipelineConfig,
    load_detector: L,
    cancel: CancellationToken,
) -> Result<Vec<ImageResult>, CommandError>
where
    D: Detector,
    L: FnOnce() -> Result<D, DetectError>,
{
    let images = read_image_csv(csv_path, column, root_dir)?;
    if images.is_empty() {
        warn!("No images listed in {}", csv_path.display());
        return Ok(Vec::new());
    }

    let detector = Arc::new(load_detector().map_err(CommandError::DetectorLoad)?);
    let scheduler = BatchScheduler::new(config.execution_mode(), config.task_settings())
        .with_cancellation(cancel);
    let results = scheduler.run(&images, detector).await;

    for result in &results {
        match &result.outcome {
            DetectionOutcome::Success(detections) => info!(
                "Results (image_id={}, file={}): {}",
                result.image_id,
                result.file,
                serde_json::to_string(detections).unwrap_or_default()
            ),
            DetectionOutcome::Failure { kind, error } => warn!(
                "No results (image_id={}, file={}, kind={:?}): {}",
                result.image_id, result.file, kind, error
            ),
        }
    }
    Ok(results)
}

/// Wires the database, S3 and model collaborators and runs one imageset.
pub async fn detect_imageset(
    imageset_id: ImagesetId,
    config: PipelineConfig,
    aws_config: &SdkConfig,
    cancel: CancellationToken,
) -> Result<RunReport, CommandError> {
    if !config.dry_run && config.s3_bucket.is_none() {
        return Err(CommandError::MissingBucket);
    }

    let credentials = DbCredentials::discover(aws_config).await?;
    info!("Connecting to database ({})", credentials.redacted_url());
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(DB_CONNECT_TIMEOUT)
        .connect_with(credentials.connect_options())
        .await
        .map_err(CommandError::Connect)?;
    let repository = ImageRepository::new(pool);

    let s3_client = aws_sdk_s3::Client::new(aws_config);
    let s3_service = S3Service::new(s3_client, config.s3_bucket.clone());
    let sink = DurableResultSink::new(s3_service.clone(), repository.clone());
    let loader = ImageLoader::new(Some(s3_service));
    let model_file = config.model_file.clone();

    let runner = ImagesetRunner::new(repository.clone(), repository, sink, config)
        .with_cancellation(cancel);
    let report = runner
        .run(imageset_id, move || detector::load_model_detector(&model_file, loader))
        .await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn csv_rows_become_numbered_descriptors() {
        let file = write_csv("site,filename\na,cam1/001.jpg\nb,s3://bucket/cam2/002.jpg\nc,/abs/003.jpg\n");
        let images = read_image_csv(file.path(), "filename", Some(Path::new("/data"))).unwrap();

        assert_eq!(images.len(), 3);
        assert_eq!(images[0].id, shared::ImageId(1));
        assert_eq!(images[0].locator, ImageLocator::Local("/data/cam1/001.jpg".into()));
        assert_eq!(images[1].locator, ImageLocator::s3("bucket", "cam2/002.jpg"));
        assert_eq!(images[2].locator, ImageLocator::Local("/abs/003.jpg".into()));
    }

    #[test]
    fn blank_rows_are_skipped_but_keep_numbering() {
        let file = write_csv("filename,note\none.jpg,x\n,empty\nthree.jpg,y\n");
        let images = read_image_csv(file.path(), "filename", None).unwrap();

        let ids: Vec<i64> = images.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn missing_column_is_fatal() {
        let file = write_csv("path\none.jpg\n");
        let err = read_image_csv(file.path(), "filename", None).unwrap_err();
        assert!(matches!(err, CommandError::MissingColumn(c) if c == "filename"));
    }

    #[test]
    fn unreadable_csv_is_fatal() {
        let err = read_image_csv(Path::new("/no/such/file.csv"), "filename", None).unwrap_err();
        assert!(matches!(err, CommandError::Csv(_)));
    }
}
