use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{ConfigError, PipelineConfig};

pub const S3_BUCKET_ENV: &str = "FPE_S3_BUCKET";

#[derive(Debug, Parser)]
#[command(name = "pii-detector", version, about = "FPE PII Detector")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// TorchScript detection model
    #[arg(long, global = true)]
    pub model_file: Option<String>,

    /// Minimum detection confidence (0-1)
    #[arg(long, global = true)]
    pub min_confidence: Option<f32>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// YAML file with pipeline settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Concurrent detections, 0 or less runs sequentially
    #[arg(long, global = true, allow_negative_numbers = true)]
    pub workers: Option<i64>,

    /// Images submitted per batch
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Per-image detection limit in seconds, 0 disables it
    #[arg(long, global = true)]
    pub task_timeout_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Detect PII in a single image
    DetectImage {
        /// Local path or S3 URI for the image
        locator: String,
    },
    /// Detect PII in a batch of images listed in a CSV file
    DetectImageBatch {
        /// CSV file with a column of local image paths or S3 URIs
        csv: PathBuf,

        /// Root directory for relative image paths
        #[arg(long)]
        root_dir: Option<PathBuf>,

        /// Column holding the image filenames
        #[arg(long, default_value = "filename")]
        filename_column: String,
    },
    /// Detect PII in every image of an FPE imageset
    DetectImageset {
        imageset_id: i64,

        /// Only process the first N images
        #[arg(long)]
        max_images: Option<i64>,

        /// Bucket receiving the results JSON (falls back to FPE_S3_BUCKET)
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Run detection without saving results or status
        #[arg(long)]
        dry_run: bool,

        /// Run even if the imageset is already PROCESSING
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Defaults, then the config file, then flags, then the environment for
    /// anything still unset.
    pub fn resolve_config(&self, env_bucket: Option<String>) -> Result<PipelineConfig, ConfigError> {
        let mut config = match &self.global.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };

        let global = &self.global;
        if let Some(model_file) = &global.model_file {
            config.model_file = model_file.clone();
        }
        if let Some(min_confidence) = global.min_confidence {
            config.min_confidence = min_confidence;
        }
        if let Some(workers) = global.workers {
            config.worker_count = workers;
        }
        if let Some(batch_size) = global.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(timeout) = global.task_timeout_secs {
            config.task_timeout_secs = timeout;
        }

        if let Command::DetectImageset {
            max_images,
            s3_bucket,
            dry_run,
            force,
            ..
        } = &self.command
        {
            if max_images.is_some() {
                config.max_images = *max_images;
            }
            if s3_bucket.is_some() {
                config.s3_bucket = s3_bucket.clone();
            }
            config.dry_run |= *dry_run;
            config.force |= *force;
        }

        if config.s3_bucket.is_none() {
            config.s3_bucket = env_bucket.filter(|b| !b.is_empty());
        }

        config.validate()?;
        Ok(config)
    }
}
