use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::orchestration::{ExecutionMode, TaskSettings};

pub const DEFAULT_MODEL_FILE: &str = "model/md_v5a.0.0.torchscript";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Run parameters. Every field has a default so a config file only needs
/// the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model_file: String,
    pub min_confidence: f32,
    /// `<= 0` runs detections one at a time.
    pub worker_count: i64,
    pub batch_size: usize,
    /// Per-image detection limit in seconds, `0` disables it.
    pub task_timeout_secs: u64,
    /// Only the first N images are processed. `0` or unset processes all.
    pub max_images: Option<i64>,
    pub dry_run: bool,
    pub force: bool,
    pub s3_bucket: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_file: DEFAULT_MODEL_FILE.to_string(),
            min_confidence: 0.1,
            worker_count: 0,
            batch_size: 16,
            task_timeout_secs: 300,
            max_images: None,
            dry_run: false,
            force: false,
            s3_bucket: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "min_confidence must be between 0 and 1, got {}",
                self.min_confidence
            )));
        }
        if matches!(self.max_images, Some(n) if n < 0) {
            return Err(ConfigError::Invalid("max_images must not be negative".into()));
        }
        Ok(())
    }

    /// Image cap passed to the source. `0` means no cap.
    pub fn image_limit(&self) -> Option<i64> {
        self.max_images.filter(|&n| n > 0)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_secs > 0).then(|| Duration::from_secs(self.task_timeout_secs))
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::new(self.worker_count, self.batch_size)
    }

    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            min_confidence: self.min_confidence,
            timeout: self.task_timeout(),
        }
    }
}
