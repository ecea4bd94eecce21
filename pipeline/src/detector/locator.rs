use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const S3_SCHEME: &str = "s3://";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("Empty image locator")]
    Empty,
    #[error("Invalid S3 URI (expected s3://bucket/key): {0}")]
    InvalidS3Uri(String),
}

/// Where an image's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageLocator {
    S3 { bucket: String, key: String },
    Local(PathBuf),
}

impl ImageLocator {
    pub fn s3(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        ImageLocator::S3 {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parses an `s3://bucket/key` URI or a local path.
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        Self::parse_with_root(raw, None)
    }

    /// Like [`ImageLocator::parse`], but relative local paths are joined onto
    /// `root` when one is given. S3 URIs are never rewritten.
    pub fn parse_with_root(raw: &str, root: Option<&Path>) -> Result<Self, LocatorError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(LocatorError::Empty);
        }

        if let Some(rest) = raw.strip_prefix(S3_SCHEME) {
            return match rest.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                    Ok(ImageLocator::s3(bucket, key))
                }
                _ => Err(LocatorError::InvalidS3Uri(raw.to_string())),
            };
        }

        let path = PathBuf::from(raw);
        match root {
            Some(root) if path.is_relative() => Ok(ImageLocator::Local(root.join(path))),
            _ => Ok(ImageLocator::Local(path)),
        }
    }

    /// Basename of the image, carried alongside each result.
    pub fn file_name(&self) -> String {
        match self {
            ImageLocator::S3 { key, .. } => key.rsplit('/').next().unwrap_or(key).to_string(),
            ImageLocator::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
        }
    }
}

impl fmt::Display for ImageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageLocator::S3 { bucket, key } => write!(f, "{}{}/{}", S3_SCHEME, bucket, key),
            ImageLocator::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_s3_uri_with_nested_key() {
        let locator = ImageLocator::parse("s3://test-bucket/imagesets/1/West Brook 0(8).JPG").unwrap();
        assert_eq!(
            locator,
            ImageLocator::s3("test-bucket", "imagesets/1/West Brook 0(8).JPG")
        );
        assert_eq!(locator.file_name(), "West Brook 0(8).JPG");
        assert_eq!(
            locator.to_string(),
            "s3://test-bucket/imagesets/1/West Brook 0(8).JPG"
        );
    }

    #[test]
    fn rejects_s3_uri_without_key() {
        assert!(matches!(
            ImageLocator::parse("s3://bucket-only"),
            Err(LocatorError::InvalidS3Uri(_))
        ));
        assert!(matches!(
            ImageLocator::parse("s3://bucket/"),
            Err(LocatorError::InvalidS3Uri(_))
        ));
        assert_eq!(ImageLocator::parse("  "), Err(LocatorError::Empty));
    }

    #[test]
    fn root_applies_to_relative_paths_only() {
        let root = Path::new("/data/images");
        assert_eq!(
            ImageLocator::parse_with_root("animal/RCNX0613.JPG", Some(root)).unwrap(),
            ImageLocator::Local(PathBuf::from("/data/images/animal/RCNX0613.JPG"))
        );
        assert_eq!(
            ImageLocator::parse_with_root("/abs/a.jpg", Some(root)).unwrap(),
            ImageLocator::Local(PathBuf::from("/abs/a.jpg"))
        );
        assert_eq!(
            ImageLocator::parse_with_root("s3://b/k.jpg", Some(root)).unwrap(),
            ImageLocator::s3("b", "k.jpg")
        );
    }
}
