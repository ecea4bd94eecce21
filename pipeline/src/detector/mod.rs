pub mod image_loader;
pub mod locator;
pub mod postprocess;
#[cfg(feature = "torch")]
pub mod torch;

use std::future::Future;

use shared::DetectionResult;

pub use image_loader::ImageLoader;
pub use locator::ImageLocator;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("Failed to load detector: {0}")]
    Load(String),
    #[error("Failed to read image {locator}: {reason}")]
    Read { locator: String, reason: String },
    #[error("Failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("Inference error: {0}")]
    Inference(String),
}

/// Runs object detection on a single image.
///
/// Implementations are shared across workers behind an `Arc`, so `detect`
/// may be called concurrently. Adapters around models that are not safe for
/// concurrent use serialize access internally.
pub trait Detector: Send + Sync + 'static {
    fn detect(
        &self,
        locator: &ImageLocator,
        min_confidence: f32,
    ) -> impl Future<Output = Result<DetectionResult, DetectError>> + Send;
}

#[cfg(feature = "torch")]
pub type ModelDetector = torch::TorchDetector;

#[cfg(not(feature = "torch"))]
pub type ModelDetector = Unavailable;

/// Stand-in detector type for builds without a model runtime. It has no
/// values, so loading always fails before any detection is attempted.
#[cfg(not(feature = "torch"))]
pub enum Unavailable {}

#[cfg(not(feature = "torch"))]
impl Detector for Unavailable {
    fn detect(
        &self,
        _locator: &ImageLocator,
        _min_confidence: f32,
    ) -> impl Future<Output = Result<DetectionResult, DetectError>> + Send {
        async move { match *self {} }
    }
}

/// Loads the detection model from `model_file`.
#[cfg(feature = "torch")]
pub fn load_model_detector(
    model_file: &str,
    loader: ImageLoader,
) -> Result<ModelDetector, DetectError> {
    torch::TorchDetector::load(model_file, loader)
}

#[cfg(not(feature = "torch"))]
pub fn load_model_detector(
    model_file: &str,
    _loader: ImageLoader,
) -> Result<ModelDetector, DetectError> {
    Err(DetectError::Load(format!(
        "cannot load {}: built without the `torch` feature",
        model_file
    )))
}
