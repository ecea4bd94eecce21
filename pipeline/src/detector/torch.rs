use std::future::Future;
use std::sync::{Arc, Mutex};

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use log::{debug, info};
use shared::DetectionResult;
use tch::{CModule, Device, IValue, Kind, Tensor};

use super::image_loader::decode_rgb;
use super::postprocess::{self, Letterbox, IOU_THRESHOLD, PAD_VALUE};
use super::{DetectError, Detector, ImageLoader, ImageLocator};

/// TorchScript export of a YOLOv5-style detector (e.g. MegaDetector v5).
///
/// The module sits behind a mutex, so concurrent workers take turns on the
/// forward pass while image fetching still overlaps.
#[derive(Clone)]
pub struct TorchDetector {
    model: Arc<Mutex<CModule>>,
    device: Device,
    loader: ImageLoader,
}

impl TorchDetector {
    pub fn load(model_path: &str, loader: ImageLoader) -> Result<Self, DetectError> {
        let device = Device::cuda_if_available();
        info!("Loading detector (model_file={}, device={:?})", model_path, device);
        let model = CModule::load_on_device(model_path, device)
            .map_err(|e| DetectError::Load(format!("{}: {}", model_path, e)))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            device,
            loader,
        })
    }

    fn inference(&self, image: &RgbImage, min_confidence: f32) -> Result<DetectionResult, DetectError> {
        let (width, height) = image.dimensions();
        let letterbox = Letterbox::for_source(width, height);
        let input = self.preprocess(image, &letterbox);

        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| DetectError::Inference("detector mutex poisoned".to_string()))?;
            tch::no_grad(|| model.forward_is(&[IValue::Tensor(input)]))
                .map_err(|e| DetectError::Inference(e.to_string()))?
        };

        let predictions = match output {
            IValue::Tensor(tensor) => tensor,
            IValue::Tuple(mut values) if !values.is_empty() => match values.swap_remove(0) {
                IValue::Tensor(tensor) => tensor,
                other => {
                    return Err(DetectError::Inference(format!(
                        "unexpected model output: {:?}",
                        other
                    )));
                }
            },
            other => {
                return Err(DetectError::Inference(format!(
                    "unexpected model output: {:?}",
                    other
                )));
            }
        };

        // [1, rows, 5 + classes]
        let predictions = predictions
            .squeeze_dim(0)
            .to_kind(Kind::Float)
            .to_device(Device::Cpu);
        let size = predictions.size();
        if size.len() != 2 {
            return Err(DetectError::Inference(format!(
                "unexpected prediction shape: {:?}",
                size
            )));
        }
        let row_len = size[1] as usize;
        let num_elements = (size[0] * size[1]) as usize;
        let mut raw = vec![0.0f32; num_elements];
        predictions.view([-1]).copy_data(&mut raw, num_elements);

        let candidates = postprocess::decode_candidates(&raw, row_len, min_confidence);
        let kept = postprocess::non_max_suppression(candidates, IOU_THRESHOLD);
        debug!("{} raw candidates kept after NMS: {}", raw.len() / row_len.max(1), kept.len());
        Ok(postprocess::to_detection_result(&kept, &letterbox))
    }

    fn preprocess(&self, image: &RgbImage, letterbox: &Letterbox) -> Tensor {
        let (resized_w, resized_h) = letterbox.resized;
        let (input_w, input_h) = letterbox.input;
        let resized = imageops::resize(image, resized_w, resized_h, FilterType::Triangle);

        let mut canvas = RgbImage::from_pixel(input_w, input_h, Rgb([PAD_VALUE; 3]));
        imageops::overlay(
            &mut canvas,
            &resized,
            letterbox.pad_x.floor() as i64,
            letterbox.pad_y.floor() as i64,
        );

        Tensor::from_slice(canvas.as_raw())
            .view([input_h as i64, input_w as i64, 3])
            .permute([2, 0, 1])
            .to_kind(Kind::Float)
            .divide_scalar(255.0)
            .unsqueeze(0)
            .to_device(self.device)
    }
}

impl Detector for TorchDetector {
    fn detect(
        &self,
        locator: &ImageLocator,
        min_confidence: f32,
    ) -> impl Future<Output = Result<DetectionResult, DetectError>> + Send {
        let detector = self.clone();
        let locator = locator.clone();
        async move {
            let bytes = detector.loader.read_bytes(&locator).await?;
            tokio::task::spawn_blocking(move || {
                let image = decode_rgb(&bytes)?;
                detector.inference(&image, min_confidence)
            })
            .await
            .map_err(|e| DetectError::Inference(format!("inference task failed: {}", e)))?
        }
    }
}
