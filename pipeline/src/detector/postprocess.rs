//! Geometry and box decoding shared by model adapters.
//!
//! The model sees a letterboxed copy of the source image: resized so the
//! longest side equals [`INPUT_SIZE`], then padded (centred) up to the next
//! multiple of [`STRIDE`] on each axis. Raw predictions come back as rows of
//! `cx, cy, w, h, objectness, class scores...` in letterboxed pixels.

use shared::{Category, Detection, DetectionResult};

pub const INPUT_SIZE: u32 = 1280;
pub const STRIDE: u32 = 64;
pub const IOU_THRESHOLD: f32 = 0.45;
pub const PAD_VALUE: u8 = 114;

const BOX_FIELDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    /// Size of the resized image before padding.
    pub resized: (u32, u32),
    /// Size of the padded model input.
    pub input: (u32, u32),
    pub source: (u32, u32),
}

impl Letterbox {
    pub fn compute(src_width: u32, src_height: u32, target: u32, stride: u32) -> Self {
        let scale = (target as f32 / src_width as f32).min(target as f32 / src_height as f32);
        let resized_w = ((src_width as f32 * scale).round() as u32).max(1);
        let resized_h = ((src_height as f32 * scale).round() as u32).max(1);
        let input_w = resized_w.div_ceil(stride) * stride;
        let input_h = resized_h.div_ceil(stride) * stride;

        Self {
            scale,
            pad_x: (input_w - resized_w) as f32 / 2.0,
            pad_y: (input_h - resized_h) as f32 / 2.0,
            resized: (resized_w, resized_h),
            input: (input_w, input_h),
            source: (src_width, src_height),
        }
    }

    pub fn for_source(src_width: u32, src_height: u32) -> Self {
        Self::compute(src_width, src_height, INPUT_SIZE, STRIDE)
    }

    /// Maps a letterboxed point back onto the source image, clamped to its bounds.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let sx = ((x - self.pad_x) / self.scale).clamp(0.0, self.source.0 as f32);
        let sy = ((y - self.pad_y) / self.scale).clamp(0.0, self.source.1 as f32);
        (sx, sy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub confidence: f32,
    /// `x1, y1, x2, y2` in letterboxed pixels.
    pub bbox: [f32; 4],
}

/// Turns raw prediction rows into scored boxes above `min_confidence`.
pub fn decode_candidates(raw: &[f32], row_len: usize, min_confidence: f32) -> Vec<Candidate> {
    if row_len <= BOX_FIELDS {
        return Vec::new();
    }

    raw.chunks_exact(row_len)
        .filter_map(|row| {
            let objectness = row[4];
            if objectness < min_confidence {
                return None;
            }
            let (class_id, class_score) = row[BOX_FIELDS..]
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::MIN), |best, (i, s)| if s > best.1 { (i, s) } else { best });
            let confidence = objectness * class_score;
            if confidence < min_confidence {
                return None;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            Some(Candidate {
                class_id,
                confidence,
                bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            })
        })
        .collect()
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = ix * iy;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - intersection;
    if union <= 0.0 { 0.0 } else { intersection / union }
}

/// Class-aware greedy NMS: a box is dropped when it overlaps a stronger box
/// of the same class by more than `iou_threshold`.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Rescales kept boxes to source pixels. Class ids outside the known
/// categories are dropped.
pub fn to_detection_result(kept: &[Candidate], letterbox: &Letterbox) -> DetectionResult {
    let detections = kept
        .iter()
        .filter_map(|c| {
            let category = Category::try_from(u8::try_from(c.class_id).ok()?).ok()?;
            let (x1, y1) = letterbox.to_source(c.bbox[0], c.bbox[1]);
            let (x2, y2) = letterbox.to_source(c.bbox[2], c.bbox[3]);
            Some(Detection {
                category,
                confidence: c.confidence,
                bbox: [x1 as i32, y1 as i32, x2 as i32, y2 as i32],
            })
        })
        .collect();
    DetectionResult::from_detections(detections)
}
