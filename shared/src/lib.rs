use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImagesetId(pub i64);

/// Processing status of an imageset as stored in `imagesets.pii_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, AsRefStr, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ImagesetStatus {
    #[default]
    Pending,
    Processing,
    Done,
    Failed,
}

impl ImagesetStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ImagesetStatus::Done | ImagesetStatus::Failed)
    }

    /// A run enters `Processing` from any resting state and leaves it for
    /// exactly one terminal state. Nothing goes back to `Pending`.
    pub fn can_transition_to(self, next: ImagesetStatus) -> bool {
        use ImagesetStatus::*;
        match (self, next) {
            (Pending | Done | Failed, Processing) => true,
            (Processing, Done | Failed) => true,
            _ => false,
        }
    }
}

/// Detector class, encoded as the integer class id on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Category {
    Animal,
    Person,
    Vehicle,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Animal, Category::Person, Category::Vehicle];

    pub fn label(self) -> &'static str {
        match self {
            Category::Animal => "animal",
            Category::Person => "person",
            Category::Vehicle => "vehicle",
        }
    }
}

impl TryFrom<u8> for Category {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Category::Animal),
            1 => Ok(Category::Person),
            2 => Ok(Category::Vehicle),
            other => Err(format!("unknown category id {}", other)),
        }
    }
}

impl From<Category> for u8 {
    fn from(category: Category) -> u8 {
        match category {
            Category::Animal => 0,
            Category::Person => 1,
            Category::Vehicle => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub category: Category,
    #[serde(rename = "conf")]
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in source image pixels.
    pub bbox: [i32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MaxConfidence {
    pub animal: f32,
    pub person: f32,
    pub vehicle: f32,
}

impl MaxConfidence {
    pub fn get(&self, category: Category) -> f32 {
        match category {
            Category::Animal => self.animal,
            Category::Person => self.person,
            Category::Vehicle => self.vehicle,
        }
    }

    fn raise(&mut self, category: Category, confidence: f32) {
        let slot = match category {
            Category::Animal => &mut self.animal,
            Category::Person => &mut self.person,
            Category::Vehicle => &mut self.vehicle,
        };
        *slot = slot.max(confidence);
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub max_conf: MaxConfidence,
}

impl DetectionResult {
    pub fn from_detections(detections: Vec<Detection>) -> Self {
        let mut max_conf = MaxConfidence::default();
        for detection in &detections {
            max_conf.raise(detection.category, detection.confidence);
        }
        Self {
            detections,
            max_conf,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Error,
    Timeout,
    Cancelled,
    Panicked,
}

/// What happened when one image was dispatched to the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DetectionOutcome {
    Success(DetectionResult),
    Failure { kind: FailureKind, error: String },
}

impl DetectionOutcome {
    pub fn failure(kind: FailureKind, error: impl Into<String>) -> Self {
        DetectionOutcome::Failure {
            kind,
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DetectionOutcome::Success(_))
    }

    pub fn result(&self) -> Option<&DetectionResult> {
        match self {
            DetectionOutcome::Success(result) => Some(result),
            DetectionOutcome::Failure { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            DetectionOutcome::Success(_) => None,
            DetectionOutcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// An outcome tagged with the image it belongs to. This is the element type
/// of the persisted result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub image_id: ImageId,
    pub file: String,
    #[serde(flatten)]
    pub outcome: DetectionOutcome,
}
