//! Per-frame detection records.
//!
//! A [`Detection`] is produced by the external detector for every object it
//! sees in a frame. Records are validated at the boundary: a detection with
//! a missing field fails deserialization, and one with out-of-range values
//! fails [`Detection::validate`]. Nothing downstream defaults a field.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Detector-assigned importance class.
///
/// Controls the confidence floor a detection must clear and whether the
/// detection takes part in inventory tracking at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    /// Primary food items.
    High,
    /// Containers and tableware.
    Medium,
    /// Scene context (laptops, books, cutlery). Never tracked.
    Low,
}

impl PriorityTier {
    /// All tiers, highest first.
    pub const ALL: &'static [PriorityTier] =
        &[PriorityTier::High, PriorityTier::Medium, PriorityTier::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::High => "high",
            PriorityTier::Medium => "medium",
            PriorityTier::Low => "low",
        }
    }

    /// Returns true if detections of this tier are tracked and may be
    /// written to the inventory.
    pub fn tracks_inventory(&self) -> bool {
        matches!(self, PriorityTier::High | PriorityTier::Medium)
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PriorityTier {
    type Err = DetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(PriorityTier::High),
            "medium" => Ok(PriorityTier::Medium),
            "low" => Ok(PriorityTier::Low),
            _ => Err(DetectionError::UnknownTier(s.to_string())),
        }
    }
}

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left and
/// `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i64 {
        i64::from(self.x2) - i64::from(self.x1)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.y2) - i64::from(self.y1)
    }

    /// Area in square pixels. Zero for degenerate boxes.
    pub fn area(&self) -> i64 {
        self.width().max(0) * self.height().max(0)
    }

    /// A box is well formed when its corners are ordered.
    pub fn is_valid(&self) -> bool {
        self.x2 >= self.x1 && self.y2 >= self.y1
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One object seen by the detector in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// Detector class, e.g. `apple`, `hot_dog`.
    pub class_name: String,
    /// Inventory category, e.g. `fruta`, `bebida_contenedor`.
    pub category: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f64,
    /// Bounding box `[x1, y1, x2, y2]`.
    #[schemars(with = "[i32; 4]")]
    pub bbox: BoundingBox,
    /// Box area in square pixels as reported by the detector.
    pub area: i64,
    /// Priority tier assigned by the detector.
    #[serde(alias = "priority")]
    pub priority_tier: PriorityTier,
}

impl Detection {
    /// Build a detection, deriving `area` from the box.
    pub fn new(
        class_name: impl Into<String>,
        category: impl Into<String>,
        confidence: f64,
        bbox: BoundingBox,
        priority_tier: PriorityTier,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            category: category.into(),
            confidence,
            area: bbox.area(),
            bbox,
            priority_tier,
        }
    }

    /// Reject records that cannot be tracked meaningfully.
    pub fn validate(&self) -> Result<(), DetectionError> {
        if self.class_name.trim().is_empty() {
            return Err(DetectionError::MissingField("class_name"));
        }
        if self.category.trim().is_empty() {
            return Err(DetectionError::MissingField("category"));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(DetectionError::ConfidenceOutOfRange(self.confidence));
        }
        if !self.bbox.is_valid() {
            return Err(DetectionError::InvalidBoundingBox(self.bbox.into()));
        }
        if self.area < 0 {
            return Err(DetectionError::NegativeArea(self.area));
        }
        Ok(())
    }
}

/// Detection validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    #[error("Missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("Confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("Bounding box corners out of order: {0:?}")]
    InvalidBoundingBox([i32; 4]),

    #[error("Negative area: {0}")]
    NegativeArea(i64),

    #[error("Unknown priority tier: {0}")]
    UnknownTier(String),
}
