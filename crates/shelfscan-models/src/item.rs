//! Inventory identifiers and lifecycle types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::Detection;

/// Stable key grouping detections believed to be the same item type.
///
/// Built as `category + "_" + class_name`, so every simultaneous instance of
/// a class collapses into one tracked entity with a quantity counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(category: &str, class_name: &str) -> Self {
        Self(format!("{}_{}", category, class_name))
    }

    /// Key a detection by its category and class.
    pub fn from_detection(detection: &Detection) -> Self {
        Self::new(&detection.category, &detection.class_name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a row in the external inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Generate a fresh identifier: `DET_<yyyymmddHHMMSS>_<8 hex>`.
    ///
    /// The random suffix keeps two registrations within the same second
    /// distinct.
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    pub fn generate_at(at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("DET_{}_{}", at.format("%Y%m%d%H%M%S"), &suffix[..8]))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a tracked entity.
///
/// `Provisional -> Confirmed` once the dwell threshold is met and the
/// registration succeeds; either state moves to `Removed` after the
/// disappearance threshold. `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Provisional,
    Confirmed,
    Removed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Provisional => "provisional",
            LifecycleState::Confirmed => "confirmed",
            LifecycleState::Removed => "removed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Removed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Values for a new inventory row, before the backend assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub category: String,
    pub confidence: f64,
    pub quantity: u32,
    pub note: String,
}

/// A row of the inventory table, keyed by `item_id`.
///
/// The engine writes these; it reads rows back only to locate existing
/// identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub item_id: ItemId,
    pub name: String,
    pub category: String,
    pub confidence: f64,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: String,
    pub note: String,
    pub location: String,
}

impl InventoryRecord {
    /// Source tag for rows written by the camera pipeline.
    pub const CAMERA_SOURCE: &'static str = "camera";
    /// Location tag for rows written by the camera pipeline.
    pub const CAMERA_LOCATION: &'static str = "camera_view";

    /// Build the row for a freshly registered item.
    pub fn from_new_item(item_id: ItemId, item: &NewItem, now: DateTime<Utc>) -> Self {
        Self {
            item_id,
            name: item.name.clone(),
            category: item.category.clone(),
            confidence: item.confidence,
            quantity: item.quantity,
            created_at: now,
            updated_at: now,
            source: Self::CAMERA_SOURCE.to_string(),
            note: item.note.clone(),
            location: Self::CAMERA_LOCATION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, PriorityTier};
    use chrono::TimeZone;

    #[test]
    fn test_identity_key_from_detection() {
        let det = Detection::new(
            "apple",
            "fruta",
            0.9,
            BoundingBox::new(0, 0, 1, 1),
            PriorityTier::High,
        );
        assert_eq!(IdentityKey::from_detection(&det).as_str(), "fruta_apple");
    }

    #[test]
    fn test_item_id_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let id = ItemId::generate_at(at);
        assert!(id.as_str().starts_with("DET_20240305140709_"));
        assert_eq!(id.as_str().len(), "DET_20240305140709_".len() + 8);
    }

    #[test]
    fn test_item_ids_are_unique() {
        let at = Utc::now();
        assert_ne!(ItemId::generate_at(at), ItemId::generate_at(at));
    }

    #[test]
    fn test_lifecycle_terminal() {
        assert!(!LifecycleState::Provisional.is_terminal());
        assert!(!LifecycleState::Confirmed.is_terminal());
        assert!(LifecycleState::Removed.is_terminal());
    }
}
