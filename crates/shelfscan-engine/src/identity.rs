//! Identity keying and admission of raw detections.

use shelfscan_models::{Detection, IdentityKey};

use crate::config::PriorityThresholds;

/// What happens to a detection before tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Participates in inventory tracking under this key.
    Tracked(IdentityKey),
    /// Low-tier detection above its floor: counted, never tracked.
    Context,
    /// Below the confidence floor of its tier.
    Discarded,
}

/// Deterministic key grouping detections of the same logical item type.
pub fn identity_key(detection: &Detection) -> IdentityKey {
    IdentityKey::from_detection(detection)
}

pub fn admit(detection: &Detection, thresholds: &PriorityThresholds) -> Admission {
    if detection.confidence < thresholds.floor(detection.priority_tier) {
        Admission::Discarded
    } else if detection.priority_tier.tracks_inventory() {
        Admission::Tracked(identity_key(detection))
    } else {
        Admission::Context
    }
}

/// Detector class to inventory display name.
const DISPLAY_NAMES: &[(&str, &str)] = &[
    ("apple", "manzana"),
    ("banana", "plátano"),
    ("orange", "naranja"),
    ("broccoli", "brócoli"),
    ("carrot", "zanahoria"),
    ("sandwich", "sándwich (comida preparada)"),
    ("hot_dog", "hot dog (comida preparada)"),
    ("pizza", "pizza (comida preparada)"),
    ("donut", "galleta (tipo donut)"),
    ("cake", "pastel (postre)"),
    ("bottle", "botella (bebida)"),
    ("cup", "lata (refresco/bebida)"),
    ("bowl", "tazón"),
];

/// Human-readable inventory name for a detector class.
pub fn display_name(class_name: &str) -> String {
    let normalized = class_name.trim().to_lowercase().replace(' ', "_");
    DISPLAY_NAMES
        .iter()
        .find(|(class, _)| *class == normalized)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| class_name.trim().replace('_', " "))
}
