//! End-of-run inventory summary.

use serde::Serialize;

use crate::entity::EntitySnapshot;

/// Lifetime counters kept by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub created: u64,
    /// Confirmed, with or without a backend record.
    pub confirmed: u64,
    /// Confirmed with a backend record.
    pub registered: u64,
    pub removed: u64,
    pub context_detections: u64,
    pub discarded_detections: u64,
}

/// Queryable state of the engine, available whether or not the backend works.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventorySummary {
    pub frames: u64,
    pub backend: String,
    pub backend_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_disabled_reason: Option<String>,
    /// Live entities.
    pub tracked: usize,
    /// Live entities in the Confirmed state.
    pub confirmed: usize,
    /// Live entities holding a backend item id.
    pub registered: usize,
    pub totals: Totals,
    /// Backend commands dropped during shutdown.
    pub dropped_commands: u64,
    pub entities: Vec<EntitySnapshot>,
}

impl InventorySummary {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
