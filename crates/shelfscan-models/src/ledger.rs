//! Removal ledger and synonym rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ItemId;

/// Event name written for removals.
pub const REMOVED_EVENT: &str = "removed";

/// Source tag for ledger entries written by the engine.
pub const SYSTEM_SOURCE: &str = "system";

/// Append-only audit row describing a removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalLedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub item_id: ItemId,
    pub name: String,
    pub delta_qty: i64,
    pub new_qty: u32,
    pub event: String,
    pub source: String,
    pub payload_id: String,
    pub note: String,
}

impl RemovalLedgerEntry {
    /// Ledger row for an item removed with `quantity` units on hand.
    pub fn removal(item_id: ItemId, name: impl Into<String>, quantity: u32, reason: &str) -> Self {
        Self::removal_at(item_id, name, quantity, reason, Utc::now())
    }

    pub fn removal_at(
        item_id: ItemId,
        name: impl Into<String>,
        quantity: u32,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            timestamp: at,
            item_id,
            name: name.into(),
            delta_qty: -i64::from(quantity),
            new_qty: 0,
            event: REMOVED_EVENT.to_string(),
            source: SYSTEM_SOURCE.to_string(),
            payload_id: format!("REM_{}_{}", at.timestamp(), &suffix[..8]),
            note: format!("Item eliminado: {}", reason),
        }
    }
}

/// Alias search term attached to an inventory item.
///
/// At most one row exists per `(term, item_id)` pair; terms compare
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SynonymEntry {
    pub term: String,
    pub item_id: ItemId,
    pub category: String,
}

impl SynonymEntry {
    pub fn new(term: impl Into<String>, item_id: ItemId, category: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            item_id,
            category: category.into(),
        }
    }

    /// True if this row already holds `term` for `item_id`.
    pub fn same_pair(&self, term: &str, item_id: &ItemId) -> bool {
        self.item_id == *item_id && self.term.to_lowercase() == term.to_lowercase()
    }
}
