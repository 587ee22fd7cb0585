//! Shared data models for the shelfscan inventory engine.
//!
//! This crate provides Serde-serializable types for:
//! - Per-frame detections and priority tiers
//! - Identity keys, inventory item ids and entity lifecycle states
//! - Inventory rows, removal ledger entries and synonym entries

pub mod detection;
pub mod item;
pub mod ledger;

pub use detection::{BoundingBox, Detection, DetectionError, PriorityTier};
pub use item::{IdentityKey, InventoryRecord, ItemId, LifecycleState, NewItem};
pub use ledger::{RemovalLedgerEntry, SynonymEntry, REMOVED_EVENT, SYSTEM_SOURCE};
