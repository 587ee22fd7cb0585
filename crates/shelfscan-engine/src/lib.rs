//! Temporal tracking and inventory reconciliation engine.
//!
//! This crate provides:
//! - Identity keying and confidence filtering of per-frame detections
//! - A reconciliation controller with provisional/confirmed/removed lifecycles
//! - A rate-limited backend worker that keeps the frame loop off the network
//! - Sheets and in-memory inventory backends
//! - Synonym derivation for confirmed items

pub mod backend_worker;
pub mod commands;
pub mod config;
pub mod entity;
pub mod error;
pub mod feed;
pub mod identity;
pub mod memory_backend;
pub mod metrics;
pub mod pipeline;
pub mod reconciler;
pub mod registrar;
pub mod sheets_backend;
pub mod summary;
pub mod synonyms;

pub use backend_worker::{spawn_backend_worker, BackendHandle, WorkerStats};
pub use commands::{BackendCommand, BackendOutcome};
pub use config::{BackendConfig, BackendKind, EngineConfig, PriorityThresholds, TrackingConfig};
pub use entity::{EntitySnapshot, EntityStore, TrackedEntity};
pub use error::{EngineError, EngineResult, FeedError, SynonymWriteError};
pub use feed::DetectionFeed;
pub use identity::{admit, display_name, identity_key, Admission};
pub use memory_backend::InMemoryInventory;
pub use pipeline::Pipeline;
pub use reconciler::{BackendStatus, FrameReport, Reconciler};
pub use registrar::{InventoryBackend, RegistrarError, RegistrarResult};
pub use sheets_backend::SheetsInventory;
pub use summary::{InventorySummary, Totals};
pub use synonyms::{derive_synonyms, normalize_name};
