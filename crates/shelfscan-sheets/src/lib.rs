//! Google Sheets REST API client for the inventory spreadsheet.
//!
//! This crate provides:
//! - Service account authentication via gcp_auth with token caching
//! - Retry with exponential backoff and request metrics
//! - Header discovery that maps semantic fields onto existing columns
//! - Typed operations on the inventory, removal ledger and synonyms tabs

pub mod client;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod retry;
pub mod schema;
pub mod token_cache;
pub mod types;


pub use client::{extract_spreadsheet_id, SheetsClient, SheetsConfig, TabNames};
pub use error::{SheetsError, SheetsResult};
pub use inventory::{InventorySheets, TabLayout};
pub use retry::RetryConfig;
pub use schema::{ColumnMap, FieldRule, InventoryField, LedgerField, SemanticField, SynonymField};
