//! Inventory registrar contract.
//!
//! The reconciliation controller never talks to a backend directly: it emits
//! commands that the backend worker executes against an [`InventoryBackend`].
//! Backends classify every failure as transient (retry on a later frame) or
//! permanent (disable backend-dependent work for the rest of the run).

use async_trait::async_trait;
use shelfscan_models::{ItemId, NewItem, RemovalLedgerEntry, SynonymEntry};
use thiserror::Error;

pub type RegistrarResult<T> = Result<T, RegistrarError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrarError {
    /// Network or auth hiccup, timeout, missing row.
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// No usable sheet or schema, credentials rejected.
    #[error("Permanent backend error: {0}")]
    Permanent(String),
}

impl RegistrarError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, RegistrarError::Permanent(_))
    }
}

/// External inventory store.
#[async_trait]
pub trait InventoryBackend: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Create a record. Not idempotent.
    async fn register(&self, item: &NewItem) -> RegistrarResult<ItemId>;

    async fn update_quantity(&self, item_id: &ItemId, quantity: u32, note: &str) -> RegistrarResult<()>;

    async fn remove(&self, item_id: &ItemId, reason: &str) -> RegistrarResult<()>;

    /// Append to the removal ledger.
    async fn append_removal(&self, entry: &RemovalLedgerEntry) -> RegistrarResult<()>;

    /// Case-insensitive `(term, item_id)` lookup.
    async fn synonym_exists(&self, term: &str, item_id: &ItemId) -> RegistrarResult<bool>;

    async fn insert_synonym(&self, entry: &SynonymEntry) -> RegistrarResult<()>;
}
