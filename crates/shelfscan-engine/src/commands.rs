//! Messages between the reconciliation controller and the backend worker.

use std::collections::BTreeSet;

use shelfscan_models::{IdentityKey, ItemId, NewItem};
use tokio::sync::oneshot;

use crate::registrar::RegistrarError;

/// Work for the backend worker, executed in order.
#[derive(Debug)]
pub enum BackendCommand {
    Register {
        key: IdentityKey,
        lifetime: u64,
        item: NewItem,
    },
    UpdateQuantity {
        item_id: ItemId,
        quantity: u32,
        note: String,
    },
    /// Remove the record, then append a ledger entry; each is attempted
    /// regardless of the other's result.
    Remove {
        item_id: ItemId,
        name: String,
        quantity: u32,
        reason: String,
    },
    AddSynonyms {
        item_id: ItemId,
        /// `(term, category)` pairs.
        synonyms: BTreeSet<(String, String)>,
    },
    /// Answered once every earlier command has been executed.
    Flush(oneshot::Sender<()>),
}

impl BackendCommand {
    pub fn operation(&self) -> &'static str {
        match self {
            BackendCommand::Register { .. } => "register",
            BackendCommand::UpdateQuantity { .. } => "update_quantity",
            BackendCommand::Remove { .. } => "remove",
            BackendCommand::AddSynonyms { .. } => "add_synonyms",
            BackendCommand::Flush(_) => "flush",
        }
    }

    /// Commands still executed while draining at shutdown.
    pub fn survives_shutdown(&self) -> bool {
        matches!(self, BackendCommand::Remove { .. } | BackendCommand::Flush(_))
    }
}

/// Results the controller applies at the start of the next frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
    Registered {
        key: IdentityKey,
        lifetime: u64,
        item_id: ItemId,
        name: String,
        /// Quantity carried by the register call.
        quantity: u32,
    },
    RegisterFailed {
        key: IdentityKey,
        lifetime: u64,
        error: RegistrarError,
    },
    /// The backend hit a permanent error; stop issuing commands.
    Disabled { reason: String },
}
