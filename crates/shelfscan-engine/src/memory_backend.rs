//! In-process inventory backend.
//!
//! Used for local runs (`INVENTORY_BACKEND=memory`) and as the test double
//! for the backend worker. Every call is logged, and failures can be
//! injected per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use shelfscan_models::{InventoryRecord, ItemId, NewItem, RemovalLedgerEntry, SynonymEntry};
use tokio::sync::Mutex;

use crate::registrar::{InventoryBackend, RegistrarError, RegistrarResult};

/// Backend operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Register,
    UpdateQuantity,
    Remove,
    AppendRemoval,
    SynonymExists,
    InsertSynonym,
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Register { name: String, quantity: u32 },
    UpdateQuantity { item_id: ItemId, quantity: u32 },
    Remove { item_id: ItemId, reason: String },
    AppendRemoval { item_id: ItemId, delta_qty: i64 },
    SynonymExists { term: String, item_id: ItemId },
    InsertSynonym { term: String, item_id: ItemId },
}

impl BackendCall {
    pub fn operation(&self) -> Operation {
        match self {
            BackendCall::Register { .. } => Operation::Register,
            BackendCall::UpdateQuantity { .. } => Operation::UpdateQuantity,
            BackendCall::Remove { .. } => Operation::Remove,
            BackendCall::AppendRemoval { .. } => Operation::AppendRemoval,
            BackendCall::SynonymExists { .. } => Operation::SynonymExists,
            BackendCall::InsertSynonym { .. } => Operation::InsertSynonym,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    items: BTreeMap<String, InventoryRecord>,
    ledger: Vec<RemovalLedgerEntry>,
    synonyms: Vec<SynonymEntry>,
    calls: Vec<BackendCall>,
    queued_failures: HashMap<Operation, VecDeque<RegistrarError>>,
    sticky_failures: HashMap<Operation, RegistrarError>,
}

impl State {
    fn take_failure(&mut self, operation: Operation) -> RegistrarResult<()> {
        if let Some(error) = self.sticky_failures.get(&operation) {
            return Err(error.clone());
        }
        match self.queued_failures.get_mut(&operation).and_then(|q| q.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryInventory {
    state: Mutex<State>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `operation` with `error`. Calls queue up.
    pub async fn fail_next(&self, operation: Operation, error: RegistrarError) {
        let mut state = self.state.lock().await;
        state
            .queued_failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Fail every call of `operation` from now on.
    pub async fn fail_always(&self, operation: Operation, error: RegistrarError) {
        self.state.lock().await.sticky_failures.insert(operation, error);
    }

    pub async fn items(&self) -> Vec<InventoryRecord> {
        self.state.lock().await.items.values().cloned().collect()
    }

    pub async fn item(&self, item_id: &ItemId) -> Option<InventoryRecord> {
        self.state.lock().await.items.get(item_id.as_str()).cloned()
    }

    pub async fn ledger(&self) -> Vec<RemovalLedgerEntry> {
        self.state.lock().await.ledger.clone()
    }

    pub async fn synonyms(&self) -> Vec<SynonymEntry> {
        self.state.lock().await.synonyms.clone()
    }

    pub async fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }
}

#[async_trait]
impl InventoryBackend for InMemoryInventory {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn register(&self, item: &NewItem) -> RegistrarResult<ItemId> {
        let mut state = self.state.lock().await;
        state.calls.push(BackendCall::Register {
            name: item.name.clone(),
            quantity: item.quantity,
        });
        state.take_failure(Operation::Register)?;

        let now = Utc::now();
        let item_id = ItemId::generate_at(now);
        let record = InventoryRecord::from_new_item(item_id.clone(), item, now);
        state.items.insert(item_id.as_str().to_string(), record);
        Ok(item_id)
    }

    async fn update_quantity(&self, item_id: &ItemId, quantity: u32, note: &str) -> RegistrarResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(BackendCall::UpdateQuantity {
            item_id: item_id.clone(),
            quantity,
        });
        state.take_failure(Operation::UpdateQuantity)?;

        let record = state
            .items
            .get_mut(item_id.as_str())
            .ok_or_else(|| RegistrarError::transient(format!("item {} not found", item_id)))?;
        record.quantity = quantity;
        record.updated_at = Utc::now();
        if !note.is_empty() {
            if record.note.is_empty() {
                record.note = note.to_string();
            } else {
                record.note = format!("{}; {}", record.note, note);
            }
        }
        Ok(())
    }

    async fn remove(&self, item_id: &ItemId, reason: &str) -> RegistrarResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(BackendCall::Remove {
            item_id: item_id.clone(),
            reason: reason.to_string(),
        });
        state.take_failure(Operation::Remove)?;

        state
            .items
            .remove(item_id.as_str())
            .map(|_| ())
            .ok_or_else(|| RegistrarError::transient(format!("item {} not found", item_id)))
    }

    async fn append_removal(&self, entry: &RemovalLedgerEntry) -> RegistrarResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(BackendCall::AppendRemoval {
            item_id: entry.item_id.clone(),
            delta_qty: entry.delta_qty,
        });
        state.take_failure(Operation::AppendRemoval)?;
        state.ledger.push(entry.clone());
        Ok(())
    }

    async fn synonym_exists(&self, term: &str, item_id: &ItemId) -> RegistrarResult<bool> {
        let mut state = self.state.lock().await;
        state.calls.push(BackendCall::SynonymExists {
            term: term.to_string(),
            item_id: item_id.clone(),
        });
        state.take_failure(Operation::SynonymExists)?;
        Ok(state.synonyms.iter().any(|s| s.same_pair(term, item_id)))
    }

    async fn insert_synonym(&self, entry: &SynonymEntry) -> RegistrarResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(BackendCall::InsertSynonym {
            term: entry.term.clone(),
            item_id: entry.item_id.clone(),
        });
        state.take_failure(Operation::InsertSynonym)?;
        state.synonyms.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn new_item(quantity: u32) -> NewItem {
        NewItem {
            name: "manzana".into(),
            category: "fruta".into(),
            confidence: 0.8,
            quantity,
            note: "Detectado por cámara".into(),
        }
    }

    #[tokio::test]
    async fn test_register_update_remove() {
        let backend = InMemoryInventory::new();
        let id = assert_ok!(backend.register(&new_item(2)).await);
        assert!(id.as_str().starts_with("DET_"));

        assert_ok!(backend.update_quantity(&id, 3, "Cantidad actualizada: 2 -> 3").await);
        let record = backend.item(&id).await.unwrap();
        assert_eq!(record.quantity, 3);
        assert_eq!(record.note, "Detectado por cámara; Cantidad actualizada: 2 -> 3");

        assert_ok!(backend.remove(&id, "disappeared").await);
        assert!(backend.items().await.is_empty());
        assert!(matches!(
            backend.remove(&id, "disappeared").await,
            Err(RegistrarError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = InMemoryInventory::new();
        backend
            .fail_next(Operation::Register, RegistrarError::transient("timeout"))
            .await;
        assert_err!(backend.register(&new_item(1)).await);
        assert_ok!(backend.register(&new_item(1)).await);

        backend
            .fail_always(Operation::InsertSynonym, RegistrarError::permanent("gone"))
            .await;
        let id = ItemId::from_string("DET_1");
        for _ in 0..2 {
            let err = backend
                .insert_synonym(&SynonymEntry::new("fruta", id.clone(), "fruta"))
                .await
                .unwrap_err();
            assert!(err.is_permanent());
        }
        assert_eq!(backend.call_count(Operation::Register).await, 2);
        assert!(backend.synonyms().await.is_empty());
    }

    #[tokio::test]
    async fn test_synonym_lookup_is_case_insensitive() {
        let backend = InMemoryInventory::new();
        let id = ItemId::from_string("DET_1");
        backend
            .insert_synonym(&SynonymEntry::new("Galleta", id.clone(), "postre"))
            .await
            .unwrap();
        assert!(backend.synonym_exists("galleta", &id).await.unwrap());
        assert!(!backend
            .synonym_exists("galleta", &ItemId::from_string("DET_2"))
            .await
            .unwrap());
    }
}
