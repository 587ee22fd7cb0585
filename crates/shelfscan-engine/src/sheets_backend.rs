//! Google Sheets inventory backend.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use shelfscan_models::{InventoryRecord, ItemId, NewItem, RemovalLedgerEntry, SynonymEntry};
use shelfscan_sheets::{InventorySheets, SheetsClient, SheetsError};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::BackendConfig;
use crate::registrar::{InventoryBackend, RegistrarError, RegistrarResult};

/// Classify a Sheets failure for the reconciliation controller.
///
/// A missing spreadsheet or tab will not come back within a run, so 404 is
/// permanent alongside auth, permission and schema failures.
pub fn classify(error: SheetsError) -> RegistrarError {
    if error.is_permanent() || matches!(error, SheetsError::NotFound(_)) {
        RegistrarError::permanent(error.to_string())
    } else {
        RegistrarError::transient(error.to_string())
    }
}

async fn retry_transient<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
    op: F,
) -> RegistrarResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = RegistrarResult<T>>,
{
    let mut delay = backoff;
    let mut attempt = 1;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_permanent() || attempt >= attempts => return Err(e),
            Err(e) => e,
        };
        warn!(
            attempt,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Sheets backend not reachable yet, retrying"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            Ok(_) = shutdown.wait_for(|stop| *stop) => return Err(error),
        }
        delay = delay.saturating_mul(2);
        attempt += 1;
    }
}

pub struct SheetsInventory {
    sheets: InventorySheets,
}

impl SheetsInventory {
    /// Connect and discover the spreadsheet layout.
    pub async fn connect(client: SheetsClient) -> RegistrarResult<Self> {
        let sheets = InventorySheets::connect(client).await.map_err(classify)?;
        info!(
            tab = %sheets.inventory_layout().title,
            "Sheets inventory backend ready"
        );
        Ok(Self { sheets })
    }

    /// Connect, retrying transient failures with doubling backoff.
    ///
    /// A permanent failure returns at once. Gives up with the last transient
    /// error after `connect_attempts` tries or when shutdown is signalled.
    pub async fn connect_with_retry(
        client: SheetsClient,
        config: &BackendConfig,
        shutdown: watch::Receiver<bool>,
    ) -> RegistrarResult<Self> {
        retry_transient(config.connect_attempts, config.connect_backoff, shutdown, || {
            Self::connect(client.clone())
        })
        .await
    }

    pub fn from_sheets(sheets: InventorySheets) -> Self {
        Self { sheets }
    }
}

#[async_trait]
impl InventoryBackend for SheetsInventory {
    fn name(&self) -> &'static str {
        "sheets"
    }

    async fn register(&self, item: &NewItem) -> RegistrarResult<ItemId> {
        let now = Utc::now();
        let item_id = ItemId::generate_at(now);
        let record = InventoryRecord::from_new_item(item_id.clone(), item, now);
        self.sheets.append_item(&record).await.map_err(classify)?;
        Ok(item_id)
    }

    async fn update_quantity(&self, item_id: &ItemId, quantity: u32, note: &str) -> RegistrarResult<()> {
        self.sheets
            .update_quantity(item_id, quantity, note)
            .await
            .map_err(classify)
    }

    async fn remove(&self, item_id: &ItemId, _reason: &str) -> RegistrarResult<()> {
        self.sheets.delete_item(item_id).await.map_err(classify)
    }

    async fn append_removal(&self, entry: &RemovalLedgerEntry) -> RegistrarResult<()> {
        self.sheets.append_ledger(entry).await.map_err(classify)
    }

    async fn synonym_exists(&self, term: &str, item_id: &ItemId) -> RegistrarResult<bool> {
        self.sheets
            .synonym_exists(term, item_id)
            .await
            .map_err(classify)
    }

    async fn insert_synonym(&self, entry: &SynonymEntry) -> RegistrarResult<()> {
        self.sheets.append_synonym(entry).await.map_err(classify)
    }
}
