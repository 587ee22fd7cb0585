//! Single worker that executes backend commands in order.
//!
//! Calls are spaced by a rate limiter and bounded by a timeout so the frame
//! loop never waits on the network. Results flow back on an unbounded
//! channel the controller drains at the start of each frame.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use shelfscan_models::{ItemId, RemovalLedgerEntry, SynonymEntry};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::commands::{BackendCommand, BackendOutcome};
use crate::config::BackendConfig;
use crate::error::SynonymWriteError;
use crate::metrics;
use crate::registrar::{InventoryBackend, RegistrarError, RegistrarResult};

type CallLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Counters reported when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub executed: u64,
    pub failed: u64,
    /// Commands skipped while disabled or draining at shutdown.
    pub dropped: u64,
}

/// Sending side of the command queue.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    tx: mpsc::Sender<BackendCommand>,
}

impl BackendHandle {
    /// Queue a command, waiting for space. Gives the command back if the
    /// worker has exited.
    pub async fn send(&self, command: BackendCommand) -> Result<(), BackendCommand> {
        self.tx.send(command).await.map_err(|e| e.0)
    }

    /// Wait until every command queued so far has been executed.
    /// Returns false if the worker has exited.
    pub async fn flush(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(BackendCommand::Flush(ack_tx)).await.is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Start the worker task.
///
/// The worker stops when every [`BackendHandle`] is dropped, or when
/// `shutdown` flips to true; in the latter case queued removals are still
/// executed within `shutdown_timeout` and everything else is dropped.
pub fn spawn_backend_worker(
    backend: Arc<dyn InventoryBackend>,
    config: &BackendConfig,
    shutdown: watch::Receiver<bool>,
) -> (
    BackendHandle,
    mpsc::UnboundedReceiver<BackendOutcome>,
    JoinHandle<WorkerStats>,
) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

    let worker = BackendWorker {
        limiter: Quota::with_period(config.call_spacing).map(RateLimiter::direct),
        call_timeout: config.call_timeout,
        shutdown_timeout: config.shutdown_timeout,
        outcomes: outcome_tx,
        disabled: false,
        stats: WorkerStats::default(),
        backend,
    };

    let span = info_span!("backend_worker", backend = worker.backend.name());
    let join = tokio::spawn(worker.run(rx, shutdown).instrument(span));
    (BackendHandle { tx }, outcome_rx, join)
}

struct BackendWorker {
    backend: Arc<dyn InventoryBackend>,
    limiter: Option<CallLimiter>,
    call_timeout: Duration,
    shutdown_timeout: Duration,
    outcomes: mpsc::UnboundedSender<BackendOutcome>,
    disabled: bool,
    stats: WorkerStats,
}

impl BackendWorker {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<BackendCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerStats {
        info!("Backend worker started");
        let mut watching = !*shutdown.borrow();

        if watching {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed(), if watching => {
                        match changed {
                            Ok(()) if *shutdown.borrow() => break,
                            Ok(()) => {}
                            // Signal sender gone; run until the queue closes
                            Err(_) => watching = false,
                        }
                    }
                    command = rx.recv() => match command {
                        Some(command) => self.execute(command).await,
                        None => {
                            info!(stats = ?self.stats, "Backend worker stopped");
                            return self.stats;
                        }
                    },
                }
            }
        }

        self.drain(&mut rx).await;
        info!(stats = ?self.stats, "Backend worker stopped after shutdown");
        self.stats
    }

    /// Run queued removals, drop the rest, within the shutdown grace period.
    async fn drain(&mut self, rx: &mut mpsc::Receiver<BackendCommand>) {
        info!(timeout = ?self.shutdown_timeout, "Draining backend queue");
        rx.close();

        let timeout = self.shutdown_timeout;
        let drained = tokio::time::timeout(timeout, async {
            while let Some(command) = rx.recv().await {
                if command.survives_shutdown() {
                    self.execute(command).await;
                } else {
                    self.drop_command(&command);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown grace period elapsed, dropping remaining commands");
            while let Ok(command) = rx.try_recv() {
                self.drop_command(&command);
            }
        }
    }

    fn drop_command(&mut self, command: &BackendCommand) {
        debug!(operation = command.operation(), "Dropping backend command");
        self.stats.dropped += 1;
        metrics::record_dropped(command.operation());
    }

    fn emit(&self, outcome: BackendOutcome) {
        if self.outcomes.send(outcome).is_err() {
            debug!("Outcome receiver gone");
        }
    }

    /// Permanent failures disable the worker and tell the controller once.
    fn note_failure(&mut self, operation: &'static str, error: &RegistrarError) {
        self.stats.failed += 1;
        if error.is_permanent() && !self.disabled {
            error!(operation, error = %error, "Permanent backend error, disabling backend");
            self.disabled = true;
            self.emit(BackendOutcome::Disabled {
                reason: error.to_string(),
            });
        } else {
            warn!(operation, error = %error, "Backend call failed");
        }
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> RegistrarResult<T>
    where
        F: Future<Output = RegistrarResult<T>>,
    {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let start = Instant::now();
        let result = match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RegistrarError::transient(format!(
                "{} timed out after {:?}",
                operation, self.call_timeout
            ))),
        };
        let status = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_permanent() => "permanent_error",
            Err(_) => "transient_error",
        };
        metrics::record_backend_call(operation, status, start.elapsed().as_secs_f64());
        result
    }

    async fn execute(&mut self, command: BackendCommand) {
        if let BackendCommand::Flush(ack) = command {
            let _ = ack.send(());
            return;
        }
        if self.disabled {
            self.drop_command(&command);
            return;
        }

        match command {
            BackendCommand::Register { key, lifetime, item } => {
                match self.call("register", self.backend.register(&item)).await {
                    Ok(item_id) => {
                        self.stats.executed += 1;
                        self.emit(BackendOutcome::Registered {
                            key,
                            lifetime,
                            item_id,
                            name: item.name,
                            quantity: item.quantity,
                        });
                    }
                    Err(error) => {
                        self.note_failure("register", &error);
                        self.emit(BackendOutcome::RegisterFailed { key, lifetime, error });
                    }
                }
            }
            BackendCommand::UpdateQuantity {
                item_id,
                quantity,
                note,
            } => {
                let result = self
                    .call(
                        "update_quantity",
                        self.backend.update_quantity(&item_id, quantity, &note),
                    )
                    .await;
                match result {
                    Ok(()) => {
                        self.stats.executed += 1;
                        debug!(item_id = %item_id, quantity, "Quantity updated");
                    }
                    Err(error) => self.note_failure("update_quantity", &error),
                }
            }
            BackendCommand::Remove {
                item_id,
                name,
                quantity,
                reason,
            } => self.remove(item_id, name, quantity, reason).await,
            BackendCommand::AddSynonyms { item_id, synonyms } => {
                let mut complete = true;
                for (term, category) in synonyms {
                    if let Err(e) = self.add_synonym(&item_id, term, category).await {
                        warn!(error = %e, "Synonym write failed");
                        complete = false;
                        let permanent = e.source.is_permanent();
                        self.note_failure("add_synonym", &e.source);
                        if permanent {
                            break;
                        }
                    }
                }
                if complete {
                    self.stats.executed += 1;
                }
            }
            BackendCommand::Flush(_) => {}
        }
    }

    /// Delete the record, then write the ledger row. Each runs regardless of
    /// the other's result.
    async fn remove(&mut self, item_id: ItemId, name: String, quantity: u32, reason: String) {
        let removed = self
            .call("remove", self.backend.remove(&item_id, &reason))
            .await;

        let entry = RemovalLedgerEntry::removal(item_id.clone(), name, quantity, &reason);
        let logged = self
            .call("append_removal", self.backend.append_removal(&entry))
            .await;

        match removed {
            Ok(()) => {
                self.stats.executed += 1;
                info!(item_id = %item_id, reason = %reason, "Item removed from inventory");
            }
            Err(error) => self.note_failure("remove", &error),
        }
        if let Err(error) = logged {
            self.note_failure("append_removal", &error);
        }
    }

    async fn add_synonym(
        &self,
        item_id: &ItemId,
        term: String,
        category: String,
    ) -> Result<(), SynonymWriteError> {
        let wrap = |source: RegistrarError, term: &str| SynonymWriteError {
            term: term.to_string(),
            item_id: item_id.clone(),
            source,
        };

        let exists = self
            .call("synonym_exists", self.backend.synonym_exists(&term, item_id))
            .await
            .map_err(|e| wrap(e, &term))?;
        if exists {
            return Ok(());
        }

        let entry = SynonymEntry::new(term.clone(), item_id.clone(), category);
        self.call("insert_synonym", self.backend.insert_synonym(&entry))
            .await
            .map_err(|e| wrap(e, &term))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_backend::{BackendCall, InMemoryInventory, Operation};
    use shelfscan_models::{IdentityKey, NewItem};
    use std::collections::BTreeSet;

    fn config() -> BackendConfig {
        BackendConfig {
            call_spacing: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(5),
            ..BackendConfig::default()
        }
    }

    fn register(quantity: u32) -> BackendCommand {
        BackendCommand::Register {
            key: IdentityKey::new("fruta", "apple"),
            lifetime: 1,
            item: NewItem {
                name: "manzana".into(),
                category: "fruta".into(),
                confidence: 0.9,
                quantity,
                note: String::new(),
            },
        }
    }

    async fn registered_id(
        handle: &BackendHandle,
        outcomes: &mut mpsc::UnboundedReceiver<BackendOutcome>,
    ) -> ItemId {
        handle.send(register(2)).await.unwrap();
        assert!(handle.flush().await);
        match outcomes.try_recv().unwrap() {
            BackendOutcome::Registered { item_id, quantity, .. } => {
                assert_eq!(quantity, 2);
                item_id
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_and_synonyms() {
        let backend = Arc::new(InMemoryInventory::new());
        let (_tx, shutdown) = watch::channel(false);
        let (handle, mut outcomes, join) = spawn_backend_worker(backend.clone(), &config(), shutdown);

        let item_id = registered_id(&handle, &mut outcomes).await;
        let synonyms: BTreeSet<_> = [("fruta", "fruta"), ("manzana", "fruta")]
            .into_iter()
            .map(|(t, c)| (t.to_string(), c.to_string()))
            .collect();
        for _ in 0..2 {
            handle
                .send(BackendCommand::AddSynonyms {
                    item_id: item_id.clone(),
                    synonyms: synonyms.clone(),
                })
                .await
                .unwrap();
        }
        assert!(handle.flush().await);

        // Second batch finds every pair already present
        assert_eq!(backend.synonyms().await.len(), 2);
        assert_eq!(backend.call_count(Operation::InsertSynonym).await, 2);
        assert_eq!(backend.call_count(Operation::SynonymExists).await, 4);

        drop(handle);
        let stats = join.await.unwrap();
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.executed, 3);
    }

    #[tokio::test]
    async fn test_failed_synonym_batch_is_not_counted_as_executed() {
        let backend = Arc::new(InMemoryInventory::new());
        backend
            .fail_always(Operation::InsertSynonym, RegistrarError::transient("quota"))
            .await;
        let (_tx, shutdown) = watch::channel(false);
        let (handle, _outcomes, join) = spawn_backend_worker(backend.clone(), &config(), shutdown);

        let synonyms: BTreeSet<_> = [("galleta", "postre"), ("dulce", "postre")]
            .into_iter()
            .map(|(t, c)| (t.to_string(), c.to_string()))
            .collect();
        handle
            .send(BackendCommand::AddSynonyms {
                item_id: ItemId::from_string("DET_1"),
                synonyms,
            })
            .await
            .unwrap();
        assert!(handle.flush().await);

        drop(handle);
        let stats = join.await.unwrap();
        assert_eq!(stats.executed, 0);
        assert_eq!(stats.failed, 2);
        assert!(backend.synonyms().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_writes_ledger_even_if_delete_fails() {
        let backend = Arc::new(InMemoryInventory::new());
        let (_tx, shutdown) = watch::channel(false);
        let (handle, _outcomes, join) = spawn_backend_worker(backend.clone(), &config(), shutdown);

        handle
            .send(BackendCommand::Remove {
                item_id: ItemId::from_string("DET_missing"),
                name: "manzana".into(),
                quantity: 3,
                reason: "disappeared".into(),
            })
            .await
            .unwrap();
        drop(handle);
        let stats = join.await.unwrap();

        let ledger = backend.ledger().await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].delta_qty, -3);
        assert_eq!(ledger[0].new_qty, 0);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_transient_register_failure_is_reported() {
        let backend = Arc::new(InMemoryInventory::new());
        backend
            .fail_next(Operation::Register, RegistrarError::transient("timeout"))
            .await;
        let (_tx, shutdown) = watch::channel(false);
        let (handle, mut outcomes, _join) = spawn_backend_worker(backend.clone(), &config(), shutdown);

        handle.send(register(1)).await.unwrap();
        assert!(handle.flush().await);
        match outcomes.try_recv().unwrap() {
            BackendOutcome::RegisterFailed { error, .. } => assert!(!error.is_permanent()),
            other => panic!("unexpected outcome {:?}", other),
        }

        // Not disabled: the next attempt goes through
        let item_id = registered_id(&handle, &mut outcomes).await;
        assert!(backend.item(&item_id).await.is_some());
    }

    #[tokio::test]
    async fn test_permanent_failure_disables_worker() {
        let backend = Arc::new(InMemoryInventory::new());
        backend
            .fail_next(Operation::Register, RegistrarError::permanent("no inventory tab"))
            .await;
        let (_tx, shutdown) = watch::channel(false);
        let (handle, mut outcomes, join) = spawn_backend_worker(backend.clone(), &config(), shutdown);

        handle.send(register(1)).await.unwrap();
        handle.send(register(1)).await.unwrap();
        assert!(handle.flush().await);

        assert!(matches!(
            outcomes.try_recv().unwrap(),
            BackendOutcome::Disabled { .. }
        ));
        assert!(matches!(
            outcomes.try_recv().unwrap(),
            BackendOutcome::RegisterFailed { .. }
        ));
        assert!(outcomes.try_recv().is_err());

        drop(handle);
        let stats = join.await.unwrap();
        assert_eq!(stats.dropped, 1);
        assert_eq!(backend.call_count(Operation::Register).await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_removals_only() {
        let backend = Arc::new(InMemoryInventory::new());
        let (shutdown_tx, shutdown) = watch::channel(false);
        let cfg = BackendConfig {
            queue_capacity: 16,
            ..config()
        };
        let (handle, mut outcomes, join) = spawn_backend_worker(backend.clone(), &cfg, shutdown);
        let item_id = registered_id(&handle, &mut outcomes).await;

        handle.send(register(1)).await.unwrap();
        handle
            .send(BackendCommand::Remove {
                item_id: item_id.clone(),
                name: "manzana".into(),
                quantity: 2,
                reason: "disappeared".into(),
            })
            .await
            .unwrap();
        shutdown_tx.send(true).unwrap();
        drop(handle);
        let stats = join.await.unwrap();

        // The removal always runs; the register either ran before the
        // signal was seen or was dropped during the drain
        assert!(backend.item(&item_id).await.is_none());
        assert_eq!(backend.ledger().await.len(), 1);
        let registers = backend.call_count(Operation::Register).await as u64;
        assert_eq!(registers + stats.dropped, 2);
    }

    #[tokio::test]
    async fn test_spacing_between_calls() {
        let backend = Arc::new(InMemoryInventory::new());
        let (_tx, shutdown) = watch::channel(false);
        let cfg = BackendConfig {
            call_spacing: Duration::from_millis(50),
            ..config()
        };
        let (handle, _outcomes, _join) = spawn_backend_worker(backend.clone(), &cfg, shutdown);

        let start = Instant::now();
        for _ in 0..3 {
            handle.send(register(1)).await.unwrap();
        }
        assert!(handle.flush().await);
        assert!(start.elapsed() >= Duration::from_millis(90));

        let calls = backend.calls().await;
        assert!(calls
            .iter()
            .all(|c| matches!(c, BackendCall::Register { .. })));
        assert_eq!(calls.len(), 3);
    }
}
