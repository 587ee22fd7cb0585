//! Frame loop wiring the controller to the backend worker.

use std::sync::Arc;
use std::time::Duration;

use shelfscan_models::Detection;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend_worker::{spawn_backend_worker, BackendHandle, WorkerStats};
use crate::commands::BackendOutcome;
use crate::config::{BackendConfig, TrackingConfig};
use crate::error::FeedError;
use crate::feed::DetectionFeed;
use crate::reconciler::{FrameReport, Reconciler};
use crate::registrar::InventoryBackend;
use crate::summary::InventorySummary;

/// Frames between periodic status lines.
const STATUS_INTERVAL: u64 = 100;

/// Upper bound on flush rounds when settling at end of input.
const MAX_SETTLE_ROUNDS: usize = 8;

/// Slack on top of the worker's own drain timeout when joining it.
const JOIN_GRACE: Duration = Duration::from_secs(5);

struct WorkerLink {
    handle: BackendHandle,
    outcomes: mpsc::UnboundedReceiver<BackendOutcome>,
    join: JoinHandle<WorkerStats>,
}

pub struct Pipeline {
    reconciler: Reconciler,
    worker: Option<WorkerLink>,
    shutdown_timeout: Duration,
}

impl Pipeline {
    /// Track without any backend side effects.
    pub fn local_only(tracking: TrackingConfig, reason: impl Into<String>) -> Self {
        Self {
            reconciler: Reconciler::local_only(tracking, reason),
            worker: None,
            shutdown_timeout: Duration::ZERO,
        }
    }

    /// Track and reconcile against `backend` through a worker task.
    pub fn with_backend(
        tracking: TrackingConfig,
        backend: Arc<dyn InventoryBackend>,
        backend_config: &BackendConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let name = backend.name();
        let (handle, outcomes, join) = spawn_backend_worker(backend, backend_config, shutdown);
        Self {
            reconciler: Reconciler::new(tracking, name),
            worker: Some(WorkerLink {
                handle,
                outcomes,
                join,
            }),
            shutdown_timeout: backend_config.shutdown_timeout,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Current state, including entities still provisional.
    pub fn summary(&self) -> InventorySummary {
        self.reconciler.summary()
    }

    fn drain_outcomes(&mut self) {
        if let Some(link) = self.worker.as_mut() {
            while let Ok(outcome) = link.outcomes.try_recv() {
                self.reconciler.apply_outcome(outcome);
            }
        }
    }

    /// Hand pending commands to the worker. Returns how many were queued.
    async fn dispatch(&mut self) -> usize {
        let commands = self.reconciler.take_commands();
        let Some(link) = self.worker.as_ref() else {
            return 0;
        };

        let mut sent = 0;
        for command in commands {
            if link.handle.send(command).await.is_err() {
                self.reconciler.disable_backend("backend worker stopped");
                break;
            }
            sent += 1;
        }
        sent
    }

    pub async fn process_frame(&mut self, detections: &[Detection]) -> FrameReport {
        self.drain_outcomes();
        let report = self.reconciler.process_frame(detections);
        self.dispatch().await;

        if report.frame % STATUS_INTERVAL == 0 {
            let totals = self.reconciler.totals();
            info!(
                frame = report.frame,
                tracked = report.tracked_entities,
                created = totals.created,
                confirmed = totals.confirmed,
                removed = totals.removed,
                backend_enabled = self.reconciler.backend_status().is_enabled(),
                "Tracking status"
            );
        }
        report
    }

    /// Wait for queued work and apply its follow-ups, such as synonyms and
    /// quantity corrections after a late registration.
    pub async fn settle(&mut self) {
        for _ in 0..MAX_SETTLE_ROUNDS {
            let flushed = match self.worker.as_ref() {
                Some(link) if self.reconciler.backend_status().is_enabled() => {
                    link.handle.flush().await
                }
                _ => return,
            };
            if !flushed {
                self.reconciler.disable_backend("backend worker stopped");
                return;
            }
            self.drain_outcomes();
            if self.dispatch().await == 0 {
                return;
            }
        }
        warn!("Backend still producing follow-up work after settling");
    }

    /// Process frames until the feed ends or `shutdown` flips to true.
    /// Returns the number of frames processed.
    pub async fn run<R: AsyncRead + Unpin>(
        &mut self,
        feed: &mut DetectionFeed<R>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<u64, FeedError> {
        let mut frames = 0;
        let mut watching = true;

        loop {
            if *shutdown.borrow() {
                info!(frames, "Shutdown requested, stopping frame loop");
                return Ok(frames);
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                    }
                    continue;
                }
                next = feed.next_frame() => next?,
            };

            match next {
                Some(detections) => {
                    self.process_frame(&detections).await;
                    frames += 1;
                }
                None => break,
            }
        }

        info!(frames, lines = feed.line(), "Detection feed ended");
        self.settle().await;
        Ok(frames)
    }

    /// Stop the worker and produce the final summary.
    pub async fn finish(mut self) -> InventorySummary {
        let mut dropped = 0;

        if let Some(WorkerLink {
            handle,
            mut outcomes,
            mut join,
        }) = self.worker.take()
        {
            drop(handle);
            match tokio::time::timeout(self.shutdown_timeout + JOIN_GRACE, &mut join).await {
                Ok(Ok(stats)) => {
                    debug!(?stats, "Backend worker joined");
                    dropped += stats.dropped;
                }
                Ok(Err(e)) => error!(error = %e, "Backend worker panicked"),
                Err(_) => {
                    warn!("Backend worker did not stop in time, aborting");
                    join.abort();
                }
            }

            while let Ok(outcome) = outcomes.try_recv() {
                self.reconciler.apply_outcome(outcome);
            }
            let unsent = self.reconciler.take_commands();
            if !unsent.is_empty() {
                warn!(count = unsent.len(), "Follow-up commands produced after worker stopped");
                dropped += unsent.len() as u64;
            }
        }

        let mut summary = self.reconciler.summary();
        summary.dropped_commands = dropped;
        summary
    }
}
