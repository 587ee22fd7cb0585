//! Per-frame reconciliation of detections against the tracked entity store.
//!
//! The controller is synchronous and owns its store. Backend work leaves as
//! [`BackendCommand`]s collected in an outbox; results come back as
//! [`BackendOutcome`]s that the caller applies before the next frame.
//!
//! Frame order: group, update or create, disappearance sweep, confirmation
//! sweep.

use std::collections::BTreeMap;

use serde::Serialize;
use shelfscan_models::{Detection, IdentityKey, LifecycleState, NewItem};
use tracing::{debug, info, warn};

use crate::commands::{BackendCommand, BackendOutcome};
use crate::config::TrackingConfig;
use crate::entity::EntityStore;
use crate::identity::{admit, Admission};
use crate::metrics;
use crate::summary::{InventorySummary, Totals};
use crate::synonyms::derive_synonyms;

/// Removal reason for entities that stopped being seen.
pub const DISAPPEARED_REASON: &str = "disappeared";

/// Removal reason for a record created after its entity was already gone.
pub const ORPHANED_REASON: &str = "orphaned_registration";

/// Whether backend side effects are issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Enabled,
    Disabled { reason: String },
}

impl BackendStatus {
    pub fn is_enabled(&self) -> bool {
        matches!(self, BackendStatus::Enabled)
    }
}

/// What happened in one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub detections: usize,
    pub tracked_detections: usize,
    /// Low-tier detections above their floor.
    pub context_detections: usize,
    /// Detections below their tier's confidence floor.
    pub discarded_detections: usize,
    pub created: Vec<IdentityKey>,
    pub confirmed: Vec<IdentityKey>,
    pub removed: Vec<IdentityKey>,
    pub registrations_requested: Vec<IdentityKey>,
    /// Live entities after the frame.
    pub tracked_entities: usize,
}

/// The reconciliation controller.
#[derive(Debug)]
pub struct Reconciler {
    config: TrackingConfig,
    store: EntityStore,
    frame: u64,
    backend: BackendStatus,
    backend_name: String,
    outbox: Vec<BackendCommand>,
    totals: Totals,
}

impl Reconciler {
    /// Controller that issues backend commands.
    pub fn new(config: TrackingConfig, backend_name: impl Into<String>) -> Self {
        Self {
            config,
            store: EntityStore::new(),
            frame: 0,
            backend: BackendStatus::Enabled,
            backend_name: backend_name.into(),
            outbox: Vec::new(),
            totals: Totals::default(),
        }
    }

    /// Controller with backend side effects suppressed from the start.
    pub fn local_only(config: TrackingConfig, reason: impl Into<String>) -> Self {
        let mut reconciler = Self::new(config, "none");
        reconciler.backend = BackendStatus::Disabled {
            reason: reason.into(),
        };
        reconciler
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn backend_status(&self) -> &BackendStatus {
        &self.backend
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    /// Commands produced since the last call.
    pub fn take_commands(&mut self) -> Vec<BackendCommand> {
        std::mem::take(&mut self.outbox)
    }

    fn enqueue(&mut self, command: BackendCommand) {
        if self.backend.is_enabled() {
            self.outbox.push(command);
        } else {
            debug!(operation = command.operation(), "Backend disabled, command not issued");
        }
    }

    /// Stop issuing backend commands. Dwell-satisfied entities are then
    /// confirmed locally.
    pub fn disable_backend(&mut self, reason: impl Into<String>) {
        if !self.backend.is_enabled() {
            return;
        }
        let reason = reason.into();
        warn!(reason = %reason, "Inventory backend disabled, continuing with local tracking");
        self.backend = BackendStatus::Disabled { reason };
        self.outbox.clear();
        for entity in self.store.iter_mut() {
            entity.registration_pending = false;
        }
    }

    // =========================================================================
    // Frame processing
    // =========================================================================

    pub fn process_frame(&mut self, detections: &[Detection]) -> FrameReport {
        self.frame += 1;
        let now = self.frame;
        let mut report = FrameReport {
            frame: now,
            detections: detections.len(),
            ..FrameReport::default()
        };

        // Group: count per key, keep the most confident instance
        let mut groups: BTreeMap<IdentityKey, (u32, &Detection)> = BTreeMap::new();
        for detection in detections {
            match admit(detection, &self.config.thresholds) {
                Admission::Tracked(key) => {
                    report.tracked_detections += 1;
                    let slot = groups.entry(key).or_insert((0, detection));
                    slot.0 += 1;
                    if detection.confidence > slot.1.confidence {
                        slot.1 = detection;
                    }
                }
                Admission::Context => report.context_detections += 1,
                Admission::Discarded => report.discarded_detections += 1,
            }
        }
        self.totals.context_detections += report.context_detections as u64;
        self.totals.discarded_detections += report.discarded_detections as u64;

        self.update_or_create(groups, now, &mut report);
        self.sweep_disappeared(now, &mut report);
        self.sweep_confirmations(&mut report);

        report.tracked_entities = self.store.len();
        metrics::record_frame(
            report.tracked_detections,
            report.context_detections,
            report.discarded_detections,
            report.tracked_entities,
        );
        debug!(
            frame = now,
            tracked = report.tracked_entities,
            context = report.context_detections,
            discarded = report.discarded_detections,
            "Frame processed"
        );
        report
    }

    fn update_or_create(
        &mut self,
        groups: BTreeMap<IdentityKey, (u32, &Detection)>,
        now: u64,
        report: &mut FrameReport,
    ) {
        let mut commands = Vec::new();

        for (key, (count, detection)) in groups {
            match self.store.get_mut(&key) {
                Some(entity) => {
                    let previous = entity.observe(detection.clone(), count, now);
                    if count > previous {
                        // Provisional growth rides along with the register call
                        if let (true, Some(item_id)) =
                            (entity.is_confirmed(), entity.external_item_id.clone())
                        {
                            commands.push(BackendCommand::UpdateQuantity {
                                item_id,
                                quantity: count,
                                note: quantity_note(previous, count),
                            });
                        }
                    } else if count < previous {
                        debug!(key = %key, previous, count, "Quantity lowered locally");
                    }
                }
                None => {
                    self.store.create(key.clone(), detection.clone(), count, now);
                    self.totals.created += 1;
                    metrics::record_transition("created");
                    info!(key = %key, quantity = count, frame = now, "Tracking new entity");
                    report.created.push(key);
                }
            }
        }

        for command in commands {
            self.enqueue(command);
        }
    }

    fn sweep_disappeared(&mut self, now: u64, report: &mut FrameReport) {
        let threshold = self.config.disappearance_threshold;
        let expired: Vec<IdentityKey> = self
            .store
            .iter()
            .filter(|entity| entity.frames_missing(now) >= threshold)
            .map(|entity| entity.identity_key.clone())
            .collect();

        for key in expired {
            let Some(mut entity) = self.store.remove(&key) else {
                continue;
            };

            if let (true, Some(item_id)) = (entity.is_confirmed(), entity.external_item_id.clone()) {
                self.enqueue(BackendCommand::Remove {
                    item_id,
                    name: entity.display_name(),
                    quantity: entity.quantity,
                    reason: DISAPPEARED_REASON.to_string(),
                });
            }

            entity.state = LifecycleState::Removed;
            self.totals.removed += 1;
            metrics::record_transition("removed");
            info!(
                key = %key,
                item_id = ?entity.external_item_id,
                last_seen = entity.last_seen_frame,
                "Entity disappeared"
            );
            report.removed.push(key);
        }
    }

    fn sweep_confirmations(&mut self, report: &mut FrameReport) {
        let min_frames = self.config.min_frames_for_registration;
        let enabled = self.backend.is_enabled();
        let mut registrations = Vec::new();

        for entity in self.store.iter_mut() {
            if entity.state != LifecycleState::Provisional || !entity.dwell_satisfied(min_frames) {
                continue;
            }

            if !enabled {
                entity.state = LifecycleState::Confirmed;
                self.totals.confirmed += 1;
                metrics::record_transition("confirmed");
                info!(key = %entity.identity_key, "Entity confirmed locally");
                report.confirmed.push(entity.identity_key.clone());
            } else if !entity.registration_pending {
                entity.registration_pending = true;
                let avg = entity.avg_confidence();
                registrations.push(BackendCommand::Register {
                    key: entity.identity_key.clone(),
                    lifetime: entity.lifetime,
                    item: NewItem {
                        name: entity.display_name(),
                        category: entity.category().to_string(),
                        confidence: avg,
                        quantity: entity.quantity,
                        note: format!(
                            "Detectado por cámara: categoría {}, {} frames, confianza media {:.2}",
                            entity.category(),
                            entity.total_detections,
                            avg
                        ),
                    },
                });
                report.registrations_requested.push(entity.identity_key.clone());
            }
        }

        for command in registrations {
            self.enqueue(command);
        }
    }

    // =========================================================================
    // Backend results
    // =========================================================================

    pub fn apply_outcome(&mut self, outcome: BackendOutcome) {
        match outcome {
            BackendOutcome::Registered {
                key,
                lifetime,
                item_id,
                name,
                quantity,
            } => {
                let mut commands = Vec::new();
                match self.store.get_lifetime_mut(&key, lifetime) {
                    Some(entity) if entity.external_item_id.is_none() => {
                        entity.registration_pending = false;
                        entity.external_item_id = Some(item_id.clone());
                        entity.state = LifecycleState::Confirmed;
                        info!(key = %key, item_id = %item_id, quantity, "Entity registered");

                        commands.push(BackendCommand::AddSynonyms {
                            item_id: item_id.clone(),
                            synonyms: derive_synonyms(&entity.display_name(), entity.category()),
                        });
                        if entity.quantity > quantity {
                            commands.push(BackendCommand::UpdateQuantity {
                                item_id,
                                quantity: entity.quantity,
                                note: quantity_note(quantity, entity.quantity),
                            });
                        }
                        self.totals.confirmed += 1;
                        self.totals.registered += 1;
                        metrics::record_transition("confirmed");
                    }
                    Some(entity) => {
                        warn!(
                            key = %key,
                            existing = ?entity.external_item_id,
                            duplicate = %item_id,
                            "Entity already registered, ignoring duplicate result"
                        );
                    }
                    None => {
                        warn!(key = %key, item_id = %item_id, "Registration outlived its entity, removing record");
                        commands.push(BackendCommand::Remove {
                            item_id,
                            name,
                            quantity,
                            reason: ORPHANED_REASON.to_string(),
                        });
                    }
                }
                for command in commands {
                    self.enqueue(command);
                }
            }
            BackendOutcome::RegisterFailed { key, lifetime, error } => {
                if let Some(entity) = self.store.get_lifetime_mut(&key, lifetime) {
                    entity.registration_pending = false;
                }
                if error.is_permanent() {
                    self.disable_backend(error.to_string());
                } else {
                    warn!(key = %key, error = %error, "Registration failed, retrying next frame");
                }
            }
            BackendOutcome::Disabled { reason } => self.disable_backend(reason),
        }
    }

    // =========================================================================
    // Summary
    // =========================================================================

    pub fn summary(&self) -> InventorySummary {
        let min_frames = self.config.min_frames_for_registration;
        let entities: Vec<_> = self.store.iter().map(|e| e.snapshot(min_frames)).collect();
        let (backend_enabled, backend_disabled_reason) = match &self.backend {
            BackendStatus::Enabled => (true, None),
            BackendStatus::Disabled { reason } => (false, Some(reason.clone())),
        };

        InventorySummary {
            frames: self.frame,
            backend: self.backend_name.clone(),
            backend_enabled,
            backend_disabled_reason,
            tracked: entities.len(),
            confirmed: entities
                .iter()
                .filter(|e| e.state == LifecycleState::Confirmed)
                .count(),
            registered: entities.iter().filter(|e| e.item_id.is_some()).count(),
            totals: self.totals,
            dropped_commands: 0,
            entities,
        }
    }
}

fn quantity_note(previous: u32, current: u32) -> String {
    format!("Cantidad actualizada: {} -> {}", previous, current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::RegistrarError;
    use shelfscan_models::{BoundingBox, ItemId, PriorityTier};

    fn apple(confidence: f64) -> Detection {
        Detection::new("apple", "fruta", confidence, BoundingBox::new(0, 0, 10, 10), PriorityTier::High)
    }

    fn apples(n: usize) -> Vec<Detection> {
        (0..n).map(|_| apple(0.9)).collect()
    }

    fn key() -> IdentityKey {
        IdentityKey::new("fruta", "apple")
    }

    fn config(min_frames: u64, disappearance: u64) -> TrackingConfig {
        TrackingConfig {
            disappearance_threshold: disappearance,
            min_frames_for_registration: min_frames,
            ..TrackingConfig::default()
        }
    }

    fn registers(commands: &[BackendCommand]) -> Vec<u32> {
        commands
            .iter()
            .filter_map(|c| match c {
                BackendCommand::Register { item, .. } => Some(item.quantity),
                _ => None,
            })
            .collect()
    }

    fn updates(commands: &[BackendCommand]) -> Vec<u32> {
        commands
            .iter()
            .filter_map(|c| match c {
                BackendCommand::UpdateQuantity { quantity, .. } => Some(*quantity),
                _ => None,
            })
            .collect()
    }

    /// Answer a pending Register command with a fresh id.
    fn answer(reconciler: &mut Reconciler, commands: &[BackendCommand]) -> Option<ItemId> {
        let mut registered = None;
        for command in commands {
            if let BackendCommand::Register { key, lifetime, item } = command {
                let item_id = ItemId::generate();
                reconciler.apply_outcome(BackendOutcome::Registered {
                    key: key.clone(),
                    lifetime: *lifetime,
                    item_id: item_id.clone(),
                    name: item.name.clone(),
                    quantity: item.quantity,
                });
                registered = Some(item_id);
            }
        }
        registered
    }

    #[test]
    fn test_quantity_scenario_registers_once_at_frame_30() {
        let mut reconciler = Reconciler::new(TrackingConfig::default(), "memory");
        let mut quantities = Vec::new();
        let mut all_commands = Vec::new();

        for frame in 1..=34u64 {
            let count = match frame {
                1..=2 => 1,
                3..=29 => 2,
                _ => 3,
            };
            let report = reconciler.process_frame(&apples(count));
            quantities.push(reconciler.store().get(&key()).unwrap().quantity);

            let commands = reconciler.take_commands();
            if frame == 30 {
                assert_eq!(report.registrations_requested, vec![key()]);
                assert_eq!(registers(&commands), vec![3]);
            } else {
                assert!(registers(&commands).is_empty(), "frame {}", frame);
            }
            answer(&mut reconciler, &commands);
            all_commands.extend(commands);
            all_commands.extend(reconciler.take_commands());
        }

        let mut expected = vec![1, 1];
        expected.extend(std::iter::repeat(2).take(27));
        expected.extend(std::iter::repeat(3).take(5));
        assert_eq!(quantities, expected);
        assert_eq!(registers(&all_commands), vec![3]);
        assert!(updates(&all_commands).is_empty());

        let entity = reconciler.store().get(&key()).unwrap();
        assert!(entity.is_confirmed());
        assert!(entity.external_item_id.is_some());
    }

    #[test]
    fn test_growth_after_confirmation_uses_update_quantity() {
        let mut reconciler = Reconciler::new(config(3, 100), "memory");
        for _ in 0..3 {
            reconciler.process_frame(&apples(1));
        }
        let commands = reconciler.take_commands();
        let item_id = answer(&mut reconciler, &commands).unwrap();
        reconciler.take_commands();

        reconciler.process_frame(&apples(2));
        let commands = reconciler.take_commands();
        assert!(registers(&commands).is_empty());
        match commands.as_slice() {
            [BackendCommand::UpdateQuantity { item_id: id, quantity, .. }] => {
                assert_eq!(id, &item_id);
                assert_eq!(*quantity, 2);
            }
            other => panic!("unexpected commands: {:?}", other),
        }

        // Decrease stays local
        reconciler.process_frame(&apples(1));
        assert!(reconciler.take_commands().is_empty());
        assert_eq!(reconciler.store().get(&key()).unwrap().quantity, 1);
    }

    #[test]
    fn test_pending_registration_is_not_reissued() {
        let mut reconciler = Reconciler::new(config(2, 100), "memory");
        reconciler.process_frame(&apples(1));
        reconciler.process_frame(&apples(1));
        assert_eq!(registers(&reconciler.take_commands()), vec![1]);

        reconciler.process_frame(&apples(1));
        reconciler.process_frame(&apples(1));
        assert!(reconciler.take_commands().is_empty());
    }

    #[test]
    fn test_transient_failure_retries_next_frame() {
        let mut reconciler = Reconciler::new(config(2, 100), "memory");
        reconciler.process_frame(&apples(1));
        reconciler.process_frame(&apples(1));
        let commands = reconciler.take_commands();
        let lifetime = match &commands[0] {
            BackendCommand::Register { lifetime, .. } => *lifetime,
            other => panic!("unexpected {:?}", other),
        };

        reconciler.apply_outcome(BackendOutcome::RegisterFailed {
            key: key(),
            lifetime,
            error: RegistrarError::transient("timeout"),
        });
        let entity = reconciler.store().get(&key()).unwrap();
        assert_eq!(entity.state, LifecycleState::Provisional);
        assert!(!entity.registration_pending);

        reconciler.process_frame(&apples(1));
        assert_eq!(registers(&reconciler.take_commands()), vec![1]);
    }

    #[test]
    fn test_late_registration_after_growth_sends_one_update() {
        let mut reconciler = Reconciler::new(config(2, 100), "memory");
        reconciler.process_frame(&apples(1));
        reconciler.process_frame(&apples(1));
        let commands = reconciler.take_commands();

        // Count rises while the register call is in flight
        reconciler.process_frame(&apples(4));
        assert!(reconciler.take_commands().is_empty());

        answer(&mut reconciler, &commands);
        let follow_up = reconciler.take_commands();
        assert_eq!(updates(&follow_up), vec![4]);
        assert!(follow_up
            .iter()
            .any(|c| matches!(c, BackendCommand::AddSynonyms { .. })));
    }

    #[test]
    fn test_disappearance_removes_once_and_new_sighting_gets_new_entity() {
        let mut reconciler = Reconciler::new(config(2, 5), "memory");
        reconciler.process_frame(&apples(2));
        reconciler.process_frame(&apples(2));
        let commands = reconciler.take_commands();
        let first_id = answer(&mut reconciler, &commands).unwrap();
        let first_lifetime = reconciler.store().get(&key()).unwrap().lifetime;
        reconciler.take_commands();

        let mut removes = Vec::new();
        for _ in 0..5 {
            let report = reconciler.process_frame(&[]);
            for command in reconciler.take_commands() {
                if let BackendCommand::Remove { item_id, quantity, reason, .. } = command {
                    removes.push((item_id, quantity, reason));
                }
            }
            if !report.removed.is_empty() {
                assert_eq!(report.frame, 7);
            }
        }
        assert_eq!(removes, vec![(first_id.clone(), 2, DISAPPEARED_REASON.to_string())]);
        assert!(reconciler.store().get(&key()).is_none());

        // Further silent frames do nothing
        reconciler.process_frame(&[]);
        assert!(reconciler.take_commands().is_empty());

        reconciler.process_frame(&apples(1));
        let entity = reconciler.store().get(&key()).unwrap();
        assert_ne!(entity.lifetime, first_lifetime);
        assert_eq!(entity.state, LifecycleState::Provisional);
        assert!(entity.external_item_id.is_none());

        reconciler.process_frame(&apples(1));
        let commands = reconciler.take_commands();
        let second_id = answer(&mut reconciler, &commands).unwrap();
        assert_ne!(second_id, first_id);
        assert_eq!(reconciler.totals().removed, 1);
    }

    #[test]
    fn test_provisional_disappearance_issues_no_remove() {
        let mut reconciler = Reconciler::new(config(30, 3), "memory");
        reconciler.process_frame(&apples(1));
        for _ in 0..3 {
            reconciler.process_frame(&[]);
        }
        assert!(reconciler.store().is_empty());
        assert!(reconciler.take_commands().is_empty());
    }

    #[test]
    fn test_orphaned_registration_is_compensated() {
        let mut reconciler = Reconciler::new(config(1, 1), "memory");
        reconciler.process_frame(&apples(1));
        let commands = reconciler.take_commands();

        // Entity disappears before the result arrives
        reconciler.process_frame(&[]);
        assert!(reconciler.store().is_empty());

        let item_id = answer(&mut reconciler, &commands).unwrap();
        match reconciler.take_commands().as_slice() {
            [BackendCommand::Remove { item_id: id, reason, .. }] => {
                assert_eq!(id, &item_id);
                assert_eq!(reason, ORPHANED_REASON);
            }
            other => panic!("unexpected commands: {:?}", other),
        }
    }

    #[test]
    fn test_permanent_error_confirms_locally() {
        let mut reconciler = Reconciler::new(config(2, 100), "sheets");
        reconciler.process_frame(&apples(1));
        reconciler.process_frame(&apples(1));
        let commands = reconciler.take_commands();
        let lifetime = match &commands[0] {
            BackendCommand::Register { lifetime, .. } => *lifetime,
            other => panic!("unexpected {:?}", other),
        };
        reconciler.apply_outcome(BackendOutcome::RegisterFailed {
            key: key(),
            lifetime,
            error: RegistrarError::permanent("no usable sheet"),
        });

        let report = reconciler.process_frame(&apples(3));
        assert_eq!(report.confirmed, vec![key()]);
        assert!(reconciler.take_commands().is_empty());

        let entity = reconciler.store().get(&key()).unwrap();
        assert!(entity.is_confirmed());
        assert!(entity.external_item_id.is_none());
        assert_eq!(entity.total_detections, 3);

        let summary = reconciler.summary();
        assert!(!summary.backend_enabled);
        assert_eq!(summary.confirmed, 1);
        assert_eq!(summary.registered, 0);
    }

    #[test]
    fn test_local_only_tracks_like_enabled() {
        let mut local = Reconciler::local_only(config(3, 100), "INVENTORY_BACKEND=none");
        let mut remote = Reconciler::new(config(3, 100), "memory");
        for count in [1, 2, 2, 1] {
            local.process_frame(&apples(count));
            remote.process_frame(&apples(count));
        }
        let l = local.store().get(&key()).unwrap();
        let r = remote.store().get(&key()).unwrap();
        assert_eq!(l.total_detections, r.total_detections);
        assert_eq!(l.quantity, r.quantity);
        assert!(l.dwell_satisfied(3) && r.dwell_satisfied(3));
        assert!(local.take_commands().is_empty());
    }

    #[test]
    fn test_filtering_and_context_counts() {
        let mut reconciler = Reconciler::new(TrackingConfig::default(), "memory");
        let frame = vec![
            apple(0.9),
            apple(0.3),
            Detection::new("laptop", "contexto", 0.8, BoundingBox::new(0, 0, 5, 5), PriorityTier::Low),
            Detection::new("fork", "utensilio", 0.5, BoundingBox::new(0, 0, 5, 5), PriorityTier::Low),
        ];
        let report = reconciler.process_frame(&frame);
        assert_eq!(report.tracked_detections, 1);
        assert_eq!(report.discarded_detections, 2);
        assert_eq!(report.context_detections, 1);
        assert_eq!(report.created, vec![key()]);
        assert_eq!(reconciler.store().len(), 1);
    }

    #[test]
    fn test_avg_confidence_over_frames() {
        let mut reconciler = Reconciler::new(TrackingConfig::default(), "memory");
        for confidence in [0.80, 0.90, 0.70] {
            reconciler.process_frame(&[apple(confidence)]);
        }
        let avg = reconciler.store().get(&key()).unwrap().avg_confidence();
        assert!((avg - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_register_at_most_once_under_varying_counts() {
        let mut reconciler = Reconciler::new(config(5, 4), "memory");
        let mut register_calls = 0;
        let mut seed: u64 = 42;

        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let count = ((seed >> 33) % 4) as usize;
            let report = reconciler.process_frame(&apples(count));
            let commands = reconciler.take_commands();
            register_calls += registers(&commands).len();
            answer(&mut reconciler, &commands);
            reconciler.take_commands();

            // Each confirmed lifetime was registered exactly once
            assert!(register_calls as u64 >= reconciler.totals().registered);
            assert_eq!(register_calls as u64, reconciler.totals().registered);
            if let Some(entity) = reconciler.store().get(&key()) {
                assert!(entity.quantity as usize <= 3);
            }
            assert!(report.removed.len() <= 1);
        }
    }
}
