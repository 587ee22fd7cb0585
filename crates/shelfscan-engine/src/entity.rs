//! Tracked entities and the store that owns them.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::Serialize;
use shelfscan_models::{Detection, IdentityKey, ItemId, LifecycleState};

use crate::identity::display_name;

/// One logical item type observed over time.
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    /// Generation number, unique for each entity ever created by a store.
    pub lifetime: u64,
    pub identity_key: IdentityKey,
    /// Most recent detection for this key.
    pub representative: Detection,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    /// Frames in which the key was observed.
    pub total_detections: u64,
    pub confidence_sum: f64,
    /// Simultaneous instances seen in the most recent frame with a sighting.
    pub quantity: u32,
    pub state: LifecycleState,
    /// Set once, on the Provisional -> Confirmed transition.
    pub external_item_id: Option<ItemId>,
    /// A register command is queued or in flight.
    pub registration_pending: bool,
}

impl TrackedEntity {
    fn new(lifetime: u64, key: IdentityKey, detection: Detection, count: u32, frame: u64) -> Self {
        Self {
            lifetime,
            identity_key: key,
            confidence_sum: detection.confidence,
            representative: detection,
            first_seen_frame: frame,
            last_seen_frame: frame,
            total_detections: 1,
            quantity: count,
            state: LifecycleState::Provisional,
            external_item_id: None,
            registration_pending: false,
        }
    }

    /// Fold one frame's sighting in. Returns the previous quantity.
    pub fn observe(&mut self, detection: Detection, count: u32, frame: u64) -> u32 {
        let previous = self.quantity;
        self.last_seen_frame = frame;
        self.total_detections += 1;
        self.confidence_sum += detection.confidence;
        self.representative = detection;
        self.quantity = count;
        previous
    }

    /// Arithmetic mean over every frame the key was observed.
    pub fn avg_confidence(&self) -> f64 {
        if self.total_detections == 0 {
            0.0
        } else {
            self.confidence_sum / self.total_detections as f64
        }
    }

    pub fn frames_missing(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_seen_frame)
    }

    pub fn dwell_satisfied(&self, min_frames: u64) -> bool {
        self.total_detections >= min_frames
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == LifecycleState::Confirmed
    }

    pub fn display_name(&self) -> String {
        display_name(&self.representative.class_name)
    }

    pub fn category(&self) -> &str {
        &self.representative.category
    }

    pub fn snapshot(&self, min_frames: u64) -> EntitySnapshot {
        EntitySnapshot {
            identity_key: self.identity_key.clone(),
            name: self.display_name(),
            category: self.category().to_string(),
            state: self.state,
            quantity: self.quantity,
            total_detections: self.total_detections,
            avg_confidence: self.avg_confidence(),
            first_seen_frame: self.first_seen_frame,
            last_seen_frame: self.last_seen_frame,
            item_id: self.external_item_id.clone(),
            dwell_satisfied: self.dwell_satisfied(min_frames),
        }
    }
}

/// Serializable view of an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub identity_key: IdentityKey,
    pub name: String,
    pub category: String,
    pub state: LifecycleState,
    pub quantity: u32,
    pub total_detections: u64,
    pub avg_confidence: f64,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    pub item_id: Option<ItemId>,
    pub dwell_satisfied: bool,
}

/// At most one live entity per identity key, iterated in key order.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: BTreeMap<IdentityKey, TrackedEntity>,
    next_lifetime: u64,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a key that has no live entity.
    pub fn create(
        &mut self,
        key: IdentityKey,
        detection: Detection,
        count: u32,
        frame: u64,
    ) -> &mut TrackedEntity {
        self.next_lifetime += 1;
        let entity = TrackedEntity::new(self.next_lifetime, key.clone(), detection, count, frame);
        match self.entities.entry(key) {
            Entry::Occupied(mut slot) => {
                slot.insert(entity);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(entity),
        }
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&TrackedEntity> {
        self.entities.get(key)
    }

    pub fn get_mut(&mut self, key: &IdentityKey) -> Option<&mut TrackedEntity> {
        self.entities.get_mut(key)
    }

    /// Live entity for `key` belonging to the given lifetime.
    pub fn get_lifetime_mut(&mut self, key: &IdentityKey, lifetime: u64) -> Option<&mut TrackedEntity> {
        self.entities
            .get_mut(key)
            .filter(|entity| entity.lifetime == lifetime)
    }

    pub fn remove(&mut self, key: &IdentityKey) -> Option<TrackedEntity> {
        self.entities.remove(key)
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.entities.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackedEntity> {
        self.entities.values_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.entities.keys()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
