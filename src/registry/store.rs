//! Registry implementation
//!
//! The map lock is held only to look up, insert or remove a slot, never
//! across an await on a record lock. Every read or write of a record goes
//! through its own mutex, so devices never block each other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::record::{HealthSnapshot, MountState, MountpointRecord};

/// Exclusive access to one device's record
pub type RecordGuard = OwnedMutexGuard<MountpointRecord>;

type Slot = Arc<Mutex<MountpointRecord>>;

/// Authoritative map from device id to mountpoint record
#[derive(Default)]
pub struct Registry {
    records: RwLock<HashMap<String, Slot>>,

    /// Devices reported offline to the catalog; outlives their records
    offline: std::sync::Mutex<HashSet<String>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a device's record, creating an `Absent` one if none exists
    pub async fn lock_or_insert(&self, device_id: &str) -> RecordGuard {
        loop {
            let slot = self.slot_or_insert(device_id).await;
            let guard = slot.lock_owned().await;

            // Lost a race with teardown; the slot is no longer in the map
            if !guard.retired {
                return guard;
            }
        }
    }

    /// Lock a device's record if one exists
    pub async fn lock_existing(&self, device_id: &str) -> Option<RecordGuard> {
        loop {
            let slot = self.records.read().await.get(device_id).cloned()?;
            let guard = slot.lock_owned().await;

            if !guard.retired {
                return Some(guard);
            }
        }
    }

    /// Remove a locked record from the map
    ///
    /// Anyone already waiting on the record's lock sees it retired and
    /// retries the lookup.
    pub async fn retire(&self, guard: &mut RecordGuard) {
        guard.retired = true;
        guard.transition(MountState::Absent);

        let mut records = self.records.write().await;
        let ours = records
            .get(&guard.device_id)
            .is_some_and(|slot| Arc::ptr_eq(slot, OwnedMutexGuard::mutex(guard)));
        if ours {
            records.remove(&guard.device_id);
            tracing::debug!(device = %guard.device_id, "Mountpoint record removed");
        }
    }

    /// Snapshot of all slots, for iteration without holding the map lock
    pub(crate) async fn slots(&self) -> Vec<(String, Slot)> {
        self.records
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect()
    }

    /// Snapshots of every record that is not `Absent`
    pub async fn snapshots(&self) -> Vec<HealthSnapshot> {
        let mut out = Vec::new();
        for (_, slot) in self.slots().await {
            let record = slot.lock().await;
            if !record.retired && record.state != MountState::Absent {
                out.push(record.snapshot());
            }
        }
        out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        out
    }

    /// Remember that a device was reported offline
    ///
    /// Returns false if it already was.
    pub fn mark_offline(&self, device_id: &str) -> bool {
        self.offline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device_id.to_string())
    }

    /// Forget a device's offline report, returning whether one existed
    pub fn clear_offline(&self, device_id: &str) -> bool {
        self.offline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(device_id)
    }

    /// Get total number of records
    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Check if the registry holds no records
    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn slot_or_insert(&self, device_id: &str) -> Slot {
        if let Some(slot) = self.records.read().await.get(device_id) {
            return Arc::clone(slot);
        }

        let mut records = self.records.write().await;
        Arc::clone(
            records
                .entry(device_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(MountpointRecord::new(device_id)))),
        )
    }
}
