//! StatusBus — per-key typed pub/sub for [`SyncStatus`] changes.
//!
//! The coordinator publishes; field controllers subscribe to their own key.
//! Listeners are stored as `Arc<dyn Fn>` so the publish path snapshots them
//! under the lock and calls them after releasing it, which lets a listener
//! subscribe or unsubscribe from inside its callback without deadlocking.
//!
//! Only changes are delivered: publishing the status a key already has is a
//! no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{FieldKey, SyncStatus};

use super::event::StatusEvent;

/// Returned by [`StatusBus::subscribe`]; pass to [`StatusBus::unsubscribe`].
pub type ListenerId = u64;

pub type StatusListener = dyn Fn(&StatusEvent) + Send + Sync;

#[derive(Default)]
pub struct StatusBus {
    listeners: Mutex<HashMap<FieldKey, Vec<(ListenerId, Arc<StatusListener>)>>>,
    current: Mutex<HashMap<FieldKey, SyncStatus>>,
    next_id: AtomicU64,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        key: &FieldKey,
        callback: impl Fn(&StatusEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners
            .lock()
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Safe to call with an unknown or already-removed id.
    pub fn unsubscribe(&self, key: &FieldKey, id: ListenerId) {
        let mut listeners = self.listeners.lock();
        if let Some(list) = listeners.get_mut(key) {
            list.retain(|(lid, _)| *lid != id);
            if list.is_empty() {
                listeners.remove(key);
            }
        }
    }

    /// Last published status for `key`.
    pub fn status(&self, key: &FieldKey) -> Option<SyncStatus> {
        self.current.lock().get(key).copied()
    }

    /// Record `status` for `key` and notify its listeners if it changed.
    pub fn publish(&self, key: &FieldKey, status: SyncStatus) {
        let previous = self.current.lock().insert(key.clone(), status);
        if previous == Some(status) {
            return;
        }

        let snapshot: Vec<Arc<StatusListener>> = {
            let listeners = self.listeners.lock();
            listeners
                .get(key)
                .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };

        let event = StatusEvent {
            key: key.clone(),
            status,
            previous,
        };
        for cb in snapshot {
            cb(&event);
        }
    }

    /// Number of listeners registered for `key`.
    pub fn listener_count(&self, key: &FieldKey) -> usize {
        self.listeners.lock().get(key).map_or(0, Vec::len)
    }
}
