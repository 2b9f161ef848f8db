//! In-memory field backend.
//!
//! Holds all entries in a `BTreeMap` behind a `parking_lot::Mutex`. Nothing
//! survives the process; used for tests and for sessions configured without
//! a database path when the `sqlite` feature is disabled.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::StoreError;
use crate::types::{FieldEntry, FieldKey, UserId};

use super::traits::{FieldBackend, ScanFilter};

#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<FieldKey, FieldEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all users.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl FieldBackend for MemoryBackend {
    fn get_raw(&self, key: &FieldKey) -> Result<Option<FieldEntry>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put_raw(&self, entry: &FieldEntry) -> Result<(), StoreError> {
        self.entries.lock().insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn scan_raw(&self, user: &UserId, filter: &ScanFilter) -> Result<Vec<FieldEntry>, StoreError> {
        let entries = self.entries.lock();
        // BTreeMap order is (user_id, field_id), matching the SQLite ORDER BY.
        Ok(entries
            .values()
            .filter(|e| &e.key.user_id == user)
            .filter(|e| !filter.dirty_only || e.dirty())
            .filter(|e| {
                filter
                    .category
                    .as_ref()
                    .map_or(true, |c| &e.category == c)
            })
            .cloned()
            .collect())
    }
}
