//! FieldStore — per-user durable field values with sync bookkeeping.
//!
//! Wraps any [`FieldBackend`] and owns the rules the backend does not know
//! about: monotonic modification times, the push-snapshot guard on
//! `mark_synced`, and per-key serialization of read-modify-write updates.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;

use crate::config::FieldSyncConfig;
use crate::error::StoreError;
use crate::types::{self, FieldEntry, FieldKey, PushSnapshot, Timestamp, UserId};

use super::memory::MemoryBackend;
use super::traits::{FieldBackend, ScanFilter};

pub struct FieldStore {
    backend: Box<dyn FieldBackend>,
    /// Per-key locks serializing updates to the same key.
    locks: Mutex<HashMap<FieldKey, Arc<Mutex<()>>>>,
}

impl FieldStore {
    pub fn new(backend: impl FieldBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// In-memory store; nothing persists past the process.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Build the store described by `config`: a SQLite file when
    /// `database_path` is set, otherwise an in-memory store.
    pub fn from_config(config: &FieldSyncConfig) -> Result<Self, StoreError> {
        match &config.database_path {
            #[cfg(feature = "sqlite")]
            Some(path) => Ok(Self::new(super::sqlite::SqliteBackend::open(path)?)),
            #[cfg(not(feature = "sqlite"))]
            Some(path) => Err(StoreError::Io(format!(
                "database_path {} requires the `sqlite` feature",
                path.display()
            ))),
            None => Ok(Self::in_memory()),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current local value, or `None` if the key was never written.
    pub fn get(&self, key: &FieldKey) -> Result<Option<String>, StoreError> {
        Ok(self.backend.get_raw(key)?.map(|e| e.value))
    }

    pub fn get_entry(&self, key: &FieldKey) -> Result<Option<FieldEntry>, StoreError> {
        self.backend.get_raw(key)
    }

    /// Entries of `user` whose value has not been acknowledged by the remote.
    pub fn dirty_entries(&self, user: &UserId) -> Result<Vec<FieldEntry>, StoreError> {
        self.backend.scan_raw(user, &ScanFilter::dirty())
    }

    pub fn list_by_category(
        &self,
        user: &UserId,
        category: &str,
    ) -> Result<Vec<FieldEntry>, StoreError> {
        self.backend.scan_raw(user, &ScanFilter::category(category))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write a local value. The returned entry is dirty.
    pub fn put(&self, key: &FieldKey, value: &str, category: &str) -> Result<FieldEntry, StoreError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock();

        let prev = self.backend.get_raw(key)?;
        let mut modified = types::now();
        let mut last_synced_at = None;

        if let Some(prev) = &prev {
            modified = modified.max(prev.last_modified_at);
            // A fresh write must never look acknowledged, even under clock skew.
            if let Some(synced) = prev.last_synced_at {
                if synced >= modified {
                    modified = synced + Duration::microseconds(1);
                }
            }
            last_synced_at = prev.last_synced_at;
        }

        let entry = FieldEntry {
            key: key.clone(),
            category: category.to_string(),
            value: value.to_string(),
            last_modified_at: modified,
            last_synced_at,
        };
        self.backend.put_raw(&entry)?;
        Ok(entry)
    }

    /// Record that the remote acknowledged the value in `snapshot`.
    ///
    /// Returns `false` without writing when the entry no longer matches the
    /// snapshot (a newer local write happened while the push was in flight).
    pub fn mark_synced(
        &self,
        key: &FieldKey,
        at: Timestamp,
        snapshot: &PushSnapshot,
    ) -> Result<bool, StoreError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock();

        let Some(mut entry) = self.backend.get_raw(key)? else {
            return Ok(false);
        };
        if !snapshot.matches(&entry) {
            return Ok(false);
        }

        entry.last_synced_at = Some(at.max(entry.last_modified_at));
        self.backend.put_raw(&entry)?;
        Ok(true)
    }

    /// Adopt a value pulled from the remote. The returned entry is clean.
    ///
    /// `expected` is the entry the caller read before fetching. Returns
    /// `None` without writing when the stored entry no longer equals it.
    pub fn apply_remote(
        &self,
        key: &FieldKey,
        value: &str,
        category: &str,
        at: Timestamp,
        expected: Option<&FieldEntry>,
    ) -> Result<Option<FieldEntry>, StoreError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock();

        let prev = self.backend.get_raw(key)?;
        if prev.as_ref() != expected {
            return Ok(None);
        }
        let modified = match &prev {
            Some(prev) => at.max(prev.last_modified_at),
            None => at,
        };

        let entry = FieldEntry {
            key: key.clone(),
            category: category.to_string(),
            value: value.to_string(),
            last_modified_at: modified,
            last_synced_at: Some(modified),
        };
        self.backend.put_raw(&entry)?;
        Ok(Some(entry))
    }

    // -----------------------------------------------------------------------
    // Lock management
    // -----------------------------------------------------------------------

    fn key_lock(&self, key: &FieldKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
