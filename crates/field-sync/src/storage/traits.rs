//! Storage backend trait for the field store.
//!
//! `FieldBackend` is the narrow raw I/O trait implemented by concrete
//! backends (SQLite, in-memory). It has no notion of sync policy: the
//! [`FieldStore`](super::FieldStore) layered on top owns timestamps,
//! per-key serialization and the push-snapshot guard.

use crate::error::StoreError;
use crate::types::{FieldEntry, FieldKey, UserId};

/// Filter applied by [`FieldBackend::scan_raw`].
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Only entries whose value has not been acknowledged by the remote.
    pub dirty_only: bool,
    /// Only entries tagged with this category.
    pub category: Option<String>,
}

impl ScanFilter {
    pub fn dirty() -> Self {
        Self {
            dirty_only: true,
            category: None,
        }
    }

    pub fn category(category: impl Into<String>) -> Self {
        Self {
            dirty_only: false,
            category: Some(category.into()),
        }
    }
}

/// Low-level field persistence.
///
/// Implementors must be `Send + Sync`; every method is synchronous and must
/// never wait on the network. `put_raw` must be durable before it returns.
pub trait FieldBackend: Send + Sync {
    /// Fetch one entry. `Ok(None)` when the key has never been written.
    fn get_raw(&self, key: &FieldKey) -> Result<Option<FieldEntry>, StoreError>;

    /// Insert or replace the entry for `entry.key`.
    fn put_raw(&self, entry: &FieldEntry) -> Result<(), StoreError>;

    /// All entries of `user` matching `filter`, ordered by field id.
    fn scan_raw(&self, user: &UserId, filter: &ScanFilter) -> Result<Vec<FieldEntry>, StoreError>;
}
