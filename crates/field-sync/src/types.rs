//! Core data model: keys, persisted entries, and observable sync status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock timestamp used for all field bookkeeping.
pub type Timestamp = DateTime<Utc>;

/// Current time, truncated to microseconds so that values survive a round
/// trip through storage unchanged.
pub fn now() -> Timestamp {
    let t = Utc::now();
    DateTime::from_timestamp_micros(t.timestamp_micros()).unwrap_or(t)
}

// ============================================================================
// Keys
// ============================================================================

/// Opaque authenticated user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies one field's value for one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub user_id: UserId,
    pub field_id: String,
}

impl FieldKey {
    pub fn new(user_id: impl Into<UserId>, field_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            field_id: field_id.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.field_id)
    }
}

// ============================================================================
// FieldEntry
// ============================================================================

/// The persisted unit — one per [`FieldKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub key: FieldKey,
    /// Grouping tag used for queries; never consulted by sync logic.
    pub category: String,
    /// Opaque text. Structured values are encoded by the caller.
    pub value: String,
    pub last_modified_at: Timestamp,
    /// `None` means the entry has never been confirmed by the remote.
    pub last_synced_at: Option<Timestamp>,
}

impl FieldEntry {
    /// True when the current value has not been acknowledged by the remote.
    pub fn dirty(&self) -> bool {
        match self.last_synced_at {
            None => true,
            Some(synced) => synced < self.last_modified_at,
        }
    }

    pub fn never_synced(&self) -> bool {
        self.last_synced_at.is_none()
    }

    /// Capture the guard used when this entry's value is pushed.
    pub fn snapshot(&self) -> PushSnapshot {
        PushSnapshot {
            value: self.value.clone(),
            modified_at: self.last_modified_at,
        }
    }
}

/// State of an entry at the moment its value was handed to the remote.
///
/// `mark_synced` only applies when the stored entry still matches, so a write
/// racing with an in-flight push keeps the entry dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSnapshot {
    pub value: String,
    pub modified_at: Timestamp,
}

impl PushSnapshot {
    pub fn matches(&self, entry: &FieldEntry) -> bool {
        entry.last_modified_at == self.modified_at && entry.value == self.value
    }
}

// ============================================================================
// SyncStatus
// ============================================================================

/// Observable per-field sync state. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Syncing,
    Offline,
    /// The remote refused the current value; distinct from `Offline`.
    Rejected,
    /// The latest value could not be written to local storage and exists
    /// only in memory while the write is retried.
    Unsaved,
}

impl SyncStatus {
    /// Severity used when folding several statuses into one.
    fn severity(self) -> u8 {
        match self {
            Self::Synced => 0,
            Self::Syncing => 1,
            Self::Offline => 2,
            Self::Rejected => 3,
            Self::Unsaved => 4,
        }
    }

    /// The more severe of two statuses.
    pub fn worst(self, other: SyncStatus) -> SyncStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Synced => "synced",
            Self::Syncing => "syncing",
            Self::Offline => "offline",
            Self::Rejected => "rejected",
            Self::Unsaved => "unsaved",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
