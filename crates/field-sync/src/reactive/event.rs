//! StatusEvent — a change of one field's sync status.

use crate::types::{FieldKey, SyncStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub key: FieldKey,
    pub status: SyncStatus,
    /// `None` the first time a status is published for the key.
    pub previous: Option<SyncStatus>,
}
