//! Sync-specific types: push outcomes, batch reports, observability events
//! and coordinator options.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::FieldSyncConfig;
use crate::connectivity::Connectivity;
use crate::error::RemoteError;
use crate::reactive::StatusBus;
use crate::remote::RemoteFieldStore;
use crate::session::UserSession;
use crate::storage::FieldStore;
use crate::types::{FieldEntry, FieldKey, UserId};

use super::policy::ConflictResolver;

// ============================================================================
// Push outcomes
// ============================================================================

/// Result of one push attempt for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote confirmed the value.
    Acknowledged,
    /// Not attempted: the coordinator is offline. The push stays queued.
    Deferred,
    /// Retryable failure. The value is requeued with backoff.
    Retrying { error: String },
    /// The remote refused the value. It is not retried.
    Rejected { error: String },
    /// The remote confirmed, but recording that locally failed. The entry
    /// stays dirty and is pushed again by the next full sync.
    LocalFailure { error: String },
    /// A queued push was withdrawn before it started.
    Cancelled,
}

/// Aggregated result of a [`sync_all`](super::SyncCoordinator::sync_all) batch.
///
/// Field failures are independent: one field failing never aborts the batch.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub attempted: usize,
    pub pushed: usize,
    pub deferred: usize,
    pub retrying: usize,
    pub rejected: usize,
    pub local_failures: usize,
    /// Outcome per field id.
    pub outcomes: BTreeMap<String, PushOutcome>,
    /// Failures that prevented part of the batch from running at all.
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn record(&mut self, field_id: impl Into<String>, outcome: PushOutcome) {
        match &outcome {
            PushOutcome::Acknowledged => self.pushed += 1,
            PushOutcome::Deferred | PushOutcome::Cancelled => self.deferred += 1,
            PushOutcome::Retrying { .. } => self.retrying += 1,
            PushOutcome::Rejected { .. } => self.rejected += 1,
            PushOutcome::LocalFailure { .. } => self.local_failures += 1,
        }
        self.outcomes.insert(field_id.into(), outcome);
    }

    /// True when every attempted field was acknowledged.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.pushed == self.attempted
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Result of pulling one field and applying the conflict policy.
#[derive(Debug, Clone)]
pub enum Reconciled {
    /// The remote value replaced the local one.
    AdoptedRemote(FieldEntry),
    /// Local and remote already agree; the entry is now marked clean.
    InSync(FieldEntry),
    /// The local value (if any) was kept; a dirty one has been enqueued.
    KeptLocal(Option<FieldEntry>),
    /// The pull failed; nothing changed locally.
    Unavailable(RemoteError),
}

// ============================================================================
// Events
// ============================================================================

/// Observability event emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Pushed { key: FieldKey },
    PushFailed { key: FieldKey, error: String, will_retry: bool },
    Pulled { key: FieldKey, found: bool },
    PullFailed { key: FieldKey, error: RemoteError },
    ConnectivityChanged(Connectivity),
    PeriodicSync { user: UserId, enqueued: usize },
}

pub type SyncEventCallback = dyn Fn(&SyncEvent) + Send + Sync;

// ============================================================================
// Options
// ============================================================================

/// Everything a [`SyncCoordinator`](super::SyncCoordinator) needs to start.
pub struct SyncCoordinatorOptions {
    pub store: Arc<FieldStore>,
    pub remote: Arc<dyn RemoteFieldStore>,
    pub session: Arc<dyn UserSession>,
    pub connectivity: watch::Receiver<Connectivity>,
    pub status: Arc<StatusBus>,
    pub config: FieldSyncConfig,
    /// Conflict policy (`None` = [`LocalWins`](super::policy::LocalWins)).
    pub resolver: Option<Arc<dyn ConflictResolver>>,
    /// Called for each sync event.
    pub on_event: Option<Arc<SyncEventCallback>>,
}
