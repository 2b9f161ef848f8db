//! FieldController — the per-field binding application code talks to.
//!
//! `write` updates the in-memory value and re-arms a debounce task; when the
//! task fires unsuperseded the value is persisted to the [`FieldStore`] and
//! handed to the [`SyncCoordinator`]. Intermediate values typed within one
//! debounce window are never persisted or pushed.
//!
//! Nothing here waits on the network except `open` (bounded by the cold
//! start timeout) and `force_refresh`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::reactive::{ListenerId, StatusEvent};
use crate::storage::FieldStore;
use crate::sync::queue::backoff_delay;
use crate::sync::{ReconcileMode, Reconciled, SyncCoordinator};
use crate::types::{FieldKey, SyncStatus};

/// Coarse lifecycle of a field, derived from its edit and sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPhase {
    Idle,
    /// An edit is waiting for the debounce to settle.
    Editing,
    Syncing,
}

/// What [`FieldController::force_refresh`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The remote value differed and replaced the local one.
    Updated(String),
    /// Local and remote agree, or the remote has no value.
    Unchanged,
    /// The remote could not be reached; the local value stands.
    Unavailable,
}

pub struct FieldController {
    inner: Arc<Inner>,
}

struct Inner {
    key: FieldKey,
    category: String,
    store: Arc<FieldStore>,
    coordinator: Arc<SyncCoordinator>,
    debounce: Duration,
    retry_base: Duration,
    retry_max: Duration,
    runtime: Handle,
    state: Mutex<EditState>,
}

struct EditState {
    value: String,
    /// The in-memory value has not been persisted yet.
    unsaved: bool,
    /// Bumped by every write; a debounce task only persists its own generation.
    generation: u64,
    /// Debounce task, or the retry of a put that failed.
    timer: Option<JoinHandle<()>>,
    /// Failure of the last debounced put, returned by the next write/flush.
    deferred_error: Option<StoreError>,
    /// Consecutive failed puts of the current value.
    persist_failures: u32,
}

impl FieldController {
    /// Load a field, running the cold-start pull when it has never synced.
    ///
    /// Local store failures are returned; remote failures fall back to the
    /// local value (or `default`) and leave the status `Offline`.
    pub async fn open(
        coordinator: Arc<SyncCoordinator>,
        key: FieldKey,
        category: impl Into<String>,
        default: impl Into<String>,
    ) -> Result<Self> {
        let category = category.into();
        let default = default.into();
        let store = Arc::clone(coordinator.store());

        let value = Self::load(&coordinator, &store, &key, &category)
            .await?
            .unwrap_or(default);

        let config = coordinator.config();
        let (debounce, retry_base, retry_max) = (
            config.debounce(),
            config.retry_base_delay(),
            config.retry_max_delay(),
        );
        let inner = Arc::new(Inner {
            key,
            category,
            store,
            coordinator,
            debounce,
            retry_base,
            retry_max,
            runtime: Handle::current(),
            state: Mutex::new(EditState {
                value,
                unsaved: false,
                generation: 0,
                timer: None,
                deferred_error: None,
                persist_failures: 0,
            }),
        });

        Ok(Self { inner })
    }

    /// Current stored value after any reconciliation, `None` if there is none.
    async fn load(
        coordinator: &SyncCoordinator,
        store: &FieldStore,
        key: &FieldKey,
        category: &str,
    ) -> std::result::Result<Option<String>, StoreError> {
        let entry = store.get_entry(key)?;

        if let Some(entry) = &entry {
            if !entry.never_synced() {
                if entry.dirty() {
                    coordinator.enqueue(entry);
                } else {
                    coordinator.status_bus().publish(key, SyncStatus::Synced);
                }
                return Ok(Some(entry.value.clone()));
            }
        }

        let local = entry.map(|e| e.value);
        let timeout = coordinator.config().cold_start_timeout();
        let reconciled =
            tokio::time::timeout(timeout, coordinator.reconcile(key, category, ReconcileMode::ColdStart))
                .await;

        match reconciled {
            Ok(Ok(Reconciled::AdoptedRemote(e))) | Ok(Ok(Reconciled::InSync(e))) => Ok(Some(e.value)),
            Ok(Ok(Reconciled::KeptLocal(e))) => Ok(e.map(|e| e.value).or(local)),
            Ok(Ok(Reconciled::Unavailable(err))) => {
                debug!(key = %key, error = %err, "cold-start pull failed; using local value");
                Ok(local)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!(key = %key, "cold-start pull timed out; using local value");
                coordinator.status_bus().publish(key, SyncStatus::Offline);
                Ok(local)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    pub fn key(&self) -> &FieldKey {
        &self.inner.key
    }

    pub fn category(&self) -> &str {
        &self.inner.category
    }

    /// Latest in-memory value.
    pub fn read(&self) -> String {
        self.inner.state.lock().value.clone()
    }

    /// Set the value. Returns immediately; persistence follows the debounce.
    ///
    /// Returns the error of an earlier debounced persist that failed. That
    /// value is superseded by `value`, which is persisted at the end of this
    /// debounce window.
    pub fn write(&self, value: impl Into<String>) -> Result<()> {
        let mut state = self.inner.state.lock();
        let deferred = state.deferred_error.take();

        state.value = value.into();
        state.unsaved = true;
        state.generation += 1;
        let generation = state.generation;

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let inner = Arc::clone(&self.inner);
        let debounce = self.inner.debounce;
        state.timer = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            inner.persist(Some(generation));
        }));
        drop(state);

        match deferred {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Persist a pending edit now instead of waiting for the debounce.
    ///
    /// On failure the value stays in memory and the put is retried in the
    /// background with backoff.
    pub fn flush(&self) -> Result<()> {
        if let Some(e) = self.inner.persist(None) {
            return Err(e.into());
        }
        Ok(())
    }

    /// `Unsaved` while the latest value could not be written locally.
    pub fn current_status(&self) -> SyncStatus {
        if self.inner.state.lock().persist_failures > 0 {
            return SyncStatus::Unsaved;
        }
        self.inner
            .coordinator
            .status(&self.inner.key)
            .unwrap_or(SyncStatus::Synced)
    }

    pub fn phase(&self) -> FieldPhase {
        if self.inner.state.lock().unsaved {
            return FieldPhase::Editing;
        }
        match self.current_status() {
            SyncStatus::Syncing => FieldPhase::Syncing,
            _ => FieldPhase::Idle,
        }
    }

    /// Observe status changes of this field.
    pub fn subscribe(
        &self,
        callback: impl Fn(&StatusEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner
            .coordinator
            .status_bus()
            .subscribe(&self.inner.key, callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner
            .coordinator
            .status_bus()
            .unsubscribe(&self.inner.key, id);
    }

    /// Pull the remote value now and adopt it if it differs.
    ///
    /// A pending edit is persisted first and its queued push withdrawn. When
    /// the remote value differs it then replaces that edit, in memory and in
    /// the store. If the remote is unreachable or empty, or the field was
    /// edited or pushed while the pull was outstanding, the local value
    /// stands and stays scheduled.
    pub async fn force_refresh(&self) -> Result<RefreshOutcome> {
        self.flush()?;
        let generation = self.inner.state.lock().generation;

        let reconciled = self
            .inner
            .coordinator
            .reconcile(&self.inner.key, &self.inner.category, ReconcileMode::ForceRefresh)
            .await?;

        match reconciled {
            Reconciled::AdoptedRemote(entry) => {
                let mut state = self.inner.state.lock();
                // A write made during the pull is newer than the remote value.
                if state.generation == generation {
                    state.value = entry.value.clone();
                }
                Ok(RefreshOutcome::Updated(entry.value))
            }
            Reconciled::InSync(_) | Reconciled::KeptLocal(_) => Ok(RefreshOutcome::Unchanged),
            Reconciled::Unavailable(_) => Ok(RefreshOutcome::Unavailable),
        }
    }

    /// Tear the field down: persist a pending edit and stop its debounce task.
    /// In-flight pushes are left to complete.
    pub fn close(self) -> Result<()> {
        self.flush()
    }
}

impl Drop for FieldController {
    fn drop(&mut self) {
        if let Some(e) = self.inner.persist(None) {
            warn!(key = %self.inner.key, error = %e, "failed to persist field on teardown; retrying");
        }
    }
}

impl Inner {
    /// Persist the in-memory value if it is unsaved. `generation` restricts
    /// the persist to a specific debounce round; `None` forces it.
    ///
    /// A failed put publishes `Unsaved` and re-arms the timer with backoff.
    /// Returns the store error, which is instead kept for the next `write`
    /// when the persist came from the timer.
    fn persist(self: &Arc<Self>, generation: Option<u64>) -> Option<StoreError> {
        let mut state = self.state.lock();
        if let Some(generation) = generation {
            if state.generation != generation {
                return None;
            }
            state.timer = None;
        } else if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        if !state.unsaved {
            return state.deferred_error.take();
        }

        match self.store.put(&self.key, &state.value, &self.category) {
            Ok(entry) => {
                state.unsaved = false;
                state.deferred_error = None;
                state.persist_failures = 0;
                drop(state);
                self.coordinator.enqueue(&entry);
                None
            }
            Err(e) => {
                state.persist_failures += 1;
                let delay = backoff_delay(self.retry_base, self.retry_max, state.persist_failures);
                warn!(
                    key = %self.key,
                    error = %e,
                    attempts = state.persist_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "failed to persist field"
                );

                let round = state.generation;
                let inner = Arc::clone(self);
                state.timer = Some(self.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.persist(Some(round));
                }));

                let returned = if generation.is_some() {
                    state.deferred_error = Some(e);
                    None
                } else {
                    Some(e)
                };
                drop(state);
                self.coordinator
                    .status_bus()
                    .publish(&self.key, SyncStatus::Unsaved);
                returned
            }
        }
    }
}
