//! SyncCoordinator — the single background worker reconciling the local
//! field store with the remote.
//!
//! Producers (field controllers, `sync_all`, the periodic timer) put values
//! into a shared [`PushQueue`]; one worker task drains it, keeping at most
//! `max_concurrent_requests` requests in flight and at most one per key.
//! Pulls are routed through the same worker so they share that bound.
//!
//! Remote failures never surface as `Err` from the public API: they show up
//! in statuses, [`SyncEvent`]s and [`SyncReport`]s. Local store failures are
//! returned to the caller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::FieldSyncConfig;
use crate::connectivity::Connectivity;
use crate::error::{RemoteError, StoreError};
use crate::reactive::StatusBus;
use crate::remote::RemoteFieldStore;
use crate::session::UserSession;
use crate::storage::FieldStore;
use crate::types::{self, FieldEntry, FieldKey, SyncStatus, UserId};

use super::policy::{ConflictResolver, LocalWins, ReconcileMode, Resolution};
use super::queue::{EnqueueEffect, PendingPush, PushQueue};
use super::types::*;

type PullReply = oneshot::Sender<Result<Option<String>, RemoteError>>;

enum Command {
    Pull { key: FieldKey, reply: PullReply },
    Shutdown,
}

/// What a finished request task reports back to the worker.
enum TaskDone {
    Push { key: FieldKey, outcome: PushOutcome },
    Pull,
}

// ============================================================================
// SyncCoordinator
// ============================================================================

pub struct SyncCoordinator {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    store: Arc<FieldStore>,
    remote: Arc<dyn RemoteFieldStore>,
    session: Arc<dyn UserSession>,
    status: Arc<StatusBus>,
    resolver: Arc<dyn ConflictResolver>,
    config: FieldSyncConfig,
    on_event: Option<Arc<SyncEventCallback>>,
    queue: Mutex<PushQueue>,
    /// Wakes the worker after an enqueue.
    wake: Notify,
    online: AtomicBool,
    stopped: AtomicBool,
}

impl SyncCoordinator {
    /// Start the worker on the current tokio runtime.
    pub fn start(options: SyncCoordinatorOptions) -> Self {
        let config = options.config;
        let online = options.connectivity.borrow().is_online();

        let shared = Arc::new(Shared {
            store: options.store,
            remote: options.remote,
            session: options.session,
            status: options.status,
            resolver: options
                .resolver
                .unwrap_or_else(|| Arc::new(LocalWins) as Arc<dyn ConflictResolver>),
            queue: Mutex::new(PushQueue::new(
                config.retry_base_delay(),
                config.retry_max_delay(),
            )),
            config,
            on_event: options.on_event,
            wake: Notify::new(),
            online: AtomicBool::new(online),
            stopped: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Worker::run(Arc::clone(&shared), rx, options.connectivity));

        Self {
            shared,
            commands: tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Schedule a push of `entry`'s current value. Never blocks.
    ///
    /// Supersedes a queued push for the same key; queues behind an in-flight
    /// one. A value older than one already queued or in flight is ignored.
    pub fn enqueue(&self, entry: &FieldEntry) -> EnqueueEffect {
        self.shared.enqueue(entry)
    }

    /// Fetch the remote value for `key` on the worker.
    pub async fn pull(&self, key: &FieldKey) -> Result<Option<String>, RemoteError> {
        let (tx, rx) = oneshot::channel();
        let command = Command::Pull {
            key: key.clone(),
            reply: tx,
        };
        if self.commands.send(command).is_err() {
            return Err(RemoteError::unavailable("sync coordinator has shut down"));
        }
        rx.await
            .unwrap_or_else(|_| Err(RemoteError::unavailable("sync coordinator has shut down")))
    }

    /// Pull `key` and apply the conflict policy for `mode`.
    ///
    /// `ForceRefresh` also withdraws any queued (not in-flight) push for the
    /// key before pulling, so the refreshed value is not overwritten by it.
    ///
    /// The remote value is only adopted when the local entry is exactly the
    /// one read before the pull and no push for the key is queued or in
    /// flight. Otherwise the local value is newer and stands.
    pub async fn reconcile(
        &self,
        key: &FieldKey,
        category: &str,
        mode: ReconcileMode,
    ) -> Result<Reconciled, StoreError> {
        if mode == ReconcileMode::ForceRefresh {
            self.cancel_pending(key);
        }
        let before = self.shared.store.get_entry(key)?;

        let remote = match self.pull(key).await {
            Ok(remote) => remote,
            Err(e) => {
                self.shared.status.publish(key, SyncStatus::Offline);
                return Ok(Reconciled::Unavailable(e));
            }
        };

        let local = self.shared.store.get_entry(key)?;
        if local != before || self.shared.has_push(key) {
            debug!(key = %key, ?mode, "local value changed during pull; keeping it");
            return Ok(self.shared.keep_local(key, local));
        }

        let Some(remote) = remote else {
            // Nothing remote; whatever is local stands.
            return Ok(self.shared.keep_local(key, local));
        };

        if let Some(entry) = &local {
            if entry.value == remote {
                self.shared
                    .store
                    .mark_synced(key, types::now(), &entry.snapshot())?;
                self.shared.status.publish(key, SyncStatus::Synced);
                let entry = self.shared.store.get_entry(key)?.unwrap_or_else(|| entry.clone());
                return Ok(Reconciled::InSync(entry));
            }
        }

        let local_value = local.as_ref().map(|e| e.value.as_str());
        match self.shared.resolver.resolve(mode, local_value, &remote) {
            Resolution::AdoptRemote => {
                let adopted = self.shared.store.apply_remote(
                    key,
                    &remote,
                    category,
                    types::now(),
                    local.as_ref(),
                )?;
                match adopted {
                    Some(entry) => {
                        debug!(key = %key, ?mode, "adopted remote value");
                        self.shared.status.publish(key, SyncStatus::Synced);
                        Ok(Reconciled::AdoptedRemote(entry))
                    }
                    None => {
                        let current = self.shared.store.get_entry(key)?;
                        Ok(self.shared.keep_local(key, current))
                    }
                }
            }
            Resolution::KeepLocal => Ok(self.shared.keep_local(key, local)),
        }
    }

    /// Push every dirty entry of `user` and wait for each attempt.
    ///
    /// While offline the entries are queued and reported as deferred without
    /// waiting.
    pub async fn sync_all(&self, user: &UserId) -> SyncReport {
        let mut report = SyncReport::default();

        let entries = match self.shared.store.dirty_entries(user) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(user = %user, error = %e, "failed to scan dirty fields");
                report.errors.push(e.to_string());
                return report;
            }
        };

        let online = self.is_online();
        let mut waiting = Vec::new();
        for entry in &entries {
            report.attempted += 1;
            let effect = self.shared.enqueue(entry);
            if !online {
                report.record(entry.key.field_id.clone(), PushOutcome::Deferred);
                continue;
            }
            let (tx, rx) = oneshot::channel();
            let registered = self.shared.queue.lock().add_waiter(&entry.key, tx);
            match registered {
                Ok(()) => waiting.push((entry.key.field_id.clone(), rx)),
                // Nothing queued for a stale value: the remote refused it before.
                Err(_) if effect == EnqueueEffect::Stale => report.record(
                    entry.key.field_id.clone(),
                    PushOutcome::Rejected {
                        error: "value was rejected by the remote".to_string(),
                    },
                ),
                // Nothing queued: the value was confirmed in the meantime.
                Err(_) => report.record(entry.key.field_id.clone(), PushOutcome::Acknowledged),
            }
        }

        for (field_id, rx) in waiting {
            let outcome = rx.await.unwrap_or(PushOutcome::Deferred);
            report.record(field_id, outcome);
        }

        debug!(
            user = %user,
            attempted = report.attempted,
            pushed = report.pushed,
            "sync_all finished"
        );
        report
    }

    /// Withdraw a queued push for `key`. In-flight pushes run to completion.
    pub fn cancel_pending(&self, key: &FieldKey) -> bool {
        let (removed, waiters) = self.shared.queue.lock().cancel(key);
        for waiter in waiters {
            let _ = waiter.send(PushOutcome::Cancelled);
        }
        removed
    }

    /// Values queued but not yet in flight.
    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().pending_count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.queue.lock().in_flight_count()
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    pub fn status(&self, key: &FieldKey) -> Option<SyncStatus> {
        self.shared.status.status(key)
    }

    pub fn store(&self) -> &Arc<FieldStore> {
        &self.shared.store
    }

    pub fn status_bus(&self) -> &Arc<StatusBus> {
        &self.shared.status
    }

    pub fn config(&self) -> &FieldSyncConfig {
        &self.shared.config
    }

    /// Stop the worker. In-flight requests get `shutdown_grace` to finish;
    /// queued values stay dirty in the store for the next process.
    pub async fn shutdown(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(Command::Shutdown);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "sync worker terminated abnormally");
            }
        }
        for waiter in self.shared.queue.lock().drain_waiters() {
            let _ = waiter.send(PushOutcome::Deferred);
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

impl Shared {
    fn enqueue(&self, entry: &FieldEntry) -> EnqueueEffect {
        let effect = self
            .queue
            .lock()
            .enqueue(&entry.key, PendingPush::from_entry(entry));
        if effect == EnqueueEffect::Stale {
            return effect;
        }

        let status = if self.online.load(Ordering::SeqCst) {
            SyncStatus::Syncing
        } else {
            SyncStatus::Offline
        };
        self.status.publish(&entry.key, status);
        self.wake.notify_one();
        effect
    }

    /// A push for `key` is queued or in flight.
    fn has_push(&self, key: &FieldKey) -> bool {
        let queue = self.queue.lock();
        queue.is_pending(key) || queue.is_in_flight(key)
    }

    /// Leave `local` in place, scheduling it when it is dirty.
    fn keep_local(&self, key: &FieldKey, local: Option<FieldEntry>) -> Reconciled {
        match &local {
            Some(entry) if entry.dirty() => {
                self.enqueue(entry);
            }
            _ if !self.has_push(key) => self.status.publish(key, SyncStatus::Synced),
            _ => {}
        }
        Reconciled::KeptLocal(local)
    }

    /// Queue every dirty entry of `user`. Returns how many were scanned.
    fn enqueue_dirty(&self, user: &UserId) -> usize {
        match self.store.dirty_entries(user) {
            Ok(entries) => {
                for entry in &entries {
                    self.enqueue(entry);
                }
                entries.len()
            }
            Err(e) => {
                warn!(user = %user, error = %e, "failed to scan dirty fields");
                0
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(ref on_event) = self.on_event {
            // Swallow callback panics — must not break sync
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                on_event(&event);
            }));
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    shared: Arc<Shared>,
    tasks: JoinSet<TaskDone>,
    pulls: VecDeque<(FieldKey, PullReply)>,
}

impl Worker {
    async fn run(
        shared: Arc<Shared>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut connectivity: watch::Receiver<Connectivity>,
    ) {
        let interval = shared.config.sync_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sync_interval_secs = interval.as_secs(),
            max_concurrent = shared.config.max_concurrent_requests,
            online = shared.online.load(Ordering::SeqCst),
            "sync worker starting"
        );

        let mut worker = Worker {
            shared,
            tasks: JoinSet::new(),
            pulls: VecDeque::new(),
        };
        let mut connectivity_open = true;

        loop {
            worker.dispatch();
            let wakeup = worker.shared.queue.lock().next_wakeup();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Pull { key, reply }) => worker.accept_pull(key, reply),
                    Some(Command::Shutdown) | None => break,
                },
                _ = worker.shared.wake.notified() => {}
                Some(done) = worker.tasks.join_next(), if !worker.tasks.is_empty() => {
                    match done {
                        Ok(done) => worker.on_task_done(done),
                        Err(e) => warn!(error = %e, "sync request task failed"),
                    }
                }
                changed = connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        debug!("connectivity monitor dropped; keeping last known state");
                        connectivity_open = false;
                    } else {
                        let state = *connectivity.borrow_and_update();
                        worker.on_connectivity(state);
                    }
                }
                _ = ticker.tick() => worker.on_periodic_tick(),
                _ = tokio::time::sleep_until(wakeup.unwrap_or_else(Instant::now)), if wakeup.is_some() => {}
            }
        }

        worker.drain().await;
        info!("sync worker shutting down");
    }

    /// Start queued work up to the concurrency limit. Pulls go first.
    fn dispatch(&mut self) {
        let limit = self.shared.config.max_concurrent_requests;
        while self.tasks.len() < limit {
            if let Some((key, reply)) = self.pulls.pop_front() {
                self.spawn_pull(key, reply);
                continue;
            }
            if !self.shared.online.load(Ordering::SeqCst) {
                break;
            }
            let ready = self.shared.queue.lock().take_ready(Instant::now());
            let Some((key, push)) = ready else {
                break;
            };
            self.shared.status.publish(&key, SyncStatus::Syncing);
            self.spawn_push(key, push);
        }
    }

    fn accept_pull(&mut self, key: FieldKey, reply: PullReply) {
        if !self.shared.online.load(Ordering::SeqCst) {
            let _ = reply.send(Err(RemoteError::unavailable("offline")));
            return;
        }
        self.pulls.push_back((key, reply));
    }

    fn spawn_push(&mut self, key: FieldKey, push: PendingPush) {
        let remote = Arc::clone(&self.shared.remote);
        let store = Arc::clone(&self.shared.store);
        let timeout = self.shared.config.request_timeout();

        self.tasks.spawn(async move {
            // Run the request on its own task so a panicking remote still
            // reports back for the right key.
            let request_key = key.clone();
            let request = tokio::spawn(async move {
                push_once(remote.as_ref(), store.as_ref(), &request_key, &push, timeout).await
            });
            let outcome = match request.await {
                Ok(outcome) => outcome,
                Err(e) => PushOutcome::Retrying {
                    error: format!("push task failed: {e}"),
                },
            };
            TaskDone::Push { key, outcome }
        });
    }

    fn spawn_pull(&mut self, key: FieldKey, reply: PullReply) {
        let remote = Arc::clone(&self.shared.remote);
        let shared = Arc::clone(&self.shared);
        let timeout = self.shared.config.request_timeout();

        self.tasks.spawn(async move {
            let result = match tokio::time::timeout(
                timeout,
                remote.fetch(&key.user_id, &key.field_id),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RemoteError::timeout(format!(
                    "fetch exceeded {}ms",
                    timeout.as_millis()
                ))),
            };
            match &result {
                Ok(value) => shared.emit(SyncEvent::Pulled {
                    key: key.clone(),
                    found: value.is_some(),
                }),
                Err(e) => {
                    debug!(key = %key, error = %e, "pull failed");
                    shared.emit(SyncEvent::PullFailed {
                        key: key.clone(),
                        error: e.clone(),
                    });
                }
            }
            let _ = reply.send(result);
            TaskDone::Pull
        });
    }

    fn on_task_done(&mut self, done: TaskDone) {
        let TaskDone::Push { key, outcome } = done else {
            return;
        };

        let (waiters, still_pending) = {
            let mut queue = self.shared.queue.lock();
            let waiters = queue.complete(&key, &outcome, Instant::now());
            (waiters, queue.is_pending(&key))
        };

        match &outcome {
            PushOutcome::Acknowledged => {
                debug!(key = %key, "push acknowledged");
                let status = if still_pending {
                    SyncStatus::Syncing
                } else {
                    SyncStatus::Synced
                };
                self.shared.status.publish(&key, status);
                self.shared.emit(SyncEvent::Pushed { key: key.clone() });
            }
            PushOutcome::Retrying { error } => {
                debug!(key = %key, error = %error, "push failed; will retry");
                self.shared.status.publish(&key, SyncStatus::Offline);
                self.shared.emit(SyncEvent::PushFailed {
                    key: key.clone(),
                    error: error.clone(),
                    will_retry: true,
                });
            }
            PushOutcome::Rejected { error } => {
                warn!(key = %key, error = %error, "remote rejected field value");
                if !still_pending {
                    self.shared.status.publish(&key, SyncStatus::Rejected);
                }
                self.shared.emit(SyncEvent::PushFailed {
                    key: key.clone(),
                    error: error.clone(),
                    will_retry: false,
                });
            }
            PushOutcome::LocalFailure { error } => {
                warn!(key = %key, error = %error, "failed to record push acknowledgement");
                self.shared.status.publish(&key, SyncStatus::Offline);
            }
            PushOutcome::Deferred | PushOutcome::Cancelled => {}
        }

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn on_connectivity(&mut self, state: Connectivity) {
        let was_online = self.shared.online.swap(state.is_online(), Ordering::SeqCst);
        if was_online == state.is_online() {
            return;
        }
        info!(online = state.is_online(), "connectivity changed");
        self.shared.emit(SyncEvent::ConnectivityChanged(state));

        match state {
            Connectivity::Online => {
                self.shared.queue.lock().release_backoff();
                if let Some(user) = self.shared.session.current_user() {
                    self.shared.enqueue_dirty(&user);
                }
            }
            Connectivity::Offline => {
                let (keys, waiters) = {
                    let mut queue = self.shared.queue.lock();
                    (queue.active_keys(), queue.drain_waiters())
                };
                for key in &keys {
                    self.shared.status.publish(key, SyncStatus::Offline);
                }
                for waiter in waiters {
                    let _ = waiter.send(PushOutcome::Deferred);
                }
                for (_, reply) in self.pulls.drain(..) {
                    let _ = reply.send(Err(RemoteError::unavailable("offline")));
                }
            }
        }
    }

    fn on_periodic_tick(&mut self) {
        if !self.shared.online.load(Ordering::SeqCst) {
            debug!("periodic sync skipped while offline");
            return;
        }
        let Some(user) = self.shared.session.current_user() else {
            return;
        };
        let enqueued = self.shared.enqueue_dirty(&user);
        debug!(user = %user, enqueued, "periodic sync");
        self.shared.emit(SyncEvent::PeriodicSync { user, enqueued });
    }

    /// Give in-flight requests the grace period, then abort the rest.
    async fn drain(&mut self) {
        for (_, reply) in self.pulls.drain(..) {
            let _ = reply.send(Err(RemoteError::unavailable("sync coordinator has shut down")));
        }
        let grace = self.shared.config.shutdown_grace();
        let tasks = &mut self.tasks;
        let shared = &self.shared;
        let finished = tokio::time::timeout(grace, async {
            while let Some(done) = tasks.join_next().await {
                if let Ok(TaskDone::Push { key, outcome }) = done {
                    let waiters = shared.queue.lock().complete(&key, &outcome, Instant::now());
                    for waiter in waiters {
                        let _ = waiter.send(outcome.clone());
                    }
                }
            }
        })
        .await;
        if finished.is_err() {
            warn!(
                remaining = self.tasks.len(),
                "sync requests still running at shutdown; aborting"
            );
            self.tasks.abort_all();
        }
    }
}

/// One remote upsert followed by the local acknowledgement.
async fn push_once(
    remote: &dyn RemoteFieldStore,
    store: &FieldStore,
    key: &FieldKey,
    push: &PendingPush,
    timeout: std::time::Duration,
) -> PushOutcome {
    let upsert = remote.upsert(&key.user_id, &key.field_id, &push.category, &push.value);
    match tokio::time::timeout(timeout, upsert).await {
        Err(_) => PushOutcome::Retrying {
            error: format!("upsert exceeded {}ms", timeout.as_millis()),
        },
        Ok(Err(e)) if e.is_retryable() => PushOutcome::Retrying {
            error: e.to_string(),
        },
        Ok(Err(e)) => PushOutcome::Rejected {
            error: e.to_string(),
        },
        Ok(Ok(())) => match store.mark_synced(key, types::now(), &push.snapshot()) {
            Ok(_) => PushOutcome::Acknowledged,
            Err(e) => PushOutcome::LocalFailure {
                error: e.to_string(),
            },
        },
    }
}
