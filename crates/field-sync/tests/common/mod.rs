//! Shared mock infrastructure for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use field_sync::config::FieldSyncConfig;
use field_sync::connectivity::ConnectivityMonitor;
use field_sync::error::{RemoteError, StoreError};
use field_sync::field::FieldController;
use field_sync::reactive::StatusBus;
use field_sync::remote::RemoteFieldStore;
use field_sync::session::StaticSession;
use field_sync::storage::{FieldBackend, FieldStore, MemoryBackend, ScanFilter};
use field_sync::sync::{SyncCoordinator, SyncCoordinatorOptions, SyncEvent};
use field_sync::types::{FieldEntry, FieldKey, UserId};
use parking_lot::Mutex;

pub const USER: &str = "u1";

// ============================================================================
// MockRemote
// ============================================================================

/// How the mock answers a request.
#[derive(Debug, Clone)]
pub enum Behavior {
    Ok,
    Unavailable,
    Reject,
    /// Never completes.
    Hang,
    /// Succeeds after the delay.
    Delay(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    pub field_id: String,
    pub category: String,
    pub value: String,
}

pub struct MockRemote {
    inner: Mutex<MockRemoteInner>,
}

struct MockRemoteInner {
    values: HashMap<(String, String), String>,
    /// Every upsert call, including failed ones.
    upserts: Vec<Upsert>,
    fetches: usize,
    upsert_behavior: Behavior,
    fetch_behavior: Behavior,
    queued_upsert_failures: VecDeque<RemoteError>,
    rejected_fields: HashSet<String>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockRemoteInner {
                values: HashMap::new(),
                upserts: Vec::new(),
                fetches: 0,
                upsert_behavior: Behavior::Ok,
                fetch_behavior: Behavior::Ok,
                queued_upsert_failures: VecDeque::new(),
                rejected_fields: HashSet::new(),
            }),
        }
    }

    /// Set a remote value as if another device had pushed it.
    pub fn seed(&self, field_id: &str, value: &str) {
        self.inner
            .lock()
            .values
            .insert((USER.to_string(), field_id.to_string()), value.to_string());
    }

    pub fn value(&self, field_id: &str) -> Option<String> {
        self.inner
            .lock()
            .values
            .get(&(USER.to_string(), field_id.to_string()))
            .cloned()
    }

    pub fn upserts(&self) -> Vec<Upsert> {
        self.inner.lock().upserts.clone()
    }

    /// Values sent for `field_id`, in call order.
    pub fn upserted_values(&self, field_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .upserts
            .iter()
            .filter(|u| u.field_id == field_id)
            .map(|u| u.value.clone())
            .collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.lock().fetches
    }

    pub fn set_upsert(&self, behavior: Behavior) {
        self.inner.lock().upsert_behavior = behavior;
    }

    pub fn set_fetch(&self, behavior: Behavior) {
        self.inner.lock().fetch_behavior = behavior;
    }

    /// Fail the next `n` upserts with `error`, then fall back to the behavior.
    pub fn fail_next_upserts(&self, n: usize, error: RemoteError) {
        let mut inner = self.inner.lock();
        for _ in 0..n {
            inner.queued_upsert_failures.push_back(error.clone());
        }
    }

    pub fn reject_field(&self, field_id: &str) {
        self.inner.lock().rejected_fields.insert(field_id.to_string());
    }
}

#[async_trait]
impl RemoteFieldStore for MockRemote {
    async fn fetch(&self, user: &UserId, field_id: &str) -> Result<Option<String>, RemoteError> {
        let behavior = {
            let mut inner = self.inner.lock();
            inner.fetches += 1;
            inner.fetch_behavior.clone()
        };
        match behavior {
            Behavior::Ok => {}
            Behavior::Unavailable => return Err(RemoteError::unavailable("connection refused")),
            Behavior::Reject => return Err(RemoteError::rejected("forbidden")),
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Delay(d) => tokio::time::sleep(d).await,
        }
        Ok(self
            .inner
            .lock()
            .values
            .get(&(user.as_str().to_string(), field_id.to_string()))
            .cloned())
    }

    async fn upsert(
        &self,
        user: &UserId,
        field_id: &str,
        category: &str,
        value: &str,
    ) -> Result<(), RemoteError> {
        let behavior = {
            let mut inner = self.inner.lock();
            inner.upserts.push(Upsert {
                field_id: field_id.to_string(),
                category: category.to_string(),
                value: value.to_string(),
            });
            if let Some(error) = inner.queued_upsert_failures.pop_front() {
                return Err(error);
            }
            if inner.rejected_fields.contains(field_id) {
                return Err(RemoteError::rejected(format!("{field_id} is not writable")));
            }
            inner.upsert_behavior.clone()
        };
        match behavior {
            Behavior::Ok => {}
            Behavior::Unavailable => return Err(RemoteError::unavailable("connection refused")),
            Behavior::Reject => return Err(RemoteError::rejected("value refused")),
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Delay(d) => tokio::time::sleep(d).await,
        }
        self.inner.lock().values.insert(
            (user.as_str().to_string(), field_id.to_string()),
            value.to_string(),
        );
        Ok(())
    }
}

// ============================================================================
// FlakyBackend
// ============================================================================

/// Switch shared with a [`FlakyBackend`]: while full, every write fails.
#[derive(Default)]
pub struct Disk {
    full: AtomicBool,
}

impl Disk {
    pub fn fill(&self) {
        self.full.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.full.store(false, Ordering::SeqCst);
    }
}

/// In-memory backend whose `put_raw` fails while its [`Disk`] is full.
pub struct FlakyBackend {
    inner: MemoryBackend,
    disk: Arc<Disk>,
}

impl FieldBackend for FlakyBackend {
    fn get_raw(&self, key: &FieldKey) -> Result<Option<FieldEntry>, StoreError> {
        self.inner.get_raw(key)
    }

    fn put_raw(&self, entry: &FieldEntry) -> Result<(), StoreError> {
        if self.disk.full.load(Ordering::SeqCst) {
            return Err(StoreError::Io("disk full".to_string()));
        }
        self.inner.put_raw(entry)
    }

    fn scan_raw(&self, user: &UserId, filter: &ScanFilter) -> Result<Vec<FieldEntry>, StoreError> {
        self.inner.scan_raw(user, filter)
    }
}

/// A store over a [`FlakyBackend`], and the switch controlling it.
pub fn flaky_store() -> (Arc<FieldStore>, Arc<Disk>) {
    let disk = Arc::new(Disk::default());
    let backend = FlakyBackend {
        inner: MemoryBackend::new(),
        disk: Arc::clone(&disk),
    };
    (Arc::new(FieldStore::new(backend)), disk)
}

// ============================================================================
// Harness
// ============================================================================

/// One device: store, status bus and a running coordinator against a remote.
pub struct Harness {
    pub remote: Arc<MockRemote>,
    pub store: Arc<FieldStore>,
    pub status: Arc<StatusBus>,
    pub connectivity: ConnectivityMonitor,
    pub session: Arc<StaticSession>,
    pub coordinator: Arc<SyncCoordinator>,
    pub events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: FieldSyncConfig::default(),
            remote: Arc::new(MockRemote::new()),
            store: None,
            online: true,
        }
    }

    pub fn key(&self, field_id: &str) -> FieldKey {
        key(field_id)
    }

    pub async fn open(&self, field_id: &str, default: &str) -> FieldController {
        FieldController::open(
            Arc::clone(&self.coordinator),
            key(field_id),
            "profile",
            default,
        )
        .await
        .expect("open field")
    }

    /// Persist `value` and hand it to the coordinator, bypassing any controller.
    pub fn put_and_enqueue(&self, field_id: &str, value: &str) {
        let entry = self
            .store
            .put(&key(field_id), value, "profile")
            .expect("put");
        self.coordinator.enqueue(&entry);
    }

    pub fn is_dirty(&self, field_id: &str) -> bool {
        self.store
            .get_entry(&key(field_id))
            .expect("get entry")
            .map_or(false, |e| e.dirty())
    }
}

pub struct HarnessBuilder {
    config: FieldSyncConfig,
    remote: Arc<MockRemote>,
    store: Option<Arc<FieldStore>>,
    online: bool,
}

impl HarnessBuilder {
    pub fn config(mut self, config: FieldSyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn remote(mut self, remote: Arc<MockRemote>) -> Self {
        self.remote = remote;
        self
    }

    pub fn store(mut self, store: Arc<FieldStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    /// Must run inside a tokio runtime: the coordinator spawns its worker.
    pub fn build(self) -> Harness {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FieldStore::in_memory()));
        let status = Arc::new(StatusBus::new());
        let connectivity = if self.online {
            ConnectivityMonitor::online()
        } else {
            ConnectivityMonitor::offline()
        };
        let session = Arc::new(StaticSession::signed_in(USER));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let remote: Arc<dyn RemoteFieldStore> = self.remote.clone();

        let coordinator = SyncCoordinator::start(SyncCoordinatorOptions {
            store: Arc::clone(&store),
            remote,
            session: session.clone(),
            connectivity: connectivity.subscribe(),
            status: Arc::clone(&status),
            config: self.config,
            resolver: None,
            on_event: Some(Arc::new(move |event: &SyncEvent| {
                sink.lock().push(event.clone());
            })),
        });

        Harness {
            remote: self.remote,
            store,
            status,
            connectivity,
            session,
            coordinator: Arc::new(coordinator),
            events,
        }
    }
}

pub fn key(field_id: &str) -> FieldKey {
    FieldKey::new(USER, field_id)
}

pub fn user() -> UserId {
    UserId::new(USER)
}

/// Let the runtime settle: advances paused time by `ms`.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
