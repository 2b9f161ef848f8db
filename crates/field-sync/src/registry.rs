//! ProcessRegistry — owns the per-process sync engine.
//!
//! The engine (store, coordinator, status bus) is built on first use and
//! exactly once, even under concurrent first access. Without a signed-in
//! user the registry stays inert and hands out no fields.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::FieldSyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{ConfigError, FieldSyncError, Result};
use crate::field::{ArrayField, FieldController, FieldGroup, FieldSpec};
use crate::reactive::StatusBus;
use crate::remote::RemoteFieldStore;
use crate::session::UserSession;
use crate::storage::FieldStore;
use crate::sync::{ConflictResolver, SyncCoordinator, SyncCoordinatorOptions, SyncEventCallback, SyncReport};
use crate::types::{FieldKey, UserId};

static GLOBAL: OnceLock<Arc<ProcessRegistry>> = OnceLock::new();

/// Options for [`ProcessRegistry::new`].
pub struct RegistryOptions {
    pub config: FieldSyncConfig,
    pub remote: Arc<dyn RemoteFieldStore>,
    pub session: Arc<dyn UserSession>,
    /// Defaults to a monitor that starts online.
    pub connectivity: Option<Arc<ConnectivityMonitor>>,
    /// Pre-built store. Defaults to [`FieldStore::from_config`].
    pub store: Option<Arc<FieldStore>>,
    pub resolver: Option<Arc<dyn ConflictResolver>>,
    pub on_event: Option<Arc<SyncEventCallback>>,
}

impl RegistryOptions {
    pub fn new(remote: Arc<dyn RemoteFieldStore>, session: Arc<dyn UserSession>) -> Self {
        Self {
            config: FieldSyncConfig::default(),
            remote,
            session,
            connectivity: None,
            store: None,
            resolver: None,
            on_event: None,
        }
    }

    /// Options with [`FieldSyncConfig`] loaded from a TOML file.
    pub fn from_config_file(
        remote: Arc<dyn RemoteFieldStore>,
        session: Arc<dyn UserSession>,
        path: impl AsRef<Path>,
    ) -> std::result::Result<Self, ConfigError> {
        let mut options = Self::new(remote, session);
        options.config = FieldSyncConfig::from_file(path)?;
        Ok(options)
    }
}

/// The live components shared by every field of the process.
pub struct Engine {
    store: Arc<FieldStore>,
    coordinator: Arc<SyncCoordinator>,
    status: Arc<StatusBus>,
}

impl Engine {
    pub fn store(&self) -> &Arc<FieldStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn status_bus(&self) -> &Arc<StatusBus> {
        &self.status
    }
}

pub struct ProcessRegistry {
    config: FieldSyncConfig,
    remote: Arc<dyn RemoteFieldStore>,
    session: Arc<dyn UserSession>,
    connectivity: Arc<ConnectivityMonitor>,
    resolver: Option<Arc<dyn ConflictResolver>>,
    on_event: Option<Arc<SyncEventCallback>>,
    /// Taken by the engine on initialization.
    prebuilt_store: Mutex<Option<Arc<FieldStore>>>,
    engine: OnceCell<Arc<Engine>>,
    shut_down: AtomicBool,
}

impl ProcessRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            config: options.config,
            remote: options.remote,
            session: options.session,
            connectivity: options
                .connectivity
                .unwrap_or_else(|| Arc::new(ConnectivityMonitor::online())),
            resolver: options.resolver,
            on_event: options.on_event,
            prebuilt_store: Mutex::new(options.store),
            engine: OnceCell::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    // -----------------------------------------------------------------------
    // Process-global slot
    // -----------------------------------------------------------------------

    /// Install `registry` as the process-global one. If a registry is already
    /// installed it is returned and `registry` is dropped.
    pub fn install_global(registry: ProcessRegistry) -> Arc<ProcessRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(registry)))
    }

    pub fn global() -> Option<Arc<ProcessRegistry>> {
        GLOBAL.get().cloned()
    }

    // -----------------------------------------------------------------------
    // Engine
    // -----------------------------------------------------------------------

    /// The engine, built on first call. `Ok(None)` while no user is signed in.
    pub async fn engine(&self) -> Result<Option<Arc<Engine>>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(FieldSyncError::Shutdown);
        }
        if let Some(engine) = self.engine.get() {
            return Ok(Some(Arc::clone(engine)));
        }
        if self.session.current_user().is_none() {
            return Ok(None);
        }
        let engine = self
            .engine
            .get_or_try_init(|| async { self.build_engine().map(Arc::new) })
            .await?;
        Ok(Some(Arc::clone(engine)))
    }

    fn build_engine(&self) -> Result<Engine> {
        let store = match self.prebuilt_store.lock().take() {
            Some(store) => store,
            None => Arc::new(FieldStore::from_config(&self.config)?),
        };
        let status = Arc::new(StatusBus::new());
        let coordinator = SyncCoordinator::start(SyncCoordinatorOptions {
            store: Arc::clone(&store),
            remote: Arc::clone(&self.remote),
            session: Arc::clone(&self.session),
            connectivity: self.connectivity.subscribe(),
            status: Arc::clone(&status),
            config: self.config.clone(),
            resolver: self.resolver.clone(),
            on_event: self.on_event.clone(),
        });
        info!(
            persistent = self.config.database_path.is_some(),
            "field sync engine initialized"
        );
        Ok(Engine {
            store,
            coordinator: Arc::new(coordinator),
            status,
        })
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn config(&self) -> &FieldSyncConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Fields
    // -----------------------------------------------------------------------

    /// Engine and user for opening a field, or `None` when inert.
    async fn context(&self) -> Result<Option<(Arc<Engine>, UserId)>> {
        let Some(engine) = self.engine().await? else {
            return Ok(None);
        };
        Ok(self.session.current_user().map(|user| (engine, user)))
    }

    pub async fn open_field(
        &self,
        field_id: &str,
        category: &str,
        default: &str,
    ) -> Result<Option<FieldController>> {
        let Some((engine, user)) = self.context().await? else {
            return Ok(None);
        };
        let key = FieldKey::new(user, field_id);
        let field =
            FieldController::open(Arc::clone(&engine.coordinator), key, category, default).await?;
        Ok(Some(field))
    }

    pub async fn open_array_field<T: Serialize + DeserializeOwned>(
        &self,
        field_id: &str,
        category: &str,
    ) -> Result<Option<ArrayField<T>>> {
        let Some((engine, user)) = self.context().await? else {
            return Ok(None);
        };
        let key = FieldKey::new(user, field_id);
        let field = ArrayField::open(Arc::clone(&engine.coordinator), key, category).await?;
        Ok(Some(field))
    }

    pub async fn open_group(
        &self,
        specs: impl IntoIterator<Item = FieldSpec>,
    ) -> Result<Option<FieldGroup>> {
        let Some((engine, user)) = self.context().await? else {
            return Ok(None);
        };
        let group = FieldGroup::open(Arc::clone(&engine.coordinator), &user, specs).await?;
        Ok(Some(group))
    }

    /// Push every dirty field of the current user. `None` when inert.
    pub async fn sync_all(&self) -> Result<Option<SyncReport>> {
        let Some((engine, user)) = self.context().await? else {
            return Ok(None);
        };
        Ok(Some(engine.coordinator.sync_all(&user).await))
    }

    /// Stop the coordinator. Later calls into the registry fail with
    /// [`FieldSyncError::Shutdown`].
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(engine) = self.engine.get() {
            engine.coordinator.shutdown().await;
        }
    }
}
