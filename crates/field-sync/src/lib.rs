pub mod config;
pub mod error;
pub mod types;

pub mod connectivity;
pub mod field;
pub mod reactive;
pub mod registry;
pub mod remote;
pub mod session;
pub mod storage;
pub mod sync;

pub use config::FieldSyncConfig;
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use error::{FieldSyncError, RemoteError, RemoteErrorKind, Result, StoreError};
pub use field::{ArrayField, FieldController, FieldGroup, FieldSpec, RefreshOutcome};
pub use registry::{Engine, ProcessRegistry, RegistryOptions};
pub use remote::RemoteFieldStore;
pub use session::{StaticSession, UserSession};
pub use storage::FieldStore;
pub use sync::{SyncCoordinator, SyncReport};
pub use types::{FieldEntry, FieldKey, SyncStatus, UserId};
