pub mod coordinator;
pub mod policy;
pub mod queue;
pub mod types;

pub use coordinator::SyncCoordinator;
pub use policy::{ConflictResolver, LocalWins, ReconcileMode, Resolution};
pub use queue::{EnqueueEffect, PendingPush};
pub use types::{
    PushOutcome, Reconciled, SyncCoordinatorOptions, SyncEvent, SyncEventCallback, SyncReport,
};
