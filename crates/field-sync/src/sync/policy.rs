//! Conflict policy.
//!
//! Pushes always overwrite the remote with the local value and never consult
//! the policy. The policy decides only what happens when a pulled remote
//! value differs from the local one, which occurs on the two pull paths:
//! cold start and explicit refresh. Swapping the resolver changes that
//! decision without touching the coordinator's control flow.

/// Why a remote value was pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// First load of a field with no known sync state.
    ColdStart,
    /// Explicit "refresh from server".
    ForceRefresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    AdoptRemote,
}

pub trait ConflictResolver: Send + Sync {
    /// Decide between `local` (`None` = never written) and a differing `remote`.
    fn resolve(&self, mode: ReconcileMode, local: Option<&str>, remote: &str) -> Resolution;
}

/// The default policy: the local value wins everywhere except on the pull
/// paths, where a remote value is adopted so prior remote state is not
/// discarded on cold start and refresh means what it says.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWins;

impl ConflictResolver for LocalWins {
    fn resolve(&self, mode: ReconcileMode, _local: Option<&str>, _remote: &str) -> Resolution {
        match mode {
            ReconcileMode::ColdStart | ReconcileMode::ForceRefresh => Resolution::AdoptRemote,
        }
    }
}
