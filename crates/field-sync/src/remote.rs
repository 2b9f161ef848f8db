//! Remote persistence interface — implemented by the embedding application.

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::types::UserId;

/// User-implemented network layer for single-field fetch/upsert.
///
/// Both operations must be idempotent: the coordinator retries after
/// timeouts, so the same value may arrive more than once.
#[async_trait]
pub trait RemoteFieldStore: Send + Sync {
    /// Fetch the remote value of one field. `Ok(None)` if the remote has none.
    async fn fetch(&self, user: &UserId, field_id: &str) -> Result<Option<String>, RemoteError>;

    /// Insert or overwrite the remote value of one field.
    async fn upsert(
        &self,
        user: &UserId,
        field_id: &str,
        category: &str,
        value: &str,
    ) -> Result<(), RemoteError>;
}
