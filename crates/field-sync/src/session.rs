//! Authenticated-user source.

use parking_lot::RwLock;

use crate::types::UserId;

/// Supplies the user the engine works for. `None` keeps the engine inert.
pub trait UserSession: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
}

/// A session whose user is set explicitly by the application.
#[derive(Default)]
pub struct StaticSession {
    user: RwLock<Option<UserId>>,
}

impl StaticSession {
    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self {
            user: RwLock::new(Some(user.into())),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: impl Into<UserId>) {
        *self.user.write() = Some(user.into());
    }

    pub fn sign_out(&self) {
        *self.user.write() = None;
    }
}

impl UserSession for StaticSession {
    fn current_user(&self) -> Option<UserId> {
        self.user.read().clone()
    }
}
