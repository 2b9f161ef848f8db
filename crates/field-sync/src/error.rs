use std::fmt;
use thiserror::Error;

use crate::types::FieldKey;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Local persistence failure. Always surfaced to the caller of the write.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage corruption in {key}: failed to parse \"{field}\" column")]
    Corruption {
        key: String,
        field: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Backend I/O error: {0}")]
    Io(String),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn corruption(
        key: &FieldKey,
        field: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Corruption {
            key: key.to_string(),
            field: field.to_string(),
            source: source.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// Classification of remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Network or service unavailable; retried later.
    Unavailable,
    /// Request did not complete within the configured timeout; retried later.
    Timeout,
    /// The remote refused this value (validation). Not retried.
    Rejected,
    /// Authentication/authorization failure. Not retried.
    Auth,
}

impl RemoteErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable | Self::Timeout)
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::Auth => "auth",
        };
        f.write_str(s)
    }
}

/// Error returned by a [`RemoteFieldStore`](crate::remote::RemoteFieldStore).
#[derive(Debug, Clone, Error)]
#[error("remote {kind}: {message}")]
pub struct RemoteError {
    pub message: String,
    pub kind: RemoteErrorKind,
}

impl RemoteError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_kind(message, RemoteErrorKind::Unavailable)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::with_kind(message, RemoteErrorKind::Rejected)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_kind(message, RemoteErrorKind::Timeout)
    }

    pub fn with_kind(message: impl Into<String>, kind: RemoteErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for \"{field}\": {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// FieldSyncError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FieldSyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to encode field value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown field in group: {0}")]
    UnknownField(String),

    #[error("Sync coordinator has shut down")]
    Shutdown,
}

/// Convenience alias — the default error type is `FieldSyncError`.
pub type Result<T, E = FieldSyncError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
