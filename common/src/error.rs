//! Error taxonomy shared by every crate in the workspace (spec §7).
//!
//! `StoreError` is the root type client code sees. Lower layers (the KV
//! engine adapter, the codec, the planner) define their own narrower error
//! enums and convert into this one at the crate boundary, mirroring how
//! `common::DbError` sits above `MdbxEngineError` in the teacher workspace.

use thiserror::Error;

/// Why a read-path operation failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The underlying engine detected a deadlock; retryable with backoff.
    #[error("deadlock detected while fetching")]
    Deadlock,
    /// The engine's lock-timeout elapsed; retryable with backoff.
    #[error("lock timeout while fetching")]
    Timeout,
    /// The stored bytes could not be decoded; fatal for this row.
    #[error("corrupt encoding: {0}")]
    CorruptEncoding(String),
}

/// Why a write-path operation failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("deadlock detected while persisting")]
    Deadlock,
    #[error("lock timeout while persisting")]
    Timeout,
    #[error("encoding failed: {0}")]
    EncodingFailed(String),
}

/// Top-level error type returned by every public operation in the workspace.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid or missing configuration option at build time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Metadata on disk disagrees with the declared record type; not
    /// recoverable (spec invariant M1).
    #[error("schema incompatible for type {type_name}: {reason}")]
    SchemaIncompatible { type_name: String, reason: String },

    /// Read-path failure.
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Write-path failure.
    #[error("persist failed: {0}")]
    Persist(#[from] PersistError),

    /// A unique-index insert conflicted with an existing row.
    #[error("unique constraint violated on {index}: key already present")]
    UniqueConstraint { index: String },

    /// The running product/engine cannot satisfy the request (e.g.
    /// multiversion isolation when the engine doesn't support it).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Operation attempted on a repository that has already shut down.
    #[error("repository is closed")]
    RepositoryClosed,

    /// The cursor's enclosing scope (or its storage) has already closed.
    #[error("cursor closed: {0}")]
    CursorClosed(String),

    /// Catch-all for engine-level failures not covered above.
    #[error("engine error: {0}")]
    Engine(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// True when a caller may reasonably retry the operation (deadlock or
    /// lock-timeout classes, see spec §7 propagation policy).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Fetch(FetchError::Deadlock)
                | StoreError::Fetch(FetchError::Timeout)
                | StoreError::Persist(PersistError::Deadlock)
                | StoreError::Persist(PersistError::Timeout)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(StoreError::Fetch(FetchError::Deadlock).is_retryable());
        assert!(StoreError::Persist(PersistError::Timeout).is_retryable());
        assert!(!StoreError::RepositoryClosed.is_retryable());
        assert!(!StoreError::Fetch(FetchError::CorruptEncoding("x".into())).is_retryable());
    }

    #[test]
    fn display_text() {
        let err = StoreError::UniqueConstraint { index: "primary".into() };
        assert_eq!(
            err.to_string(),
            "unique constraint violated on primary: key already present"
        );
    }
}
