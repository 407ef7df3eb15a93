//! Error taxonomy for the raw engine adapter, mirroring the teacher's
//! `mdbx-base::txn_helpers::TxnError` / `env_builder::MdbxEnvError` split:
//! one variant family for environment lifecycle, one for transaction/cursor
//! operations, both carrying the raw MDBX return code for diagnostics.

use thiserror::Error;

use common::{FetchError, PersistError, StoreError};

/// The canonical MDBX return codes this adapter distinguishes. Everything
/// else folds into `Other`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KvError {
    #[error("key not found")]
    NotFound,
    #[error("key already exists")]
    KeyExists,
    #[error("environment is busy (reader/writer slot contention)")]
    Busy,
    #[error("resized or full map")]
    MapFull,
    #[error("database corrupted")]
    Corrupted,
    #[error("environment panicked (fatal error left it unusable)")]
    Panic,
    #[error("incompatible environment version or page size")]
    Incompatible,
    #[error("raw engine call `{call}` failed with code {code}")]
    Other { call: &'static str, code: i32 },
}

pub type KvResult<T> = std::result::Result<T, KvError>;

impl KvError {
    /// Classifies a raw MDBX return code from the named call site.
    pub fn from_rc(call: &'static str, code: i32) -> Self {
        match code {
            mdbx_sys::MDBX_NOTFOUND => KvError::NotFound,
            mdbx_sys::MDBX_KEYEXIST => KvError::KeyExists,
            mdbx_sys::MDBX_BUSY => KvError::Busy,
            mdbx_sys::MDBX_MAP_FULL | mdbx_sys::MDBX_MAP_RESIZED => KvError::MapFull,
            mdbx_sys::MDBX_CORRUPTED => KvError::Corrupted,
            mdbx_sys::MDBX_PANIC => KvError::Panic,
            mdbx_sys::MDBX_INCOMPATIBLE | mdbx_sys::MDBX_VERSION_MISMATCH => KvError::Incompatible,
            other => KvError::Other { call, code: other },
        }
    }
}

/// Translates an engine-level failure into the workspace-wide read-path
/// error taxonomy (spec §7 propagation policy: deadlock/timeout are
/// retryable, everything else is an engine error).
impl From<KvError> for FetchError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::Busy => FetchError::Timeout,
            KvError::Corrupted | KvError::Panic => {
                FetchError::CorruptEncoding(e.to_string())
            }
            other => FetchError::CorruptEncoding(other.to_string()),
        }
    }
}

impl From<KvError> for PersistError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::Busy => PersistError::Timeout,
            other => PersistError::EncodingFailed(other.to_string()),
        }
    }
}

impl From<KvError> for StoreError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::NotFound => StoreError::Engine("key not found".into()),
            KvError::Busy => StoreError::Fetch(FetchError::Timeout),
            other => StoreError::Engine(other.to_string()),
        }
    }
}
