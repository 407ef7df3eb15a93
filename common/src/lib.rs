//! Shared foundation for the object-store workspace: error taxonomy,
//! configuration, logging, and the small vocabulary types (directions,
//! isolation levels) used by every other crate.
//!
//! Mirrors the role of the teacher's `common` crate: sits at the bottom of
//! the dependency graph with no dependency on sibling workspace crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod model;

pub use config::{EngineKind, FileNameMap, RepositoryConfig, ShutdownHook};
pub use error::{FetchError, PersistError, StoreError, StoreResult};
pub use model::{Direction, EvolutionStrategy, IsolationLevel};

/// Name of a registered record type, used as the key into the per-type
/// Storage map (spec §2 C9) and as the primary key of the metadata table
/// (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TypeName(String);

impl TypeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TypeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Name alias for the self-hosted metadata table (spec §6).
pub const METADATA_TABLE_NAME: &str = "OBJSTORE_DATABASE_INFO";
