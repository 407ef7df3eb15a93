//! Optional capability traits (spec §6 external interfaces). Rather than
//! the reflection-based `getCapability(Class<T>)` lookup the original
//! distills from, each capability is its own trait and `Repository`
//! exposes a typed `Option<&dyn Trait>` accessor per capability — there is
//! exactly one engine wired today (`EngineKind::Libmdbx`), and every
//! capability it supports is unconditional except where a configuration
//! flag explicitly turns the underlying feature off (`runCheckpointer`,
//! `indexSupport`). A future non-libmdbx engine that lacks a capability
//! would have its accessor return `None` instead of every call site
//! needing a downcast.

use std::path::{Path, PathBuf};

use common::{StoreResult, TypeName};
use query::IndexInfo;

use crate::backup::HotBackupHandle;

pub trait CheckpointCapability {
    fn checkpoint(&self, force: bool) -> StoreResult<()>;
    fn suspend_checkpoints(&self, ms: u64);
    fn resume_checkpoints(&self);
}

pub trait HotBackupCapability {
    fn begin_hot_backup(&self) -> StoreResult<HotBackupHandle>;
}

pub trait IndexInfoCapability {
    fn index_info(&self, type_name: &TypeName) -> StoreResult<Vec<IndexInfo>>;
}

pub trait StorableInfoCapability {
    fn registered_types(&self) -> Vec<TypeName>;
}

pub trait CompactionCapability {
    fn compact_to(&self, dest_dir: &Path) -> StoreResult<Vec<PathBuf>>;
}
