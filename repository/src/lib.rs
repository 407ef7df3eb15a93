//! Repository root object (spec §2 component C9): wires the engine,
//! transaction scope, and background controllers together, owns every
//! type's `Storage` facade, and carries out the shutdown sequence of
//! spec §4.6.

pub mod backup;
pub mod capability;
mod latch;

use std::any::Any;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use background::{CheckpointPolicy, Checkpointer, DeadlockDetector, DeadlockDetectorPolicy};
use codec::Codec;
use common::{Direction, EngineKind, EvolutionStrategy, RepositoryConfig, StoreError, StoreResult, TypeName};
use kv_engine::{env::EnvBuilder, KvEnv};
use query::IndexInfo;
use storage::{Closeable, IndexKeySource, JoinResolver, JoinTarget, Storage};
use txn::{FrameId, Scope};

pub use backup::HotBackupHandle;
pub use capability::{
    CheckpointCapability, CompactionCapability, HotBackupCapability, IndexInfoCapability, StorableInfoCapability,
};
use latch::ShutdownLatch;

/// Root object: the one handle an application holds. Construct with
/// `Repository::open`, register each record type with `storage_for`, then
/// drive work through `enter_transaction`/`enter_top_transaction` and the
/// returned `Storage` handles. Dropping a live `Repository` without
/// calling `shutdown` still releases the environment (the `KvEnv`'s own
/// `Drop` closes it), but skips the orderly checkpoint/backup-drain
/// sequence `shutdown` performs.
pub struct Repository {
    env: Arc<KvEnv>,
    scope: Arc<Scope>,
    config: RepositoryConfig,
    storages: DashMap<TypeName, Arc<dyn Any + Send + Sync>>,
    join_targets: DashMap<TypeName, Arc<dyn JoinTarget>>,
    closers: DashMap<TypeName, Arc<dyn Closeable>>,
    index_descriptors: DashMap<TypeName, Vec<IndexInfo>>,
    checkpointer: Mutex<Option<Checkpointer>>,
    deadlock_detector: Mutex<Option<DeadlockDetector>>,
    shutdown_latch: Arc<ShutdownLatch>,
    closed: AtomicBool,
}

impl Repository {
    /// Constructs and wires a repository per `config` (spec §6). Matches
    /// `EngineKind` against the one constructor this workspace has today;
    /// a second engine would add a match arm here, not touch any caller.
    pub fn open(config: RepositoryConfig) -> StoreResult<Arc<Self>> {
        config.validate()?;

        let env = match config.product {
            EngineKind::Libmdbx => {
                let mut builder = EnvBuilder::new(config.effective_data_home())
                    .with_read_only(config.read_only)
                    .with_no_sync(config.transaction_no_sync, config.transaction_write_no_sync)
                    .with_private(config.private)
                    .with_page_size(config.database_page_size);
                if let Some(cache) = config.cache_size {
                    builder = builder.with_size_upper_bytes(cache as i64);
                }
                builder
                    .open()
                    .map_err(|e| StoreError::Engine(format!("open environment: {e}")))?
            }
        };
        let env = Arc::new(env);
        let scope = Arc::new(Scope::new(env.clone()));

        let repo = Arc::new(Self {
            env: env.clone(),
            scope,
            config: config.clone(),
            storages: DashMap::new(),
            join_targets: DashMap::new(),
            closers: DashMap::new(),
            index_descriptors: DashMap::new(),
            checkpointer: Mutex::new(None),
            deadlock_detector: Mutex::new(None),
            shutdown_latch: Arc::new(ShutdownLatch::default()),
            closed: AtomicBool::new(false),
        });

        if config.run_checkpointer {
            let policy = CheckpointPolicy::with_interval(config.checkpoint_interval);
            *repo.checkpointer.lock() = Some(Checkpointer::spawn(Arc::downgrade(&env), policy));
        }
        if config.run_deadlock_detector {
            let policy = DeadlockDetectorPolicy::with_interval(config.lock_timeout.max(std::time::Duration::from_secs(1)));
            *repo.deadlock_detector.lock() = Some(DeadlockDetector::spawn(Arc::downgrade(&env), policy));
        }

        info!(home = %config.env_home.display(), "repository opened");
        Ok(repo)
    }

    /// Registers (or returns the already-registered) `Storage` facade for
    /// `type_name`. A second call with a mismatched `T`/`C` for the same
    /// type name fails with `SchemaIncompatible` rather than silently
    /// handing back a facade for the wrong record type.
    ///
    /// Takes `self: &Arc<Self>` (rather than `&self`) because the new
    /// handle is handed a `JoinResolver` back to this repository, so it
    /// can resolve a chained join hop into any other type registered
    /// here (spec §4.7.5/4.7.6) — that resolver has to own a strong
    /// reference to the repository, not borrow it.
    pub fn storage_for<T, C>(
        self: &Arc<Self>,
        type_name: impl Into<TypeName>,
        codec: C,
        evolution_strategy: EvolutionStrategy,
        indices: Vec<IndexInfo>,
        primary_key: Vec<(String, Direction)>,
    ) -> StoreResult<Arc<Storage<T, C>>>
    where
        T: IndexKeySource + Send + Sync + 'static,
        C: Codec<T> + Send + Sync + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::RepositoryClosed);
        }
        let type_name = type_name.into();

        match self.storages.entry(type_name.clone()) {
            Entry::Occupied(e) => e
                .get()
                .clone()
                .downcast::<Storage<T, C>>()
                .map_err(|_| StoreError::SchemaIncompatible {
                    type_name: type_name.to_string(),
                    reason: "already registered under a different record/codec type".into(),
                }),
            Entry::Vacant(e) => {
                let storage = Arc::new(Storage::open(
                    self.env.clone(),
                    self.scope.clone(),
                    type_name.clone(),
                    codec,
                    evolution_strategy,
                    indices.clone(),
                    primary_key,
                )?);
                storage.set_join_resolver(self.clone() as Arc<dyn JoinResolver>);
                e.insert(storage.clone());
                self.join_targets.insert(type_name.clone(), storage.clone() as Arc<dyn JoinTarget>);
                self.closers.insert(type_name.clone(), storage.clone() as Arc<dyn Closeable>);
                self.index_descriptors.insert(type_name, indices);
                Ok(storage)
            }
        }
    }

    pub fn enter_transaction(&self, isolation: common::IsolationLevel, for_update: bool) -> StoreResult<FrameId> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::RepositoryClosed);
        }
        Ok(self.scope.enter(isolation, for_update))
    }

    pub fn enter_top_transaction(&self, isolation: common::IsolationLevel, for_update: bool) -> StoreResult<FrameId> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::RepositoryClosed);
        }
        Ok(self.scope.enter_top(isolation, for_update))
    }

    pub fn commit(&self, frame: FrameId) -> StoreResult<()> {
        self.scope.commit(frame)
    }

    pub fn exit(&self, frame: FrameId) -> StoreResult<()> {
        self.scope.exit(frame)
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Runs the shutdown sequence of spec §4.6: stop accepting new work,
    /// run the pre-shutdown hook, wait for in-flight hot backups to
    /// release their pins, stop the background controllers, lock and
    /// close every open scope, close every registered type's `Storage`,
    /// flush a final checkpoint, explicitly close the environment, then
    /// run the post-shutdown hook.
    pub fn shutdown(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(hook) = &self.config.pre_shutdown_hook {
            hook.run();
        }

        self.shutdown_latch.wait_until_idle();

        if let Some(mut checkpointer) = self.checkpointer.lock().take() {
            checkpointer.shutdown();
        }
        if let Some(mut detector) = self.deadlock_detector.lock().take() {
            detector.shutdown();
        }

        // Step 2: no frame is left dangling across the teardown below,
        // regardless of which thread opened it or whether it was ever
        // committed or exited.
        self.scope.close_all();

        // Step 4: every per-type handle rejects further operations even
        // if an application thread still holds a clone of it.
        for closer in self.closers.iter() {
            closer.value().close();
        }

        self.env
            .sync(true)
            .map_err(|e| StoreError::Engine(format!("final checkpoint: {e}")))?;

        // Step 7: close the environment explicitly rather than relying on
        // the last `Arc<KvEnv>` clone being dropped at some unspecified
        // point.
        self.env.close();

        if let Some(hook) = &self.config.post_shutdown_hook {
            hook.run();
        }

        info!("repository shut down");
        Ok(())
    }
}

impl JoinResolver for Repository {
    fn matching_primary_keys(
        &self,
        target_type: &str,
        frame: FrameId,
        filter: Option<query::Filter>,
    ) -> StoreResult<HashSet<Vec<u8>>> {
        let target = self
            .join_targets
            .get(&TypeName::new(target_type))
            .ok_or_else(|| StoreError::Engine(format!("join target '{target_type}' is not a registered type")))?;
        target.matching_primary_keys(frame, filter)
    }
}

impl CheckpointCapability for Repository {
    fn checkpoint(&self, force: bool) -> StoreResult<()> {
        if force {
            if let Some(checkpointer) = self.checkpointer.lock().as_ref() {
                checkpointer.force();
                return Ok(());
            }
        }
        self.env.sync(force).map_err(|e| StoreError::Engine(e.to_string()))
    }

    fn suspend_checkpoints(&self, ms: u64) {
        if let Some(checkpointer) = self.checkpointer.lock().as_ref() {
            checkpointer.suspend(ms);
        }
    }

    fn resume_checkpoints(&self) {
        if let Some(checkpointer) = self.checkpointer.lock().as_ref() {
            checkpointer.resume();
        }
    }
}

impl HotBackupCapability for Repository {
    fn begin_hot_backup(&self) -> StoreResult<HotBackupHandle> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::RepositoryClosed);
        }
        HotBackupHandle::begin(self.env.clone(), self.shutdown_latch.clone())
    }
}

impl IndexInfoCapability for Repository {
    fn index_info(&self, type_name: &TypeName) -> StoreResult<Vec<IndexInfo>> {
        if !self.config.index_support {
            return Err(StoreError::NotSupported("index support disabled".into()));
        }
        self.index_descriptors
            .get(type_name)
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::Engine(format!("no such registered type '{type_name}'")))
    }
}

impl StorableInfoCapability for Repository {
    fn registered_types(&self) -> Vec<TypeName> {
        self.storages.iter().map(|e| e.key().clone()).collect()
    }
}

impl CompactionCapability for Repository {
    fn compact_to(&self, dest_dir: &Path) -> StoreResult<Vec<PathBuf>> {
        self.env
            .copy_to(dest_dir, true)
            .map_err(|e| StoreError::Engine(e.to_string()))
    }
}

impl Repository {
    pub fn checkpoint_capability(&self) -> Option<&dyn CheckpointCapability> {
        self.config.run_checkpointer.then_some(self as &dyn CheckpointCapability)
    }

    pub fn hot_backup_capability(&self) -> Option<&dyn HotBackupCapability> {
        Some(self as &dyn HotBackupCapability)
    }

    pub fn index_info_capability(&self) -> Option<&dyn IndexInfoCapability> {
        self.config.index_support.then_some(self as &dyn IndexInfoCapability)
    }

    pub fn storable_info_capability(&self) -> Option<&dyn StorableInfoCapability> {
        Some(self as &dyn StorableInfoCapability)
    }

    pub fn compaction_capability(&self) -> Option<&dyn CompactionCapability> {
        Some(self as &dyn CompactionCapability)
    }
}

#[cfg(test)]
mod tests {
    use codec::RkyvCodec;
    use common::Direction;
    use rkyv::{Archive, Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
    struct Widget {
        name: String,
    }

    impl IndexKeySource for Widget {
        fn index_key(&self, properties: &[String]) -> Vec<u8> {
            properties
                .iter()
                .flat_map(|p| match p.as_str() {
                    "name" => self.name.as_bytes().to_vec(),
                    _ => Vec::new(),
                })
                .collect()
        }
    }

    fn opened() -> (tempfile::TempDir, Arc<Repository>) {
        let dir = tempfile::tempdir().unwrap();
        let config = RepositoryConfig::new(dir.path()).with_run_deadlock_detector(false);
        let repo = Repository::open(config).unwrap();
        (dir, repo)
    }

    #[test]
    fn storage_for_registers_once_and_returns_same_handle() {
        let (_dir, repo) = opened();
        let indices = vec![IndexInfo {
            name: "by_name".into(),
            properties: vec![("name".into(), Direction::Ascending)],
            unique: true,
            clustered: false,
        }];
        let primary_key = vec![("id".into(), Direction::Ascending)];
        let a = repo
            .storage_for::<Widget, _>(
                "Widget",
                RkyvCodec::new(1),
                EvolutionStrategy::Standard,
                indices.clone(),
                primary_key.clone(),
            )
            .unwrap();
        let b = repo
            .storage_for::<Widget, _>("Widget", RkyvCodec::new(1), EvolutionStrategy::Standard, indices, primary_key)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        repo.shutdown().unwrap();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (_dir, repo) = opened();
        repo.shutdown().unwrap();
        repo.shutdown().unwrap();
    }

    #[test]
    fn hot_backup_blocks_shutdown_until_released() {
        let (_dir, repo) = opened();
        let handle = repo.begin_hot_backup().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let files = handle.backup_files(dest.path(), true).unwrap();
        assert_eq!(files.len(), 1);
        handle.exit();
        repo.shutdown().unwrap();
    }

    #[test]
    fn registered_type_appears_in_storable_info() {
        let (_dir, repo) = opened();
        repo.storage_for::<Widget, _>(
            "Widget",
            RkyvCodec::new(1),
            EvolutionStrategy::Standard,
            vec![],
            vec![("id".into(), Direction::Ascending)],
        )
        .unwrap();
        assert_eq!(repo.registered_types(), vec![TypeName::new("Widget")]);
        repo.shutdown().unwrap();
    }

    #[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
    struct Address {
        city: String,
    }

    impl IndexKeySource for Address {
        fn index_key(&self, properties: &[String]) -> Vec<u8> {
            properties
                .iter()
                .flat_map(|p| match p.as_str() {
                    "city" => self.city.as_bytes().to_vec(),
                    _ => Vec::new(),
                })
                .collect()
        }
    }

    #[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
    struct Person {
        name: String,
        address_id: Vec<u8>,
    }

    impl IndexKeySource for Person {
        fn index_key(&self, properties: &[String]) -> Vec<u8> {
            properties
                .iter()
                .flat_map(|p| match p.as_str() {
                    "name" => self.name.as_bytes().to_vec(),
                    "address_id" => self.address_id.clone(),
                    _ => Vec::new(),
                })
                .collect()
        }
    }

    #[test]
    fn chained_join_filters_by_referenced_record() {
        let (_dir, repo) = opened();
        let addresses = repo
            .storage_for::<Address, _>(
                "Address",
                RkyvCodec::new(1),
                EvolutionStrategy::Standard,
                vec![],
                vec![("id".into(), Direction::Ascending)],
            )
            .unwrap();
        let people = repo
            .storage_for::<Person, _>(
                "Person",
                RkyvCodec::new(1),
                EvolutionStrategy::Standard,
                vec![],
                vec![("id".into(), Direction::Ascending)],
            )
            .unwrap();

        let frame = repo.enter_transaction(common::IsolationLevel::ReadCommitted, true).unwrap();
        addresses.insert(frame, b"addr-nyc", &Address { city: "New York".into() }).unwrap();
        addresses.insert(frame, b"addr-sf", &Address { city: "San Francisco".into() }).unwrap();
        people
            .insert(
                frame,
                b"alice",
                &Person {
                    name: "Alice".into(),
                    address_id: b"addr-nyc".to_vec(),
                },
            )
            .unwrap();
        people
            .insert(
                frame,
                b"bob",
                &Person {
                    name: "Bob".into(),
                    address_id: b"addr-sf".to_vec(),
                },
            )
            .unwrap();
        repo.commit(frame).unwrap();

        let frame = repo.enter_transaction(common::IsolationLevel::ReadCommitted, false).unwrap();
        let results = people
            .query()
            .join(query::JoinStep {
                reference_property: "address_id".into(),
                target_type: "Address".into(),
                target_filter: Some(query::Filter::Cmp(query::Predicate::new(
                    "city",
                    query::Comparator::Eq,
                    Address { city: "New York".into() }.index_key(&["city".to_string()]),
                ))),
            })
            .fetch(frame)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Alice");
        repo.commit(frame).unwrap();
        repo.shutdown().unwrap();
    }
}
