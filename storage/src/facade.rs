//! Per-type storage facade (spec §4.4, component C6).
//!
//! Five-step open protocol: reconcile the type's metadata record, open its
//! primary table, open each declared index's table, validate the index
//! descriptors against it, then hand back a ready `Storage<T, C>`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use common::{Direction, EvolutionStrategy, StoreError, StoreResult, TypeName};
use codec::Codec;
use kv_engine::{database, ops, Dbi, KvEnv};
use query::IndexInfo;
use txn::{FrameId, Scope};

use crate::index::{self, IndexKeySource};
use crate::join::JoinResolver;
use crate::metadata::{self, MetadataRecord};
use crate::query_exec::QueryBuilder;
use crate::trigger::{TriggerEvent, TriggerFn, TriggerId, Triggers};

pub struct Storage<T, C: Codec<T>> {
    pub(crate) env: Arc<KvEnv>,
    pub(crate) scope: Arc<Scope>,
    pub(crate) type_name: TypeName,
    pub(crate) primary_dbi: Dbi,
    pub(crate) indices: Vec<(IndexInfo, Dbi)>,
    pub(crate) codec: C,
    primary_key: Vec<(String, Direction)>,
    triggers: Triggers<T>,
    metadata: parking_lot::RwLock<MetadataRecord>,
    closed: AtomicBool,
    pub(crate) join_resolver: parking_lot::RwLock<Option<Arc<dyn JoinResolver>>>,
}

impl<T, C: Codec<T>> Storage<T, C> {
    pub fn open(
        env: Arc<KvEnv>,
        scope: Arc<Scope>,
        type_name: TypeName,
        codec: C,
        evolution_strategy: EvolutionStrategy,
        indices: Vec<IndexInfo>,
        primary_key: Vec<(String, Direction)>,
    ) -> StoreResult<Self> {
        // Step 1: reconcile the metadata record for this type.
        let record = metadata::open_and_reconcile(
            &env,
            &scope,
            &type_name,
            codec.generation(),
            evolution_strategy,
            &primary_key,
        )?;

        // Step 2: open the primary table.
        let setup_frame = scope.enter_top(common::IsolationLevel::Serializable, true);
        let primary_dbi = scope.with_txn(setup_frame, |txn| {
            database::open_db(txn, Some(type_name.as_str()), true)
        })?.map_err(|e| StoreError::Engine(format!("open primary table: {e}")))?;

        // Step 3: open every declared index's table.
        let mut opened_indices = Vec::with_capacity(indices.len());
        for info in indices {
            let dbi = scope.with_txn(setup_frame, |txn| index::open_index_table(txn, type_name.as_str(), &info, true))??;
            opened_indices.push((info, dbi));
        }

        scope.commit(setup_frame)?;

        // Step 4/5: descriptors already validated structurally by the
        // types involved (`IndexInfo` construction); the facade is ready.
        Ok(Self {
            env,
            scope,
            type_name,
            primary_dbi,
            indices: opened_indices,
            codec,
            primary_key,
            triggers: Triggers::default(),
            metadata: parking_lot::RwLock::new(record),
            closed: AtomicBool::new(false),
            join_resolver: parking_lot::RwLock::new(None),
        })
    }

    /// Gives this handle a way to resolve a join hop against some other
    /// registered type. Set by `repository` once it has registered every
    /// type's `Storage`; a handle opened standalone (outside a
    /// `Repository`) has none and any `Plan::Joined` query against it
    /// fails with `NotSupported`.
    pub fn set_join_resolver(&self, resolver: Arc<dyn JoinResolver>) {
        *self.join_resolver.write() = Some(resolver);
    }

    /// Marks this handle closed. Idempotent; does not drop the underlying
    /// MDBX table handles (those are environment-scoped and outlive any
    /// one `Storage`), but every subsequent operation on this handle fails
    /// with `RepositoryClosed` rather than silently touching a shutting-
    /// down environment (spec §4.6 step 4).
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            Err(StoreError::RepositoryClosed)
        } else {
            Ok(())
        }
    }

    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    pub fn get_index_info(&self) -> Vec<IndexInfo> {
        self.indices.iter().map(|(i, _)| i.clone()).collect()
    }

    pub fn add_trigger(&self, hook: TriggerFn<T>) -> TriggerId {
        self.triggers.add(hook)
    }

    pub fn remove_trigger(&self, id: TriggerId) -> bool {
        self.triggers.remove(id)
    }

    /// Re-reads the metadata record, picking up a generation bump made by
    /// another handle to the same repository.
    pub fn reload(&self) -> StoreResult<()> {
        let generation = self.codec.generation();
        let strategy = self.metadata.read().evolution_strategy;
        let record = metadata::open_and_reconcile(&self.env, &self.scope, &self.type_name, generation, strategy, &self.primary_key)?;
        *self.metadata.write() = record;
        Ok(())
    }

    pub fn query(&self) -> QueryBuilder<'_, T, C> {
        QueryBuilder::new(self)
    }

    pub fn try_load(&self, frame: FrameId, key: &[u8]) -> StoreResult<Option<T>> {
        self.check_open()?;
        self.triggers.fire(&TriggerEvent::BeforeLoad { key })?;
        let value = self.load_raw(frame, key)?;
        if let Some(value) = &value {
            self.triggers.fire(&TriggerEvent::AfterLoad { key, value })?;
        }
        Ok(value)
    }

    /// Reads and decodes `key` without dispatching any load trigger. Used
    /// internally by `store`/`try_delete` to fetch the row a write is about
    /// to replace or remove — that fetch is an implementation detail of the
    /// write, not a load a caller asked for.
    fn load_raw(&self, frame: FrameId, key: &[u8]) -> StoreResult<Option<T>> {
        let bytes = self
            .scope
            .with_txn(frame, |txn| ops::get(txn, self.primary_dbi, key))?
            .map_err(|e| StoreError::Engine(e.to_string()))?;
        match bytes {
            None => Ok(None),
            Some(bytes) => {
                let (_, value) = self
                    .codec
                    .decode(&bytes)
                    .map_err(|e| StoreError::Fetch(common::FetchError::CorruptEncoding(e.to_string())))?;
                Ok(Some(value))
            }
        }
    }

    pub fn load(&self, frame: FrameId, key: &[u8]) -> StoreResult<T> {
        self.try_load(frame, key)?
            .ok_or_else(|| StoreError::Engine(format!("no record for key in '{}'", self.type_name)))
    }

    fn write_indices(&self, frame: FrameId, key: &[u8], value: &T) -> StoreResult<()>
    where
        T: IndexKeySource,
    {
        for (info, dbi) in &self.indices {
            let props: Vec<String> = info.properties.iter().map(|(p, _)| p.clone()).collect();
            let encoded = value.index_key(&props);
            self.scope.with_txn(frame, |txn| index::add_entry(txn, *dbi, info, &encoded, key))??;
        }
        Ok(())
    }

    fn remove_indices(&self, frame: FrameId, key: &[u8], value: &T) -> StoreResult<()>
    where
        T: IndexKeySource,
    {
        for (info, dbi) in &self.indices {
            let props: Vec<String> = info.properties.iter().map(|(p, _)| p.clone()).collect();
            let encoded = value.index_key(&props);
            self.scope.with_txn(frame, |txn| index::remove_entry(txn, *dbi, info, &encoded, key))??;
        }
        Ok(())
    }

    /// Inserts a brand-new row; fails with `UniqueConstraint` if `key`
    /// (or any unique index it participates in) already exists.
    pub fn insert(&self, frame: FrameId, key: &[u8], value: &T) -> StoreResult<()>
    where
        T: IndexKeySource,
    {
        self.check_open()?;
        self.triggers.fire(&TriggerEvent::BeforeInsert(value))?;
        let bytes = self
            .codec
            .encode(value)
            .map_err(|e| StoreError::Persist(common::PersistError::EncodingFailed(e.to_string())))?;

        self.scope
            .with_txn(frame, |txn| ops::put_no_overwrite(txn, self.primary_dbi, key, &bytes))?
            .map_err(|e| match e {
                kv_engine::KvError::KeyExists => StoreError::UniqueConstraint {
                    index: "primary".into(),
                },
                other => StoreError::Engine(other.to_string()),
            })?;
        self.write_indices(frame, key, value)?;
        self.triggers.fire(&TriggerEvent::AfterInsert(value))?;
        Ok(())
    }

    /// Like `insert`, but reports a conflict as `Ok(false)` instead of an
    /// error.
    pub fn try_insert(&self, frame: FrameId, key: &[u8], value: &T) -> StoreResult<bool>
    where
        T: IndexKeySource,
    {
        match self.insert(frame, key, value) {
            Ok(()) => Ok(true),
            Err(StoreError::UniqueConstraint { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Upserts `key -> value`, maintaining indices against whatever row
    /// (if any) previously lived at `key`.
    pub fn store(&self, frame: FrameId, key: &[u8], value: &T) -> StoreResult<()>
    where
        T: IndexKeySource,
    {
        self.check_open()?;
        let old = self.load_raw(frame, key)?;
        self.triggers.fire(&TriggerEvent::BeforeStore {
            old: old.as_ref(),
            new: value,
        })?;

        if let Some(old_value) = &old {
            self.remove_indices(frame, key, old_value)?;
        }

        let bytes = self
            .codec
            .encode(value)
            .map_err(|e| StoreError::Persist(common::PersistError::EncodingFailed(e.to_string())))?;
        self.scope
            .with_txn(frame, |txn| ops::put(txn, self.primary_dbi, key, &bytes))?
            .map_err(|e| StoreError::Engine(e.to_string()))?;
        self.write_indices(frame, key, value)?;
        self.triggers.fire(&TriggerEvent::AfterStore {
            old: old.as_ref(),
            new: value,
        })?;
        Ok(())
    }

    /// Deletes `key` if present, maintaining indices. Returns whether a
    /// row was actually removed.
    pub fn try_delete(&self, frame: FrameId, key: &[u8]) -> StoreResult<bool>
    where
        T: IndexKeySource,
    {
        self.check_open()?;
        let Some(old_value) = self.load_raw(frame, key)? else {
            return Ok(false);
        };
        self.triggers.fire(&TriggerEvent::BeforeDelete(&old_value))?;
        self.remove_indices(frame, key, &old_value)?;
        self.scope
            .with_txn(frame, |txn| ops::delete(txn, self.primary_dbi, key))?
            .map_err(|e| StoreError::Engine(e.to_string()))?;
        self.triggers.fire(&TriggerEvent::AfterDelete(&old_value))?;
        Ok(true)
    }

    /// Clears the primary table and every index table for this type.
    pub fn truncate(&self, frame: FrameId) -> StoreResult<()> {
        self.scope
            .with_txn(frame, |txn| database::drop_db(txn, self.primary_dbi, false))?
            .map_err(|e| StoreError::Engine(e.to_string()))?;
        for (_, dbi) in &self.indices {
            self.scope
                .with_txn(frame, |txn| database::drop_db(txn, *dbi, false))?
                .map_err(|e| StoreError::Engine(e.to_string()))?;
        }
        Ok(())
    }
}

/// Type-erased handle to `Storage::close`, so `repository` can close
/// every registered type during shutdown without naming its `T`/`C`.
pub trait Closeable: Send + Sync {
    fn close(&self);
}

impl<T, C> Closeable for Storage<T, C>
where
    T: Send + Sync,
    C: Codec<T> + Send + Sync,
{
    fn close(&self) {
        Storage::close(self)
    }
}
