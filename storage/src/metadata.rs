//! Self-hosted metadata table (spec §3, folded component C3).
//!
//! One record per registered type, stored in the engine's own
//! `OBJSTORE_DATABASE_INFO` table (`common::METADATA_TABLE_NAME`) using the
//! plain bincode codec so the metadata format never depends on any
//! application type's rkyv layout.

use codec::{Codec, MetadataCodec};
use common::{Direction, EvolutionStrategy, IsolationLevel, StoreError, StoreResult, TypeName};
use kv_engine::{database, ops, Dbi, KvEnv, Txn};
use serde::{Deserialize, Serialize};
use tracing::warn;
use txn::Scope;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub database_name: String,
    /// Opaque descriptor of the primary key's property names, in order
    /// (spec §3 `indexNameDescriptor`). Immutable once any record exists
    /// for this type (invariant M1).
    pub index_name_descriptor: String,
    /// Opaque descriptor of the primary key's per-property directions
    /// (spec §3 `indexTypeDescriptor`). Immutable alongside
    /// `index_name_descriptor`.
    pub index_type_descriptor: String,
    pub evolution_strategy: EvolutionStrategy,
    /// Milliseconds since the Unix epoch when this record was first
    /// written; never updated on subsequent reconciles.
    pub creation_timestamp_ms: u64,
    /// Incremented every time the record on disk changes.
    pub version_number: u32,
    /// Codec evolution cursor (spec §3 "Generation is an evolution cursor
    /// stored with the metadata").
    pub generation: u32,
    /// Opaque bytes reserved for forward-compatible additions to this
    /// record without bumping the metadata format itself.
    pub extra_data: Vec<u8>,
}

/// Encodes a primary key's ordered property list into the pair of opaque
/// descriptor strings the metadata record carries. Comma-joined rather than
/// length-prefixed: descriptors are only ever compared for equality, never
/// parsed back apart.
fn descriptor_strings(primary_key: &[(String, Direction)]) -> (String, String) {
    let names = primary_key.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>().join(",");
    let types = primary_key
        .iter()
        .map(|(_, d)| match d {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
            Direction::Unspecified => "UNSPEC",
        })
        .collect::<Vec<_>>()
        .join(",");
    (names, types)
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Invariant M1: once a type has any records, its primary-key descriptors
/// are immutable; attempting to open with incompatible descriptors fails
/// with a schema-incompatibility error. Generation/evolution-strategy
/// compatibility is a separate, narrower check: the descriptors govern the
/// type's identity, the generation governs whether its encoded layout is
/// allowed to have moved on.
pub fn check_compatible(existing: &MetadataRecord, requested: &MetadataRecord) -> StoreResult<()> {
    if existing.database_name != requested.database_name {
        return Err(StoreError::SchemaIncompatible {
            type_name: requested.database_name.clone(),
            reason: format!(
                "metadata key collision: stored record is for type '{}'",
                existing.database_name
            ),
        });
    }
    if existing.index_name_descriptor != requested.index_name_descriptor
        || existing.index_type_descriptor != requested.index_type_descriptor
    {
        return Err(StoreError::SchemaIncompatible {
            type_name: requested.database_name.clone(),
            reason: format!(
                "primary key shape changed: stored ({}, {}), requested ({}, {})",
                existing.index_name_descriptor,
                existing.index_type_descriptor,
                requested.index_name_descriptor,
                requested.index_type_descriptor
            ),
        });
    }
    match existing.evolution_strategy {
        EvolutionStrategy::None if existing.generation != requested.generation => {
            Err(StoreError::SchemaIncompatible {
                type_name: requested.database_name.clone(),
                reason: format!(
                    "generation changed from {} to {} under evolutionStrategy::None",
                    existing.generation, requested.generation
                ),
            })
        }
        _ => Ok(()),
    }
}

/// Opens (creating if necessary) the metadata table and ensures there is a
/// compatible record for `type_name`, writing or updating one as needed.
///
/// Spec §4.4 step 4 / §7: the write is attempted under a top-level
/// `ReadCommitted` transaction, retried up to 3 times on a retryable
/// (deadlock/timeout) error; if all 3 top-level attempts are exhausted by
/// contention, the final attempt downgrades to a transaction nested under
/// whatever the calling thread already has open (a no-op downgrade if the
/// thread holds nothing, since `Scope::enter` then behaves like a fresh
/// top-level frame too).
pub fn open_and_reconcile(
    env: &KvEnv,
    scope: &Scope,
    type_name: &TypeName,
    generation: u32,
    evolution_strategy: EvolutionStrategy,
    primary_key: &[(String, Direction)],
) -> StoreResult<MetadataRecord> {
    let (index_name_descriptor, index_type_descriptor) = descriptor_strings(primary_key);

    let mut last_err = None;
    for attempt in 1..=3 {
        match try_reconcile(
            env,
            scope,
            true,
            type_name,
            generation,
            evolution_strategy,
            &index_name_descriptor,
            &index_type_descriptor,
        ) {
            Ok(record) => return Ok(record),
            Err(e) if e.is_retryable() => {
                warn!(attempt, error = %e, type_name = %type_name, "metadata write contended, retrying top-level");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    warn!(type_name = %type_name, "metadata write exhausted top-level retries, downgrading to nested transaction");
    try_reconcile(
        env,
        scope,
        false,
        type_name,
        generation,
        evolution_strategy,
        &index_name_descriptor,
        &index_type_descriptor,
    )
    .map_err(|e| if e.is_retryable() { last_err.unwrap_or(e) } else { e })
}

#[allow(clippy::too_many_arguments)]
fn try_reconcile(
    env: &KvEnv,
    scope: &Scope,
    top_level: bool,
    type_name: &TypeName,
    generation: u32,
    evolution_strategy: EvolutionStrategy,
    index_name_descriptor: &str,
    index_type_descriptor: &str,
) -> StoreResult<MetadataRecord> {
    let _ = env;
    let frame = if top_level {
        scope.enter_top(IsolationLevel::ReadCommitted, true)
    } else {
        scope.enter(IsolationLevel::ReadCommitted, true)
    };

    let outcome = scope.with_txn(frame, |txn| -> StoreResult<MetadataRecord> {
        let dbi = database::open_db(txn, Some(common::METADATA_TABLE_NAME), true).map_err(StoreError::from)?;
        let codec = MetadataCodec::new(1);
        let key = type_name.as_str().as_bytes();

        match ops::get(txn, dbi, key).map_err(StoreError::from)? {
            Some(bytes) => {
                let (_, existing): (u32, MetadataRecord) =
                    codec.decode(&bytes).map_err(|e| StoreError::SchemaIncompatible {
                        type_name: type_name.as_str().to_string(),
                        reason: format!("corrupt metadata record: {e}"),
                    })?;
                let requested = MetadataRecord {
                    database_name: type_name.as_str().to_string(),
                    index_name_descriptor: index_name_descriptor.to_string(),
                    index_type_descriptor: index_type_descriptor.to_string(),
                    evolution_strategy,
                    creation_timestamp_ms: existing.creation_timestamp_ms,
                    version_number: existing.version_number,
                    generation,
                    extra_data: existing.extra_data.clone(),
                };
                check_compatible(&existing, &requested)?;

                if existing.generation == generation && existing.evolution_strategy == evolution_strategy {
                    return Ok(existing);
                }

                let updated = MetadataRecord {
                    generation,
                    evolution_strategy,
                    version_number: existing.version_number + 1,
                    ..existing
                };
                let bytes = codec
                    .encode(&updated)
                    .map_err(|e| StoreError::Engine(format!("encode metadata: {e}")))?;
                ops::put(txn, dbi, key, &bytes).map_err(StoreError::from)?;
                Ok(updated)
            }
            None => {
                let record = MetadataRecord {
                    database_name: type_name.as_str().to_string(),
                    index_name_descriptor: index_name_descriptor.to_string(),
                    index_type_descriptor: index_type_descriptor.to_string(),
                    evolution_strategy,
                    creation_timestamp_ms: now_millis(),
                    version_number: 1,
                    generation,
                    extra_data: Vec::new(),
                };
                let bytes = codec
                    .encode(&record)
                    .map_err(|e| StoreError::Engine(format!("encode metadata: {e}")))?;
                ops::put(txn, dbi, key, &bytes).map_err(StoreError::from)?;
                Ok(record)
            }
        }
    })?;

    match outcome {
        Ok(record) => {
            scope.commit(frame)?;
            Ok(record)
        }
        Err(e) => {
            let _ = scope.exit(frame);
            Err(e)
        }
    }
}

pub fn metadata_dbi(txn: &Txn) -> StoreResult<Dbi> {
    database::open_db(txn, Some(common::METADATA_TABLE_NAME), false).map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_engine::env::EnvBuilder;
    use std::sync::Arc;

    fn env_and_scope() -> (tempfile::TempDir, Arc<KvEnv>, Scope) {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(EnvBuilder::new(dir.path()).open().unwrap());
        let scope = Scope::new(env.clone());
        (dir, env, scope)
    }

    fn pk() -> Vec<(String, Direction)> {
        vec![("id".to_string(), Direction::Ascending)]
    }

    #[test]
    fn first_open_writes_record() {
        let (_dir, env, scope) = env_and_scope();
        let rec = open_and_reconcile(&env, &scope, &TypeName::new("Orders"), 1, EvolutionStrategy::None, &pk()).unwrap();
        assert_eq!(rec.generation, 1);
        assert_eq!(rec.version_number, 1);
        assert_eq!(rec.index_name_descriptor, "id");
        assert!(rec.creation_timestamp_ms > 0);
    }

    #[test]
    fn generation_change_under_none_is_rejected() {
        let (_dir, env, scope) = env_and_scope();
        open_and_reconcile(&env, &scope, &TypeName::new("Orders"), 1, EvolutionStrategy::None, &pk()).unwrap();
        let err = open_and_reconcile(&env, &scope, &TypeName::new("Orders"), 2, EvolutionStrategy::None, &pk()).unwrap_err();
        assert!(matches!(err, StoreError::SchemaIncompatible { .. }));
    }

    #[test]
    fn generation_change_under_standard_is_allowed() {
        let (_dir, env, scope) = env_and_scope();
        open_and_reconcile(&env, &scope, &TypeName::new("Orders"), 1, EvolutionStrategy::Standard, &pk()).unwrap();
        let rec = open_and_reconcile(&env, &scope, &TypeName::new("Orders"), 2, EvolutionStrategy::Standard, &pk()).unwrap();
        assert_eq!(rec.generation, 2);
        assert_eq!(rec.version_number, 2);
    }

    #[test]
    fn primary_key_shape_change_is_rejected_even_under_standard() {
        let (_dir, env, scope) = env_and_scope();
        open_and_reconcile(&env, &scope, &TypeName::new("Orders"), 1, EvolutionStrategy::Standard, &pk()).unwrap();
        let different_pk = vec![("order_id".to_string(), Direction::Ascending)];
        let err =
            open_and_reconcile(&env, &scope, &TypeName::new("Orders"), 1, EvolutionStrategy::Standard, &different_pk).unwrap_err();
        assert!(matches!(err, StoreError::SchemaIncompatible { .. }));
    }

    #[test]
    fn reconciling_same_generation_leaves_version_unchanged() {
        let (_dir, env, scope) = env_and_scope();
        open_and_reconcile(&env, &scope, &TypeName::new("Orders"), 1, EvolutionStrategy::Standard, &pk()).unwrap();
        let rec = open_and_reconcile(&env, &scope, &TypeName::new("Orders"), 1, EvolutionStrategy::Standard, &pk()).unwrap();
        assert_eq!(rec.version_number, 1);
    }
}
