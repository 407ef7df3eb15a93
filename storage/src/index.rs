//! Structural secondary indices: a table per declared index mapping
//! encoded property values to primary keys.
//!
//! Grounded on the teacher's `indexing::structural::StructuralIndex`
//! (`"prop:{property}:{value}" -> HashSet<NodeId>` table), generalized
//! from a single property to an ordered tuple and from a multi-valued set
//! per key to one row per (value, primary-key) pair so a non-unique index
//! can be range-scanned directly instead of deserializing a set on every
//! hit.

use common::{StoreError, StoreResult};
use kv_engine::{database, ops, Dbi, Txn};
use query::IndexInfo;

/// Types whose values can project the encoded bytes an index needs for
/// its declared properties. A real derive macro would generate this;
/// here the caller implements it once per record type.
pub trait IndexKeySource {
    /// Encodes `properties`, in order, into one comparable byte string.
    /// Each property's segment must be self-delimiting (length-prefixed
    /// or escaped) so that:
    /// - lexicographic order on the combined bytes matches the tuple
    ///   order on the values, and
    /// - `index_key(&props[..k])` is always a true byte-prefix of
    ///   `index_key(&props)` for any `k <= props.len()` — the query
    ///   planner's equality-prefix bounds rely on this to scan a subrange
    ///   without decoding keys back into values.
    fn index_key(&self, properties: &[String]) -> Vec<u8>;
}

pub fn index_table_name(type_name: &str, index_name: &str) -> String {
    format!("idx:{type_name}:{index_name}")
}

pub fn open_index_table(txn: &Txn, type_name: &str, index: &IndexInfo, create: bool) -> StoreResult<Dbi> {
    let name = index_table_name(type_name, &index.name);
    database::open_db(txn, Some(&name), create).map_err(|e| StoreError::Engine(format!("open index '{}': {e}", index.name)))
}

/// Non-unique index entries key on `encoded_values ++ primary_key` rather
/// than `encoded_values` alone, so distinct rows sharing the same
/// property values get distinct MDBX keys. No length header is needed
/// between the two halves: the primary key is never recovered by parsing
/// this key back apart (it's already the MDBX value), only compared
/// lexicographically as a range-scan prefix, and `IndexKeySource`
/// implementations are required to produce a self-delimiting encoding
/// (e.g. length-prefixed per-property segments) so a `k`-property prefix
/// of the bytes can never collide with a different `k`-property value
/// tuple.
fn composite_key(encoded_values: &[u8], primary_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_values.len() + primary_key.len());
    out.extend_from_slice(encoded_values);
    out.extend_from_slice(primary_key);
    out
}

pub fn add_entry(
    txn: &Txn,
    dbi: Dbi,
    index: &IndexInfo,
    encoded_values: &[u8],
    primary_key: &[u8],
) -> StoreResult<()> {
    if index.unique {
        ops::put_no_overwrite(txn, dbi, encoded_values, primary_key).map_err(|e| match e {
            kv_engine::KvError::KeyExists => StoreError::UniqueConstraint {
                index: index.name.clone(),
            },
            other => StoreError::Engine(other.to_string()),
        })
    } else {
        let key = composite_key(encoded_values, primary_key);
        ops::put(txn, dbi, &key, primary_key).map_err(|e| StoreError::Engine(e.to_string()))
    }
}

pub fn remove_entry(
    txn: &Txn,
    dbi: Dbi,
    index: &IndexInfo,
    encoded_values: &[u8],
    primary_key: &[u8],
) -> StoreResult<()> {
    let key = if index.unique {
        encoded_values.to_vec()
    } else {
        composite_key(encoded_values, primary_key)
    };
    ops::delete(txn, dbi, &key).map_err(|e| StoreError::Engine(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Direction;
    use kv_engine::{env::EnvBuilder, txn::TxnMode};

    fn idx() -> IndexInfo {
        IndexInfo {
            name: "by_email".into(),
            properties: vec![("email".into(), Direction::Ascending)],
            unique: true,
            clustered: false,
        }
    }

    #[test]
    fn unique_index_rejects_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvBuilder::new(dir.path()).open().unwrap();
        let txn = Txn::begin(&env, None, TxnMode::ReadWrite).unwrap();
        let index = idx();
        let dbi = open_index_table(&txn, "Users", &index, true).unwrap();

        add_entry(&txn, dbi, &index, b"a@example.com", b"pk1").unwrap();
        let err = add_entry(&txn, dbi, &index, b"a@example.com", b"pk2").unwrap_err();
        assert!(matches!(err, StoreError::UniqueConstraint { .. }));

        remove_entry(&txn, dbi, &index, b"a@example.com", b"pk1").unwrap();
        add_entry(&txn, dbi, &index, b"a@example.com", b"pk2").unwrap();
        txn.commit().unwrap();
    }
}
