//! Executes a `query::Plan` against this storage's tables (spec §4.7.6/
//! 4.7.7, the executor operators). The planner (C7, the `query` crate)
//! only decides *what* to scan; this module is the one place that knows
//! *how*. `Plan::Joined` is the one operator that can't be resolved purely
//! against this type's own tables: each hop needs to ask a *different*
//! type's storage which of its rows satisfy the hop's filter. This module
//! does that through `storage.join_resolver` (see `crate::join`), which
//! `repository` (the only component holding every registered type's
//! `Storage`) installs on every handle it opens. A `Storage` built outside
//! a `Repository` has no resolver, so a `Joined` query against it fails
//! with `NotSupported` rather than silently degrading to its base plan.

use std::collections::HashSet;

use common::{Direction, StoreError, StoreResult};
use codec::Codec;
use kv_engine::Cursor as RawCursor;
use query::{Comparator, Filter, IndexInfo, Ordering, Plan, Predicate};
use range_cursor::{Bound, RangeCursor};
use txn::FrameId;

use crate::facade::Storage;
use crate::index::IndexKeySource;
use crate::join::JoinTarget;

pub struct QueryBuilder<'s, T, C: Codec<T>> {
    storage: &'s Storage<T, C>,
    filter: Option<Filter>,
    ordering: Ordering,
    joins: Vec<query::JoinStep>,
}

impl<'s, T, C: Codec<T>> QueryBuilder<'s, T, C> {
    pub fn new(storage: &'s Storage<T, C>) -> Self {
        Self {
            storage,
            filter: None,
            ordering: Ordering::default(),
            joins: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Adds a chained reference-property hop (spec §4.7.5): keep only
    /// rows whose `reference_property` points at a row of `target_type`
    /// satisfying `target_filter`. Multiple calls chain the hops in
    /// order.
    pub fn join(mut self, step: query::JoinStep) -> Self {
        self.joins.push(step);
        self
    }

    fn plan(&self) -> Plan {
        let conjuncts = self.filter.as_ref().map(query::filter::normalize_to_dnf).unwrap_or_default();
        let indices = self.storage.get_index_info();
        let base = query::plan_query(&indices, &conjuncts, &self.ordering);
        if self.joins.is_empty() {
            base
        } else {
            query::plan_joined(base, self.joins.clone())
        }
    }

    pub fn explain(&self) -> String {
        self.plan().explain()
    }

    /// Runs the query and decodes every matching row (spec §6 terminal
    /// method `fetch`).
    pub fn fetch(&self, frame: FrameId) -> StoreResult<Vec<T>>
    where
        T: IndexKeySource,
    {
        Ok(self.rows(frame)?.into_iter().map(|(_, v)| v).collect())
    }

    /// Fast-path count: a unique point lookup that resolves to nothing
    /// more than an index (or primary-key) presence check never needs to
    /// decode a value.
    pub fn count(&self, frame: FrameId) -> StoreResult<usize>
    where
        T: IndexKeySource,
    {
        Ok(self.rows(frame)?.len())
    }

    /// True iff the query matches at least one row (spec §6 terminal
    /// method `exists`). For a `Plan::Singleton` this is a single direct
    /// `get`, not a scan.
    pub fn exists(&self, frame: FrameId) -> StoreResult<bool>
    where
        T: IndexKeySource,
    {
        let plan = self.plan();
        if matches!(plan, Plan::Empty) {
            return Ok(false);
        }
        Ok(!execute_plan(&plan, frame, self.storage)?.is_empty())
    }

    /// Deletes the first matching row, if any (spec §6 terminal method
    /// `deleteOne`). Returns whether a row was removed.
    pub fn delete_one(&self, frame: FrameId) -> StoreResult<bool>
    where
        T: IndexKeySource,
    {
        let rows = self.rows(frame)?;
        match rows.into_iter().next() {
            Some((key, _)) => self.storage.try_delete(frame, &key),
            None => Ok(false),
        }
    }

    /// Deletes every matching row (spec §6 terminal method `deleteAll`).
    /// Returns the number of rows removed.
    pub fn delete_all(&self, frame: FrameId) -> StoreResult<usize>
    where
        T: IndexKeySource,
    {
        let rows = self.rows(frame)?;
        let mut removed = 0;
        for (key, _) in rows {
            if self.storage.try_delete(frame, &key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn rows(&self, frame: FrameId) -> StoreResult<Vec<(Vec<u8>, T)>>
    where
        T: IndexKeySource,
    {
        let plan = self.plan();
        let mut rows = execute_plan(&plan, frame, self.storage)?;
        if let Some(ordering) = ordering_of(&plan) {
            sort_rows(&mut rows, ordering);
        }
        Ok(rows)
    }

    /// Just the primary keys of every matching row, skipping value decode
    /// entirely. What a `JoinTarget` needs to answer "which of my rows
    /// satisfy this filter" for a join hop landing on this type.
    pub(crate) fn keys(&self, frame: FrameId) -> StoreResult<HashSet<Vec<u8>>>
    where
        T: IndexKeySource,
    {
        Ok(self.rows(frame)?.into_iter().map(|(k, _)| k).collect())
    }
}

/// Finds the `Ordering` a plan still needs applied after execution.
/// `execute_plan`'s own `Plan::Sorted` arm only unwraps to its inner
/// plan — the actual sort happens here, once, on the final row set,
/// since sorting midway through a `Joined` or `Filtered` wrapper would
/// just be redone (or invalidated) by the next row-removing stage.
fn ordering_of(plan: &Plan) -> Option<&Ordering> {
    match plan {
        Plan::Sorted { ordering, .. } => Some(ordering),
        Plan::Joined { base, .. } => ordering_of(base),
        Plan::Filtered { inner, .. } => ordering_of(inner),
        _ => None,
    }
}

fn sort_rows<T: IndexKeySource>(rows: &mut [(Vec<u8>, T)], ordering: &Ordering) {
    rows.sort_by(|(_, a), (_, b)| {
        for ob in &ordering.0 {
            let ka = a.index_key(std::slice::from_ref(&ob.property));
            let kb = b.index_key(std::slice::from_ref(&ob.property));
            let ord = ka.cmp(&kb);
            let ord = if ob.direction == Direction::Descending {
                ord.reverse()
            } else {
                ord
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn evaluate_predicate<T: IndexKeySource>(value: &T, predicate: &Predicate) -> bool {
    let encoded = value.index_key(std::slice::from_ref(&predicate.property));
    match predicate.comparator {
        Comparator::Eq => encoded == predicate.value,
        Comparator::Ne => encoded != predicate.value,
        Comparator::Lt => encoded < predicate.value,
        Comparator::Le => encoded <= predicate.value,
        Comparator::Gt => encoded > predicate.value,
        Comparator::Ge => encoded >= predicate.value,
        Comparator::StartsWith => encoded.starts_with(predicate.value.as_slice()),
    }
}

fn matches_remainder<T: IndexKeySource>(value: &T, remainder: &[Predicate]) -> bool {
    remainder.iter().all(|p| evaluate_predicate(value, p))
}

/// Increments the last non-`0xFF` byte (dropping any trailing `0xFF`s),
/// producing the smallest byte string strictly greater than every string
/// with `bytes` as a prefix. Mirrors `range_cursor`'s internal helper;
/// duplicated here because it's a five-line leaf operation, not worth a
/// shared dependency between the two crates.
fn successor(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut out = bytes.to_vec();
    while let Some(&last) = out.last() {
        if last != 0xFF {
            *out.last_mut().unwrap() += 1;
            return Some(out);
        }
        out.pop();
    }
    None
}

fn index_scan_bounds(
    equality_prefix: &[Predicate],
    range_start: &Option<Predicate>,
    range_end: &Option<Predicate>,
) -> (Bound, Bound) {
    let prefix: Vec<u8> = equality_prefix.iter().flat_map(|p| p.value.clone()).collect();

    let lower = match range_start {
        Some(pred) => {
            let mut bytes = prefix.clone();
            bytes.extend_from_slice(&pred.value);
            match pred.comparator {
                Comparator::Gt => Bound::Exclusive(bytes),
                _ => Bound::Inclusive(bytes),
            }
        }
        None if prefix.is_empty() => Bound::Unbounded,
        None => Bound::Inclusive(prefix.clone()),
    };

    let upper = match range_end {
        Some(pred) => {
            let mut bytes = prefix.clone();
            bytes.extend_from_slice(&pred.value);
            match pred.comparator {
                Comparator::Lt => Bound::Exclusive(bytes),
                Comparator::StartsWith => successor(&bytes).map(Bound::Exclusive).unwrap_or(Bound::Unbounded),
                _ => Bound::Inclusive(bytes),
            }
        }
        None => successor(&prefix).map(Bound::Exclusive).filter(|_| !prefix.is_empty()).unwrap_or(Bound::Unbounded),
    };

    (lower, upper)
}

fn execute_plan<T, C>(plan: &Plan, frame: FrameId, storage: &Storage<T, C>) -> StoreResult<Vec<(Vec<u8>, T)>>
where
    C: Codec<T>,
    T: IndexKeySource,
{
    match plan {
        Plan::Empty => Ok(Vec::new()),

        Plan::FullScan { remainder } => storage.scope.with_txn(frame, |txn| -> StoreResult<Vec<(Vec<u8>, T)>> {
            let raw = RawCursor::open(txn, storage.primary_dbi)
                .map_err(|e| StoreError::Engine(e.to_string()))?;
            let mut rc = RangeCursor::new(raw, Bound::Unbounded, Bound::Unbounded, Direction::Ascending);
            let mut out = Vec::new();
            while let Some(entry) = rc.advance().map_err(|e| StoreError::Engine(e.to_string()))? {
                let (_, value) = storage
                    .codec
                    .decode(&entry.value)
                    .map_err(|e| StoreError::Fetch(common::FetchError::CorruptEncoding(e.to_string())))?;
                if matches_remainder(&value, remainder) {
                    out.push((entry.key, value));
                }
            }
            Ok(out)
        })?,

        Plan::Singleton { index, equality } => {
            let Some((_, dbi)) = storage.indices.iter().find(|(i, _)| &i.name == index) else {
                return Err(StoreError::Engine(format!("unknown index '{index}'")));
            };
            let dbi = *dbi;
            let key_bytes: Vec<u8> = equality.iter().flat_map(|p| p.value.clone()).collect();

            storage.scope.with_txn(frame, |txn| -> StoreResult<Vec<(Vec<u8>, T)>> {
                let Some(primary_key) = kv_engine::ops::get(txn, dbi, &key_bytes).map_err(|e| StoreError::Engine(e.to_string()))? else {
                    return Ok(Vec::new());
                };
                let Some(bytes) = kv_engine::ops::get(txn, storage.primary_dbi, &primary_key).map_err(|e| StoreError::Engine(e.to_string()))? else {
                    return Ok(Vec::new());
                };
                let (_, value) = storage
                    .codec
                    .decode(&bytes)
                    .map_err(|e| StoreError::Fetch(common::FetchError::CorruptEncoding(e.to_string())))?;
                Ok(vec![(primary_key, value)])
            })?
        }

        Plan::IndexScan {
            index,
            reverse,
            equality_prefix,
            range_start,
            range_end,
            remainder,
        } => {
            let Some((_, dbi)) = storage.indices.iter().find(|(i, _)| &i.name == index) else {
                return Err(StoreError::Engine(format!("unknown index '{index}'")));
            };
            let (lower, upper) = index_scan_bounds(equality_prefix, range_start, range_end);
            let direction = if *reverse { Direction::Descending } else { Direction::Ascending };
            let dbi = *dbi;

            storage.scope.with_txn(frame, |txn| -> StoreResult<Vec<(Vec<u8>, T)>> {
                let raw = RawCursor::open(txn, dbi).map_err(|e| StoreError::Engine(e.to_string()))?;
                let mut rc = RangeCursor::new(raw, lower, upper, direction);
                let mut out = Vec::new();
                while let Some(entry) = rc.advance().map_err(|e| StoreError::Engine(e.to_string()))? {
                    // Both unique and non-unique index entries store the
                    // primary key as the MDBX value.
                    let primary_key = entry.value;
                    let Some(bytes) = kv_engine::ops::get(txn, storage.primary_dbi, &primary_key)
                        .map_err(|e| StoreError::Engine(e.to_string()))?
                    else {
                        continue;
                    };
                    let (_, value) = storage
                        .codec
                        .decode(&bytes)
                        .map_err(|e| StoreError::Fetch(common::FetchError::CorruptEncoding(e.to_string())))?;
                    if matches_remainder(&value, remainder) {
                        out.push((primary_key, value));
                    }
                }
                Ok(out)
            })?
        }

        Plan::Filtered { inner, remainder } => {
            let rows = execute_plan(inner, frame, storage)?;
            Ok(rows.into_iter().filter(|(_, v)| matches_remainder(v, remainder)).collect())
        }

        Plan::Sorted { inner, .. } => execute_plan(inner, frame, storage),

        Plan::Union { branches } => {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for branch in branches {
                for (key, value) in execute_plan(branch, frame, storage)? {
                    if seen.insert(key.clone()) {
                        out.push((key, value));
                    }
                }
            }
            Ok(out)
        }

        Plan::Joined { base, steps } => {
            let mut rows = execute_plan(base, frame, storage)?;
            for step in steps {
                if rows.is_empty() {
                    break;
                }
                let resolver = storage.join_resolver.read();
                let Some(resolver) = resolver.as_ref() else {
                    return Err(StoreError::NotSupported(format!(
                        "joining '{}' to '{}' needs a Storage opened through a Repository (no JoinResolver set)",
                        storage.type_name(),
                        step.target_type
                    )));
                };
                let matching = resolver.matching_primary_keys(&step.target_type, frame, step.target_filter.clone())?;
                drop(resolver);
                // The reference property's encoded bytes are required to
                // equal the raw primary key bytes of the referenced row —
                // the same convention `evaluate_predicate` relies on for
                // ordinary equality matches, just targeting another type's
                // primary key instead of one of its own indexed values.
                rows.retain(|(_, value)| {
                    let foreign_key = value.index_key(std::slice::from_ref(&step.reference_property));
                    matching.contains(&foreign_key)
                });
            }
            Ok(rows)
        }
    }
}

impl<T, C> JoinTarget for Storage<T, C>
where
    T: IndexKeySource + Send + Sync,
    C: Codec<T> + Send + Sync,
{
    fn matching_primary_keys(&self, frame: FrameId, filter: Option<Filter>) -> StoreResult<HashSet<Vec<u8>>> {
        let mut builder = QueryBuilder::new(self);
        if let Some(filter) = filter {
            builder = builder.filter(filter);
        }
        builder.keys(frame)
    }
}

/// Re-exported so the `query` crate's `IndexInfo` doesn't need a second
/// import path from callers that only touch `storage`.
pub type IndexDescriptor = IndexInfo;
