//! Cross-type resolution for `query::Plan::Joined` (spec §4.7.5/4.7.6).
//!
//! A single `Storage<T, C>` only ever sees its own type's tables, but a
//! chained reference-property join needs to evaluate a filter against a
//! *different* type's records. `JoinTarget` is what every `Storage<T, C>`
//! implements so something that owns many types (`repository`) can look
//! one up by name without knowing `T`/`C` at compile time; `JoinResolver`
//! is the narrow interface a `Storage` needs back, handed to it by
//! whatever constructed it.

use std::collections::HashSet;

use common::StoreResult;
use query::Filter;
use txn::FrameId;

/// Implemented generically by `Storage<T, C>`: resolves "which primary
/// keys of this type satisfy `filter`" without exposing `T` to the
/// caller.
pub trait JoinTarget: Send + Sync {
    fn matching_primary_keys(&self, frame: FrameId, filter: Option<Filter>) -> StoreResult<HashSet<Vec<u8>>>;
}

/// Supplied to a `Storage<T, C>` by whatever registered it, letting the
/// executor resolve a `JoinStep`'s `target_type` by name.
pub trait JoinResolver: Send + Sync {
    fn matching_primary_keys(&self, target_type: &str, frame: FrameId, filter: Option<Filter>) -> StoreResult<HashSet<Vec<u8>>>;
}
