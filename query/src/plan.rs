//! Scoring and plan construction (spec §4.7.2-4.7.4).
//!
//! Every available index is scored against each DNF conjunct for how much
//! of the filter it can absorb (`FilteringScore`) and, independently, how
//! much of the requested ordering it can deliver for free
//! (`OrderingScore`). Index selection is a three-stage lexicographic
//! comparison (§4.7.4): the range comparator decides correctness (which
//! index yields the narrowest, still-correct scan), ties are broken by how
//! much ordering an index satisfies for free, and remaining ties by the
//! full (cost) comparator.

use std::collections::HashSet;

use common::Direction;

use crate::filter::{Comparator, Conjunct, Filter, Ordering, Predicate};

/// Describes one index available over a type: an ordered tuple of
/// properties with a fixed per-property direction, as declared when the
/// index was created (spec §4.7 "arrangement").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub properties: Vec<(String, Direction)>,
    pub unique: bool,
    /// True for the table's physical storage order (the primary index, or
    /// an engine that clusters a secondary index's leaves by its key).
    /// Preferred over a non-clustered index of otherwise equal score
    /// because it avoids the extra indirection through the primary table.
    pub clustered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteringScore {
    /// Count of leading index properties pinned by an `Eq` predicate in
    /// the conjunct — the identity prefix an index scan can seek to
    /// directly.
    pub identity_prefix: usize,
    /// The lower-bound predicate (`Gt`/`Ge`/`StartsWith`) narrowing the
    /// property immediately after the identity prefix, if any.
    pub range_start: Option<Predicate>,
    /// The upper-bound predicate (`Lt`/`Le`/`StartsWith`) narrowing that
    /// same property, if any. `StartsWith` supplies both ends from a
    /// single predicate.
    pub range_end: Option<Predicate>,
    /// True iff *both* a start and an end bound exist on the narrowed
    /// property — a fully closed range, not just a one-sided one.
    pub has_range_match: bool,
    /// The index's declared direction on the narrowed property is
    /// descending; independent of any ordering the caller requested; the
    /// executor uses this to know whether its range scan runs forward or
    /// backward over the index's native order.
    pub should_reverse_range: bool,
    /// Every predicate in the conjunct the index does *not* absorb; these
    /// must be re-checked in memory after the scan.
    pub remainder: Vec<Predicate>,
    /// The leading equality predicates the index prefix absorbed, in
    /// index-property order — what the executor concatenates to build the
    /// scan's seek key.
    pub consumed_equality: Vec<Predicate>,
    /// True iff the index is unique and every one of its properties is
    /// equality-constrained — a point lookup rather than a range.
    pub is_key_match: bool,
    /// `identity_prefix * 2 + has_range_match as usize`; equality
    /// narrowing is worth more than a trailing range because it produces
    /// a tighter scan.
    pub arrangement_score: u32,
}

pub fn filtering_score(index: &IndexInfo, conjunct: &Conjunct) -> FilteringScore {
    let mut remaining: Vec<Predicate> = conjunct.predicates.clone();
    let mut identity_prefix = 0usize;
    let mut range_start = None;
    let mut range_end = None;
    let mut should_reverse_range = false;

    for (prop, dir) in &index.properties {
        let eq_pos = remaining
            .iter()
            .position(|p| &p.property == prop && p.comparator == Comparator::Eq);
        if let Some(pos) = eq_pos {
            identity_prefix += 1;
            remaining.remove(pos);
            continue;
        }

        let lower_pos = remaining
            .iter()
            .position(|p| &p.property == prop && matches!(p.comparator, Comparator::Ge | Comparator::Gt));
        if let Some(pos) = lower_pos {
            range_start = Some(remaining.remove(pos));
        }
        let upper_pos = remaining
            .iter()
            .position(|p| &p.property == prop && matches!(p.comparator, Comparator::Le | Comparator::Lt));
        if let Some(pos) = upper_pos {
            range_end = Some(remaining.remove(pos));
        }
        if range_start.is_none() && range_end.is_none() {
            let starts_with_pos = remaining
                .iter()
                .position(|p| &p.property == prop && p.comparator == Comparator::StartsWith);
            if let Some(pos) = starts_with_pos {
                let p = remaining.remove(pos);
                range_start = Some(p.clone());
                range_end = Some(p);
            }
        }
        if range_start.is_some() || range_end.is_some() {
            should_reverse_range = *dir == Direction::Descending;
        }
        break;
    }

    // Re-derive the consumed-equality list from `conjunct` rather than
    // tracking it during the loop above, since it's just the predicates
    // that disappeared from `remaining`.
    let consumed_equality: Vec<Predicate> = conjunct
        .predicates
        .iter()
        .filter(|p| !remaining.contains(p) && p.comparator == Comparator::Eq)
        .cloned()
        .collect();

    let has_range_match = range_start.is_some() && range_end.is_some();
    let is_key_match = index.unique && identity_prefix == index.properties.len() && range_start.is_none() && range_end.is_none();
    let arrangement_score = (identity_prefix as u32) * 2 + has_range_match as u32;

    FilteringScore {
        identity_prefix,
        range_start,
        range_end,
        has_range_match,
        should_reverse_range,
        remainder: remaining,
        consumed_equality,
        is_key_match,
        arrangement_score,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingScore {
    /// Count of leading ordering columns the index can deliver without an
    /// in-memory sort, possibly by scanning in reverse.
    pub handled_prefix: usize,
    /// True when `handled_prefix == ordering.0.len()`: the scan order
    /// already satisfies the request end to end.
    pub free_ordering: bool,
    pub should_reverse: bool,
}

/// Scores how much of `ordering` the index can satisfy for free, given
/// that `identity_prefix` leading index properties are already pinned to
/// a constant by equality. Per the "gap via equality" rule, a pinned
/// property carries no direction information (its value never changes
/// within the scan) so it's skipped rather than treated as a mismatch —
/// an index on `(tenant, created_at)` with `tenant = X` fully satisfies
/// `ORDER BY created_at` even though `tenant` isn't part of the ordering.
pub fn ordering_score(index: &IndexInfo, ordering: &Ordering, identity_prefix: usize) -> OrderingScore {
    if ordering.is_empty() {
        return OrderingScore {
            handled_prefix: 0,
            free_ordering: true,
            should_reverse: false,
        };
    }

    let candidates = &index.properties[identity_prefix.min(index.properties.len())..];
    let mut handled = 0usize;
    let mut reverse_votes = 0i32;

    for (i, ob) in ordering.0.iter().enumerate() {
        let Some((_, index_dir)) = candidates.get(i) else {
            break;
        };
        if ob.direction == Direction::Unspecified {
            handled += 1;
            continue;
        }
        if *index_dir == ob.direction {
            handled += 1;
            reverse_votes -= 1;
        } else if index_dir.reversed() == ob.direction {
            handled += 1;
            reverse_votes += 1;
        } else {
            break;
        }
    }

    OrderingScore {
        handled_prefix: handled,
        free_ordering: handled == ordering.0.len(),
        should_reverse: reverse_votes > 0,
    }
}

/// Range comparator (spec §4.7.4): correctness-bearing. Prefers, in order,
/// a longer identity prefix, a fully closed range match, any one-sided
/// range bound at all, and a clustered index — ignoring how many
/// properties the index declares in total.
fn range_key(filtering: &FilteringScore, index: &IndexInfo) -> (usize, bool, bool, bool) {
    (
        filtering.identity_prefix,
        filtering.has_range_match,
        filtering.range_start.is_some() || filtering.range_end.is_some(),
        index.clustered,
    )
}

/// Full comparator (spec §4.7.4): cost. Extends the range comparator with
/// a preference for clustered, then narrower (fewer declared properties,
/// cheaper to maintain and usually more selective per byte), then the
/// raw arrangement score.
fn full_key(filtering: &FilteringScore, index: &IndexInfo) -> (bool, std::cmp::Reverse<usize>, u32) {
    (index.clustered, std::cmp::Reverse(index.properties.len()), filtering.arrangement_score)
}

/// A chained reference-property hop used by `Plan::Joined` (spec §4.7.5):
/// follow `reference_property` on the current row into `target_type`,
/// keeping only rows whose referenced record matches `target_filter`
/// (`None` accepts every referenced record, i.e. the hop only asserts the
/// reference resolves).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStep {
    pub reference_property: String,
    pub target_type: String,
    pub target_filter: Option<Filter>,
}

/// The executor operators spec §4.7.6/4.7.7 name. `storage` (and, for
/// `Joined`, `repository`) interprets these against its own tables; this
/// crate only decides which one to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    IndexScan {
        index: String,
        reverse: bool,
        equality_prefix: Vec<Predicate>,
        range_start: Option<Predicate>,
        range_end: Option<Predicate>,
        remainder: Vec<Predicate>,
    },
    Filtered {
        inner: Box<Plan>,
        remainder: Vec<Predicate>,
    },
    Sorted {
        inner: Box<Plan>,
        ordering: Ordering,
    },
    Joined {
        base: Box<Plan>,
        steps: Vec<JoinStep>,
    },
    Union {
        branches: Vec<Plan>,
    },
    FullScan {
        remainder: Vec<Predicate>,
    },
    /// A direct unique-index point lookup: `index` resolves `equality`
    /// (one value per index property, in order) straight to a primary
    /// key, bypassing the cursor/range-scan machinery entirely.
    Singleton {
        index: String,
        equality: Vec<Predicate>,
    },
    /// The conjunct is statically contradictory (e.g. two different `Eq`
    /// values, or an `Eq`/`Ne` pair on the same value, for one property)
    /// — no row can ever match, so there is nothing to scan.
    Empty,
}

impl Plan {
    pub fn explain(&self) -> String {
        match self {
            Plan::IndexScan { index, reverse, remainder, .. } => {
                format!("IndexScan({index}, reverse={reverse}, remainder={})", remainder.len())
            }
            Plan::Filtered { inner, remainder } => {
                format!("Filtered({}, remainder={})", inner.explain(), remainder.len())
            }
            Plan::Sorted { inner, ordering } => format!("Sorted({}, by={})", inner.explain(), ordering.0.len()),
            Plan::Joined { base, steps } => format!("Joined({}, hops={})", base.explain(), steps.len()),
            Plan::Union { branches } => {
                let parts: Vec<String> = branches.iter().map(Plan::explain).collect();
                format!("Union[{}]", parts.join(", "))
            }
            Plan::FullScan { remainder } => format!("FullScan(remainder={})", remainder.len()),
            Plan::Singleton { index, .. } => format!("Singleton({index})"),
            Plan::Empty => "Empty".to_string(),
        }
    }
}

/// Picks, for one conjunct, the highest-scoring index (or `None` if no
/// index beats an unindexed full scan — i.e. it absorbs no predicate at
/// all). Selection is lexicographic: the range comparator first
/// (correctness), then how much ordering the index satisfies for free,
/// then the full (cost) comparator.
fn best_index_for<'a>(indices: &'a [IndexInfo], conjunct: &Conjunct, ordering: &Ordering) -> Option<(&'a IndexInfo, FilteringScore, OrderingScore)> {
    indices
        .iter()
        .map(|idx| {
            let fscore = filtering_score(idx, conjunct);
            let oscore = ordering_score(idx, ordering, fscore.identity_prefix);
            (idx, fscore, oscore)
        })
        .filter(|(_, f, _)| f.identity_prefix > 0 || f.range_start.is_some() || f.range_end.is_some())
        .max_by_key(|(idx, f, o)| {
            (range_key(f, idx), (o.handled_prefix, o.free_ordering), full_key(f, idx))
        })
}

/// Detects a conjunct that can never match any row: two different `Eq`
/// values on the same property, or an `Eq` and a `Ne` pinning the same
/// property to the same value.
fn conjunct_is_contradictory(conjunct: &Conjunct) -> bool {
    let mut eq_values: Vec<(&str, &[u8])> = Vec::new();
    for p in &conjunct.predicates {
        if p.comparator == Comparator::Eq {
            if let Some((_, existing)) = eq_values.iter().find(|(prop, _)| *prop == p.property) {
                if *existing != p.value.as_slice() {
                    return true;
                }
            } else {
                eq_values.push((p.property.as_str(), p.value.as_slice()));
            }
        }
    }
    conjunct.predicates.iter().any(|p| {
        p.comparator == Comparator::Ne
            && eq_values
                .iter()
                .any(|(prop, value)| *prop == p.property && *value == p.value.as_slice())
    })
}

fn plan_conjunct(indices: &[IndexInfo], conjunct: &Conjunct, ordering: &Ordering) -> Plan {
    if conjunct_is_contradictory(conjunct) {
        return Plan::Empty;
    }

    match best_index_for(indices, conjunct, ordering) {
        Some((idx, fscore, oscore)) => {
            if fscore.is_key_match && fscore.remainder.is_empty() {
                return Plan::Singleton {
                    index: idx.name.clone(),
                    equality: fscore.consumed_equality,
                };
            }
            let scan = Plan::IndexScan {
                index: idx.name.clone(),
                reverse: oscore.should_reverse || fscore.should_reverse_range,
                equality_prefix: fscore.consumed_equality.clone(),
                range_start: fscore.range_start.clone(),
                range_end: fscore.range_end.clone(),
                remainder: vec![],
            };
            if fscore.remainder.is_empty() {
                scan
            } else {
                Plan::Filtered {
                    inner: Box::new(scan),
                    remainder: fscore.remainder,
                }
            }
        }
        None => Plan::FullScan {
            remainder: conjunct.predicates.clone(),
        },
    }
}

/// Builds a plan for an already-DNF-normalized filter plus an optional
/// ordering request. Multiple conjuncts become a `Union` of their
/// individual plans (the "union split" spec §4.7.5 names); if the
/// ordering isn't already free on every branch, the whole union is
/// wrapped in one `Sorted` stage that merges the branches back into a
/// single ordered stream rather than sorting each branch separately.
pub fn plan_query(indices: &[IndexInfo], conjuncts: &[Conjunct], ordering: &Ordering) -> Plan {
    if conjuncts.is_empty() {
        let base = Plan::FullScan { remainder: vec![] };
        return if ordering.is_empty() {
            base
        } else {
            Plan::Sorted {
                inner: Box::new(base),
                ordering: ordering.clone(),
            }
        };
    }

    let branch_plans: Vec<Plan> = conjuncts.iter().map(|c| plan_conjunct(indices, c, ordering)).collect();

    let all_free = conjuncts.iter().all(|c| {
        if conjunct_is_contradictory(c) {
            return true;
        }
        best_index_for(indices, c, ordering)
            .map(|(_, f, o)| f.is_key_match || o.free_ordering)
            .unwrap_or(ordering.is_empty())
    });

    let combined = if branch_plans.len() == 1 {
        branch_plans.into_iter().next().unwrap()
    } else {
        Plan::Union { branches: branch_plans }
    };

    if ordering.is_empty() || all_free {
        combined
    } else {
        Plan::Sorted {
            inner: Box::new(combined),
            ordering: ordering.clone(),
        }
    }
}

/// Appends a chain of reference-property hops onto an already-planned
/// base query, producing `Plan::Joined` (spec §4.7.5 joined plan
/// construction across chained reference properties).
pub fn plan_joined(base: Plan, steps: Vec<JoinStep>) -> Plan {
    if steps.is_empty() {
        base
    } else {
        Plan::Joined {
            base: Box::new(base),
            steps,
        }
    }
}

/// Helper used by callers building `Ordering`/`IndexInfo` values to
/// confirm an index only names properties the type actually declares,
/// surfaced so `storage` can validate index descriptors at registration
/// time rather than at query time.
pub fn validate_index_properties(index: &IndexInfo, known_properties: &HashSet<String>) -> bool {
    index.properties.iter().all(|(p, _)| known_properties.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Comparator, Filter, Predicate};

    fn idx(name: &str, props: &[(&str, Direction)]) -> IndexInfo {
        IndexInfo {
            name: name.to_string(),
            properties: props.iter().map(|(p, d)| (p.to_string(), *d)).collect(),
            unique: false,
            clustered: false,
        }
    }

    fn unique_idx(name: &str, props: &[(&str, Direction)]) -> IndexInfo {
        IndexInfo {
            unique: true,
            ..idx(name, props)
        }
    }

    #[test]
    fn point_lookup_on_unique_index_scores_as_key_match() {
        let index = unique_idx("by_email", &[("email", Direction::Ascending)]);
        let conjunct = Conjunct {
            predicates: vec![Predicate::new("email", Comparator::Eq, b"x".to_vec())],
        };
        let score = filtering_score(&index, &conjunct);
        assert!(score.is_key_match);
        assert_eq!(score.identity_prefix, 1);
    }

    #[test]
    fn point_lookup_on_non_unique_index_is_not_a_key_match() {
        let index = idx("by_email", &[("email", Direction::Ascending)]);
        let conjunct = Conjunct {
            predicates: vec![Predicate::new("email", Comparator::Eq, b"x".to_vec())],
        };
        let score = filtering_score(&index, &conjunct);
        assert!(!score.is_key_match);
    }

    #[test]
    fn unique_key_match_plans_as_singleton() {
        let index = unique_idx("by_email", &[("email", Direction::Ascending)]);
        let conjuncts = vec![Conjunct {
            predicates: vec![Predicate::new("email", Comparator::Eq, b"x".to_vec())],
        }];
        let plan = plan_query(&[index], &conjuncts, &Ordering::default());
        assert!(matches!(plan, Plan::Singleton { .. }));
    }

    #[test]
    fn contradictory_conjunct_plans_as_empty() {
        let conjuncts = vec![Conjunct {
            predicates: vec![
                Predicate::new("id", Comparator::Eq, vec![1]),
                Predicate::new("id", Comparator::Eq, vec![2]),
            ],
        }];
        let plan = plan_query(&[], &conjuncts, &Ordering::default());
        assert!(matches!(plan, Plan::Empty));
    }

    #[test]
    fn eq_and_ne_same_value_is_contradictory() {
        let conjunct = Conjunct {
            predicates: vec![
                Predicate::new("id", Comparator::Eq, vec![1]),
                Predicate::new("id", Comparator::Ne, vec![1]),
            ],
        };
        assert!(conjunct_is_contradictory(&conjunct));
    }

    #[test]
    fn closed_range_sets_has_range_match() {
        let index = idx("by_age", &[("age", Direction::Ascending)]);
        let conjunct = Conjunct {
            predicates: vec![
                Predicate::new("age", Comparator::Ge, vec![10]),
                Predicate::new("age", Comparator::Le, vec![20]),
            ],
        };
        let score = filtering_score(&index, &conjunct);
        assert!(score.has_range_match);
        assert!(score.range_start.is_some());
        assert!(score.range_end.is_some());
    }

    #[test]
    fn one_sided_range_does_not_set_has_range_match() {
        let index = idx("by_age", &[("age", Direction::Ascending)]);
        let conjunct = Conjunct {
            predicates: vec![Predicate::new("age", Comparator::Ge, vec![10])],
        };
        let score = filtering_score(&index, &conjunct);
        assert!(!score.has_range_match);
        assert!(score.range_start.is_some());
        assert!(score.range_end.is_none());
    }

    #[test]
    fn ordering_free_through_equality_gap() {
        let index = idx(
            "by_tenant_created",
            &[("tenant", Direction::Ascending), ("created_at", Direction::Ascending)],
        );
        let conjunct = Conjunct {
            predicates: vec![Predicate::new("tenant", Comparator::Eq, b"t1".to_vec())],
        };
        let fscore = filtering_score(&index, &conjunct);
        let ordering = Ordering::by("created_at", Direction::Ascending);
        let oscore = ordering_score(&index, &ordering, fscore.identity_prefix);
        assert!(oscore.free_ordering);
        assert!(!oscore.should_reverse);
    }

    #[test]
    fn reversed_direction_requires_reverse_scan() {
        let index = idx("by_score", &[("score", Direction::Ascending)]);
        let ordering = Ordering::by("score", Direction::Descending);
        let oscore = ordering_score(&index, &ordering, 0);
        assert!(oscore.free_ordering);
        assert!(oscore.should_reverse);
    }

    #[test]
    fn no_matching_index_falls_back_to_full_scan() {
        let conjuncts = vec![Conjunct {
            predicates: vec![Predicate::new("nickname", Comparator::Eq, b"x".to_vec())],
        }];
        let plan = plan_query(&[], &conjuncts, &Ordering::default());
        assert!(matches!(plan, Plan::FullScan { .. }));
    }

    #[test]
    fn union_split_over_or_filter() {
        let index = idx("by_status", &[("status", Direction::Ascending)]);
        let filter = Filter::or([
            Filter::Cmp(Predicate::new("status", Comparator::Eq, vec![1])),
            Filter::Cmp(Predicate::new("status", Comparator::Eq, vec![2])),
        ]);
        let dnf = crate::filter::normalize_to_dnf(&filter);
        let plan = plan_query(&[index], &dnf, &Ordering::default());
        assert!(matches!(plan, Plan::Union { .. }));
    }

    #[test]
    fn clustered_index_wins_over_non_clustered_on_equal_filtering_score() {
        let non_clustered = idx("by_status_a", &[("status", Direction::Ascending)]);
        let clustered = IndexInfo {
            clustered: true,
            ..idx("by_status_b", &[("status", Direction::Ascending)])
        };
        let conjunct = Conjunct {
            predicates: vec![Predicate::new("status", Comparator::Eq, vec![1])],
        };
        let (chosen, _, _) = best_index_for(&[non_clustered, clustered], &conjunct, &Ordering::default()).unwrap();
        assert_eq!(chosen.name, "by_status_b");
    }
}
