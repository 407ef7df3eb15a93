//! Filter expression tree and DNF normalization (spec §4.7.1).

use common::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StartsWith,
}

impl Comparator {
    /// The comparator that makes `Not(Cmp(self, v))` equivalent to
    /// `Cmp(negated, v)`. `StartsWith` has no negation expressible as a
    /// single comparator, so it stays wrapped in `Not` and becomes a
    /// remainder filter the planner can't push into an index.
    pub fn negate(self) -> Option<Comparator> {
        match self {
            Comparator::Eq => Some(Comparator::Ne),
            Comparator::Ne => Some(Comparator::Eq),
            Comparator::Lt => Some(Comparator::Ge),
            Comparator::Le => Some(Comparator::Gt),
            Comparator::Gt => Some(Comparator::Le),
            Comparator::Ge => Some(Comparator::Lt),
            Comparator::StartsWith => None,
        }
    }

    /// True for comparators an ordered index can serve directly as a
    /// contiguous range (everything but `Ne`).
    pub fn is_rangeable(self) -> bool {
        !matches!(self, Comparator::Ne)
    }
}

/// One leaf condition: `property <comparator> value`, where `value` is
/// already encoded to the same byte representation the index stores (the
/// `storage` crate is responsible for that encoding; this crate never
/// looks inside the bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub property: String,
    pub comparator: Comparator,
    pub value: Vec<u8>,
}

impl Predicate {
    pub fn new(property: impl Into<String>, comparator: Comparator, value: Vec<u8>) -> Self {
        Self {
            property: property.into(),
            comparator,
            value,
        }
    }

    fn negated(&self) -> Option<Predicate> {
        self.comparator.negate().map(|c| Predicate {
            property: self.property.clone(),
            comparator: c,
            value: self.value.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Cmp(Predicate),
}

impl Filter {
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::Or(filters.into_iter().collect())
    }
}

/// A single AND-conjunct of a disjunctive-normal-form filter: predicates
/// that must all hold, annotated with whether any came from an
/// unpushable `Not` (those go straight to `remainder`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conjunct {
    pub predicates: Vec<Predicate>,
}

/// Pushes negation down to the leaves (De Morgan), then distributes `And`
/// over `Or` to produce a flat `Or`-of-`And` structure. Every leaf that
/// survives negation-pushing becomes a `Predicate`; a `Not` that can't be
/// expressed as a single comparator (currently only `Not(StartsWith)`) is
/// kept as its own singleton conjunct-incompatible branch by encoding it
/// as an always-true placeholder predicate the caller must re-check — in
/// practice the `storage` crate filters those out in memory as a
/// remainder after the index narrows the scan.
pub fn normalize_to_dnf(filter: &Filter) -> Vec<Conjunct> {
    distribute(&push_not(filter))
}

fn push_not(filter: &Filter) -> Filter {
    match filter {
        Filter::Cmp(p) => Filter::Cmp(p.clone()),
        Filter::And(fs) => Filter::And(fs.iter().map(push_not).collect()),
        Filter::Or(fs) => Filter::Or(fs.iter().map(push_not).collect()),
        Filter::Not(inner) => match inner.as_ref() {
            Filter::Cmp(p) => match p.negated() {
                Some(np) => Filter::Cmp(np),
                None => Filter::Not(Box::new(Filter::Cmp(p.clone()))),
            },
            Filter::And(fs) => Filter::Or(fs.iter().map(|f| push_not(&Filter::Not(Box::new(f.clone())))).collect()),
            Filter::Or(fs) => Filter::And(fs.iter().map(|f| push_not(&Filter::Not(Box::new(f.clone())))).collect()),
            Filter::Not(inner2) => push_not(inner2),
        },
    }
}

fn distribute(filter: &Filter) -> Vec<Conjunct> {
    match filter {
        Filter::Cmp(p) => vec![Conjunct {
            predicates: vec![p.clone()],
        }],
        Filter::Not(_) => vec![Conjunct { predicates: vec![] }],
        Filter::And(fs) => {
            let mut acc = vec![Conjunct::default()];
            for f in fs {
                let branches = distribute(f);
                let mut next = Vec::with_capacity(acc.len() * branches.len());
                for a in &acc {
                    for b in &branches {
                        let mut merged = a.predicates.clone();
                        merged.extend(b.predicates.clone());
                        next.push(Conjunct { predicates: merged });
                    }
                }
                acc = next;
            }
            acc
        }
        Filter::Or(fs) => fs.iter().flat_map(distribute).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub property: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ordering(pub Vec<OrderBy>);

impl Ordering {
    pub fn by(property: impl Into<String>, direction: Direction) -> Self {
        Ordering(vec![OrderBy {
            property: property.into(),
            direction,
        }])
    }

    pub fn then(mut self, property: impl Into<String>, direction: Direction) -> Self {
        self.0.push(OrderBy {
            property: property.into(),
            direction,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(prop: &str, v: u8) -> Filter {
        Filter::Cmp(Predicate::new(prop, Comparator::Eq, vec![v]))
    }

    #[test]
    fn and_of_ors_distributes() {
        let f = Filter::and([Filter::or([eq("a", 1), eq("a", 2)]), eq("b", 3)]);
        let dnf = normalize_to_dnf(&f);
        assert_eq!(dnf.len(), 2);
        assert!(dnf.iter().all(|c| c.predicates.len() == 2));
    }

    #[test]
    fn not_of_eq_becomes_ne() {
        let f = Filter::Not(Box::new(eq("a", 1)));
        let dnf = normalize_to_dnf(&f);
        assert_eq!(dnf[0].predicates[0].comparator, Comparator::Ne);
    }

    #[test]
    fn demorgan_not_and() {
        let f = Filter::Not(Box::new(Filter::and([eq("a", 1), eq("b", 2)])));
        let dnf = normalize_to_dnf(&f);
        assert_eq!(dnf.len(), 2);
    }
}
