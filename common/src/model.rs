//! Small shared vocabulary types used across every crate (directions,
//! isolation levels, evolution strategy) — the data-model primitives of
//! spec §3 that don't belong to any single component.

use serde::{Deserialize, Serialize};

/// Sort direction for a property within an index or an ordering request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
    /// Caller doesn't care; the planner may pin it to whatever an index
    /// offers (spec §4.7.3 ordering score).
    Unspecified,
}

impl Direction {
    pub fn is_concrete(self) -> bool {
        !matches!(self, Direction::Unspecified)
    }

    /// The opposite concrete direction. `Unspecified` reverses to itself.
    pub fn reversed(self) -> Direction {
        match self {
            Direction::Ascending => Direction::Descending,
            Direction::Descending => Direction::Ascending,
            Direction::Unspecified => Direction::Unspecified,
        }
    }
}

/// Transaction isolation level, ordered weakest-to-strongest so
/// `select_isolation` (spec §4.2) can compare a requested level against a
/// parent frame's level with `<=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    None,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// How a record type's stored layout evolves across versions (spec §3
/// metadata record, `evolutionStrategy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvolutionStrategy {
    /// The layout never changes; any mismatch is a hard schema error.
    None,
    /// The codec may add/remove optional fields across generations.
    Standard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_reversal() {
        assert_eq!(Direction::Ascending.reversed(), Direction::Descending);
        assert_eq!(Direction::Descending.reversed(), Direction::Ascending);
        assert_eq!(Direction::Unspecified.reversed(), Direction::Unspecified);
    }

    #[test]
    fn isolation_ordering() {
        assert!(IsolationLevel::ReadUncommitted < IsolationLevel::Serializable);
        assert!(IsolationLevel::None < IsolationLevel::ReadCommitted);
    }
}
