//! Bounded, optionally-reversed iteration over an ordered table (spec §4.3,
//! component C5).
//!
//! The underlying engine (`kv-engine`, C1) exposes exactly one directional
//! seek primitive: "position at the first key >= K"
//! (`Cursor::search_key_range`). Everything a descending or upper-bounded
//! scan needs — "last key <= K", "last key < K" — is built on top of that
//! single primitive plus `Seek::Prev`/`Seek::Last`, the way the teacher's
//! lower crates build richer operations from a handful of raw FFI calls.

use kv_engine::{Cursor as RawCursor, Seek};

use common::Direction;

/// A scan boundary on one side of a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    Unbounded,
    Inclusive(Vec<u8>),
    Exclusive(Vec<u8>),
}

impl Bound {
    fn key(&self) -> Option<&[u8]> {
        match self {
            Bound::Unbounded => None,
            Bound::Inclusive(k) | Bound::Exclusive(k) => Some(k),
        }
    }
}

/// Which parts of each entry the caller actually needs. Skipping value
/// bytes on a key-only scan avoids an allocation per row (spec §4.3
/// "partial key/value loading").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    pub load_key: bool,
    pub load_value: bool,
}

impl Projection {
    pub const KEY_AND_VALUE: Projection = Projection {
        load_key: true,
        load_value: true,
    };
    pub const KEY_ONLY: Projection = Projection {
        load_key: true,
        load_value: false,
    };
}

impl Default for Projection {
    fn default() -> Self {
        Projection::KEY_AND_VALUE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// How many leading bytes of a key the lexicographic increment-with-carry
/// trick is allowed to touch before giving up and falling back to
/// `Seek::Last`. Bounds the correction loop in `seek_last_at_most` against
/// pathological all-`0xFF` keys.
const DEFAULT_MAX_PREFIX: usize = 4096;

/// Returns the lexicographically smallest byte string strictly greater
/// than every string with `bytes` as a prefix, i.e. `bytes`'s successor in
/// the increment-with-carry sense. Returns `None` when `bytes` is all
/// `0xFF` within `max_prefix` bytes (no finite successor — the caller
/// should fall back to `Seek::Last`).
fn lex_increment_with_carry(bytes: &[u8], max_prefix: usize) -> Option<Vec<u8>> {
    let limit = bytes.len().min(max_prefix);
    let mut out = bytes[..limit].to_vec();
    for i in (0..out.len()).rev() {
        if out[i] != 0xFF {
            out[i] += 1;
            out.truncate(i + 1);
            return Some(out);
        }
    }
    None
}

pub struct RangeCursor<'t> {
    raw: RawCursor,
    lower: Bound,
    upper: Bound,
    direction: Direction,
    projection: Projection,
    max_prefix: usize,
    started: bool,
    closed: bool,
    _marker: std::marker::PhantomData<&'t ()>,
}

impl<'t> RangeCursor<'t> {
    pub fn new(raw: RawCursor, lower: Bound, upper: Bound, direction: Direction) -> Self {
        Self {
            raw,
            lower,
            upper,
            direction,
            projection: Projection::default(),
            max_prefix: DEFAULT_MAX_PREFIX,
            started: false,
            closed: false,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_max_prefix(mut self, max_prefix: usize) -> Self {
        self.max_prefix = max_prefix;
        self
    }

    /// Idempotent: calling `close` more than once, or after the cursor has
    /// already been exhausted, is a no-op. Frame teardown (C4) relies on
    /// this to sweep every registered cursor unconditionally.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Advances to the next entry in scan order and returns it, or `None`
    /// once the range is exhausted or the cursor was closed.
    pub fn advance(&mut self) -> kv_engine::KvResult<Option<Entry>> {
        if self.closed {
            return Ok(None);
        }

        let raw_entry = if !self.started {
            self.started = true;
            self.seek_start()?
        } else {
            match self.direction {
                Direction::Descending => self.raw.seek(Seek::Prev)?,
                _ => self.raw.seek(Seek::Next)?,
            }
        };

        let Some((key, value)) = raw_entry else {
            return Ok(None);
        };

        if !self.within_bounds(&key) {
            self.closed = true;
            return Ok(None);
        }

        Ok(Some(Entry {
            key: if self.projection.load_key { key } else { Vec::new() },
            value: if self.projection.load_value { value } else { Vec::new() },
        }))
    }

    fn seek_start(&mut self) -> kv_engine::KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        match self.direction {
            Direction::Descending => match &self.upper {
                Bound::Unbounded => self.raw.seek(Seek::Last),
                Bound::Inclusive(k) => self.seek_last_at_most(k, true),
                Bound::Exclusive(k) => self.seek_last_at_most(k, false),
            },
            _ => match &self.lower {
                Bound::Unbounded => self.raw.seek(Seek::First),
                Bound::Inclusive(k) => self.raw.search_key_range(k),
                Bound::Exclusive(k) => {
                    // First key > k: seek >= k, then step forward once more
                    // if the landing key equals k exactly.
                    match self.raw.search_key_range(k)? {
                        Some((found, value)) if found == *k => self.raw.seek(Seek::Next),
                        other => Ok(other),
                    }
                }
            },
        }
    }

    /// Emulates "last key <= bound" (or "< bound" when `!inclusive`) on an
    /// engine whose only native directional seek is "first key >= K":
    /// seek to the successor of `bound`, then step back one entry. When no
    /// key reaches that successor, the whole table sits at or below
    /// `bound`, so `Seek::Last` is already the answer.
    fn seek_last_at_most(
        &mut self,
        bound: &[u8],
        inclusive: bool,
    ) -> kv_engine::KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        let probe = if inclusive {
            lex_increment_with_carry(bound, self.max_prefix)
        } else {
            Some(bound.to_vec())
        };

        let Some(probe) = probe else {
            return self.raw.seek(Seek::Last);
        };

        match self.raw.search_key_range(&probe)? {
            Some((found, _)) if !inclusive && found == bound => {
                // Landed exactly on the exclusive bound; step back once
                // more to skip it.
                self.raw.seek(Seek::Prev)
            }
            Some(_) => self.raw.seek(Seek::Prev),
            None => self.raw.seek(Seek::Last),
        }
    }

    fn within_bounds(&self, key: &[u8]) -> bool {
        let above_lower = match &self.lower {
            Bound::Unbounded => true,
            Bound::Inclusive(k) => key >= k.as_slice(),
            Bound::Exclusive(k) => key > k.as_slice(),
        };
        let below_upper = match &self.upper {
            Bound::Unbounded => true,
            Bound::Inclusive(k) => key <= k.as_slice(),
            Bound::Exclusive(k) => key < k.as_slice(),
        };
        above_lower && below_upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_with_carry_basic() {
        assert_eq!(lex_increment_with_carry(b"ab", 16), Some(b"ac".to_vec()));
        assert_eq!(lex_increment_with_carry(b"a\xff", 16), Some(b"b".to_vec()));
        assert_eq!(lex_increment_with_carry(b"\xff\xff", 16), None);
    }

    #[test]
    fn within_bounds_respects_exclusivity() {
        let rc_incl = |lo: Bound, hi: Bound| -> bool {
            let lower_ok = match &lo {
                Bound::Unbounded => true,
                Bound::Inclusive(k) => b"m".as_slice() >= k.as_slice(),
                Bound::Exclusive(k) => b"m".as_slice() > k.as_slice(),
            };
            let upper_ok = match &hi {
                Bound::Unbounded => true,
                Bound::Inclusive(k) => b"m".as_slice() <= k.as_slice(),
                Bound::Exclusive(k) => b"m".as_slice() < k.as_slice(),
            };
            lower_ok && upper_ok
        };
        assert!(rc_incl(Bound::Inclusive(b"m".to_vec()), Bound::Unbounded));
        assert!(!rc_incl(Bound::Exclusive(b"m".to_vec()), Bound::Unbounded));
    }
}
