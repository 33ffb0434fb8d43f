//! Abstract index interface
//!
//! The version-chain engine never looks inside an index. It only swaps the
//! tuple stored under a key via [`Index::replace`] and trusts the index to do
//! that in O(log n) or O(1) without failing for any reason other than a
//! duplicate key or an allocation failure.

use thiserror::Error;

use crate::key::{Key, KeyDef};
use crate::tuple::Tuple;

/// How a replace treats an existing tuple with the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DupMode {
    /// Fail if a different tuple already occupies the key
    Insert,
    /// Fail if nothing occupies the key
    Replace,
    /// Never fail on duplicates
    ReplaceOrInsert,
}

/// Outcome of a failed duplicate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupViolation {
    /// A different tuple occupies the key
    TupleFound,
    /// Nothing occupies the key but the mode requires it
    TupleNotFound,
}

/// Failure reported by an index implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// Duplicate check failed
    #[error("duplicate check failed: {0:?}")]
    Dup(DupViolation),
    /// The index could not allocate
    #[error("index out of memory ({0} bytes)")]
    OutOfMemory(usize),
}

/// Check whether replacing `old` given the current occupant `dup` is allowed
///
/// Returns `None` when the replace may proceed.
pub fn replace_check_dup(
    old: Option<&Tuple>,
    dup: Option<&Tuple>,
    mode: DupMode,
) -> Option<DupViolation> {
    match dup {
        None => {
            if mode == DupMode::Replace {
                return Some(DupViolation::TupleNotFound);
            }
        }
        Some(dup) => {
            let same = matches!(old, Some(old) if old == dup);
            if !same && (old.is_some() || mode == DupMode::Insert) {
                return Some(DupViolation::TupleFound);
            }
        }
    }
    None
}

/// Mutable ordered or hashed index over tuples of one space
pub trait Index: Send {
    /// Index name, used in error messages
    fn name(&self) -> &str;

    /// Key definition
    fn key_def(&self) -> &KeyDef;

    /// Replace the occupant of a key
    ///
    /// With `new` set, the key of `new` is looked up, the duplicate check
    /// against `old` runs in `mode`, and `new` takes the slot. With `new`
    /// unset, the slot for the key of `old` is cleared. Returns the tuple
    /// that previously occupied the slot.
    fn replace(
        &mut self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: DupMode,
    ) -> std::result::Result<Option<Tuple>, IndexError>;

    /// Current occupant of a key
    fn get(&self, key: &Key) -> Option<Tuple>;

    /// Number of entries
    fn len(&self) -> usize;

    /// Whether the index holds no entries
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All current entries, in index order where the index has one
    fn tuples(&self) -> Vec<Tuple>;
}
