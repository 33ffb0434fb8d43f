//! Spaces: named collections of tuples with one or more indexes
//!
//! Index 0 is the primary index. Every tuple of a space is present in every
//! index of that space (unique indexes only).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::index::{DupViolation, Index, IndexError};
use crate::key::Key;
use crate::tuple::Tuple;

/// Maximum number of indexes in one space
pub const BOX_INDEX_MAX: usize = 128;

/// Space identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpaceId(pub u32);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static properties of a space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceDef {
    /// Identifier
    pub id: SpaceId,
    /// Name for diagnostics
    pub name: String,
    /// Changes are never journaled
    pub is_temporary: bool,
    /// Changes wait for replication quorum before commit
    pub is_sync: bool,
}

impl SpaceDef {
    /// Plain persistent, asynchronous space
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        SpaceDef {
            id: SpaceId(id),
            name: name.into(),
            is_temporary: false,
            is_sync: false,
        }
    }

    /// Mark as temporary (builder pattern)
    pub fn temporary(mut self) -> Self {
        self.is_temporary = true;
        self
    }

    /// Mark as synchronous (builder pattern)
    pub fn sync(mut self) -> Self {
        self.is_sync = true;
        self
    }
}

/// A space and its indexes
pub struct Space {
    def: SpaceDef,
    indexes: Vec<Box<dyn Index>>,
}

impl Space {
    /// Create a space; at least one index is required
    pub fn new(def: SpaceDef, indexes: Vec<Box<dyn Index>>) -> Result<Self> {
        if indexes.is_empty() {
            return Err(Error::InvalidOperation(format!(
                "space '{}' has no primary index",
                def.name
            )));
        }
        if indexes.len() >= BOX_INDEX_MAX {
            return Err(Error::InvalidOperation(format!(
                "space '{}' has {} indexes, limit is {}",
                def.name,
                indexes.len(),
                BOX_INDEX_MAX - 1
            )));
        }
        Ok(Space { def, indexes })
    }

    /// Space definition
    pub fn def(&self) -> &SpaceDef {
        &self.def
    }

    /// Identifier
    pub fn id(&self) -> SpaceId {
        self.def.id
    }

    /// Name
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Number of indexes
    #[inline]
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// Index by position
    pub fn index(&self, no: usize) -> &dyn Index {
        self.indexes[no].as_ref()
    }

    /// Look up the raw (possibly dirty) occupant of a key
    pub fn get(&self, index: usize, key: &Key) -> Option<Tuple> {
        self.indexes[index].get(key)
    }

    /// Replace in one index, attaching names to failures
    pub fn replace(
        &mut self,
        index: usize,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: crate::index::DupMode,
    ) -> Result<Option<Tuple>> {
        let idx = &mut self.indexes[index];
        idx.replace(old, new, mode).map_err(|e| match e {
            IndexError::Dup(DupViolation::TupleFound) => Error::DuplicateKey {
                index: idx.name().to_string(),
                space: self.def.name.clone(),
            },
            IndexError::Dup(DupViolation::TupleNotFound) => Error::TupleNotFound {
                index: idx.name().to_string(),
                space: self.def.name.clone(),
            },
            IndexError::OutOfMemory(size) => Error::OutOfMemory {
                size,
                allocator: "index",
                object: "index entry",
            },
        })
    }

    /// Build the duplicate-check error for index `index`
    pub fn dup_error(&self, index: usize, violation: DupViolation) -> Error {
        let name = self.indexes[index].name().to_string();
        match violation {
            DupViolation::TupleFound => Error::DuplicateKey {
                index: name,
                space: self.def.name.clone(),
            },
            DupViolation::TupleNotFound => Error::TupleNotFound {
                index: name,
                space: self.def.name.clone(),
            },
        }
    }
}

impl fmt::Debug for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Space")
            .field("def", &self.def)
            .field("index_count", &self.indexes.len())
            .finish()
    }
}
