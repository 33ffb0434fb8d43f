//! Key extraction for indexes

use smallvec::SmallVec;
use std::fmt;

use crate::tuple::{Field, Tuple};

/// Extracted index key: the tuple's key parts in definition order
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(SmallVec<[Field; 2]>);

impl Key {
    /// Build a key from explicit parts
    pub fn new(parts: impl IntoIterator<Item = Field>) -> Self {
        Key(parts.into_iter().collect())
    }

    /// Key parts
    pub fn parts(&self) -> &[Field] {
        &self.0
    }
}

impl From<u64> for Key {
    fn from(v: u64) -> Self {
        Key::new([Field::Unsigned(v)])
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::new([Field::from(v)])
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// Which tuple fields make up an index key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDef {
    parts: Vec<usize>,
}

impl KeyDef {
    /// Key over the given field numbers
    pub fn new(parts: Vec<usize>) -> Self {
        assert!(!parts.is_empty(), "key definition needs at least one part");
        KeyDef { parts }
    }

    /// Single-part key
    pub fn field(no: usize) -> Self {
        KeyDef { parts: vec![no] }
    }

    /// Field numbers in key order
    pub fn parts(&self) -> &[usize] {
        &self.parts
    }

    /// Extract the key of a tuple; missing fields become `Null`
    pub fn extract(&self, tuple: &Tuple) -> Key {
        Key(self
            .parts
            .iter()
            .map(|&no| tuple.field(no).cloned().unwrap_or(Field::Null))
            .collect())
    }
}
