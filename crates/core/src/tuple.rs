//! Tuples: immutable records with a stable identity
//!
//! A [`Tuple`] is a shared handle to an immutable list of [`Field`]s. Cloning
//! the handle takes a reference; dropping it releases one. Two handles are
//! equal only when they point at the same allocation, never because their
//! contents match. The version-chain engine relies on that: it tracks *which*
//! tuple sits in an index, and a byte-identical replacement is a different
//! version.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;

static NEXT_TUPLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a tuple allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleId(u64);

impl TupleId {
    /// Raw identifier value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single typed column value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    /// SQL NULL / msgpack nil
    Null,
    /// Boolean
    Bool(bool),
    /// Unsigned integer
    Unsigned(u64),
    /// Signed integer
    Integer(i64),
    /// UTF-8 string
    Str(String),
    /// Opaque bytes
    Bytes(Vec<u8>),
}

impl Field {
    /// Approximate encoded size in bytes
    pub fn encoded_size(&self) -> usize {
        match self {
            Field::Null | Field::Bool(_) => 1,
            Field::Unsigned(_) | Field::Integer(_) => 9,
            Field::Str(s) => 5 + s.len(),
            Field::Bytes(b) => 5 + b.len(),
        }
    }
}

impl From<u64> for Field {
    fn from(v: u64) -> Self {
        Field::Unsigned(v)
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::Integer(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Str(v.to_string())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::Str(v)
    }
}

impl From<bool> for Field {
    fn from(v: bool) -> Self {
        Field::Bool(v)
    }
}

struct TupleData {
    id: TupleId,
    bsize: usize,
    fields: Vec<Field>,
}

/// Reference-counted immutable record
#[derive(Clone)]
pub struct Tuple(Arc<TupleData>);

impl Tuple {
    /// Allocate a new tuple with a fresh identity
    pub fn new(fields: Vec<Field>) -> Self {
        let id = TupleId(NEXT_TUPLE_ID.fetch_add(1, Ordering::Relaxed));
        let bsize = fields.iter().map(Field::encoded_size).sum::<usize>() + 5;
        Tuple(Arc::new(TupleData { id, bsize, fields }))
    }

    /// Identity of the underlying allocation
    #[inline]
    pub fn id(&self) -> TupleId {
        self.0.id
    }

    /// All fields
    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.0.fields
    }

    /// Field by position
    #[inline]
    pub fn field(&self, no: usize) -> Option<&Field> {
        self.0.fields.get(no)
    }

    /// Approximate encoded body size
    #[inline]
    pub fn bsize(&self) -> usize {
        self.0.bsize
    }

    /// Number of live handles to this tuple
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether both handles refer to the same allocation
    #[inline]
    pub fn ptr_eq(a: &Tuple, b: &Tuple) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Encode the fields as msgpack
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(&self.0.fields)?)
    }

    /// Decode msgpack fields into a new tuple
    pub fn decode(bytes: &[u8]) -> Result<Tuple> {
        let fields: Vec<Field> = rmp_serde::from_slice(bytes)?;
        Ok(Tuple::new(fields))
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        Tuple::ptr_eq(self, other)
    }
}

impl Eq for Tuple {}

impl Hash for Tuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tuple{}{:?}", self.0.id, self.0.fields)
    }
}

/// Build a tuple from anything convertible to fields
///
/// ```
/// use strata_core::tuple;
/// let t = tuple![1u64, "one"];
/// assert_eq!(t.fields().len(), 2);
/// ```
#[macro_export]
macro_rules! tuple {
    ($($field:expr),* $(,)?) => {
        $crate::Tuple::new(vec![$($crate::Field::from($field)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_not_content() {
        let a = Tuple::new(vec![Field::Unsigned(1)]);
        let b = Tuple::new(vec![Field::Unsigned(1)]);
        assert_ne!(a, b);
        assert_eq!(a.fields(), b.fields());
        assert_eq!(a, a.clone());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_ref_count_tracks_handles() {
        let a = tuple![7u64];
        assert_eq!(a.ref_count(), 1);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        drop(b);
        assert_eq!(a.ref_count(), 1);
    }

    #[test]
    fn test_encode_decode_fields() {
        let a = tuple![1u64, "x", -5i64, true];
        let bytes = a.encode().unwrap();
        let b = Tuple::decode(&bytes).unwrap();
        assert_eq!(a.fields(), b.fields());
        assert_ne!(a, b);
    }

    #[test]
    fn test_bsize_grows_with_content() {
        let small = tuple![1u64];
        let big = tuple![1u64, "a much longer string value"];
        assert!(big.bsize() > small.bsize());
    }
}
