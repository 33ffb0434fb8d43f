//! Core types and traits for the Strata MVCC engine
//!
//! This crate defines the foundational types shared by every layer:
//! - Tuple: immutable, reference-counted record with a stable identity
//! - Field: a single typed column value inside a tuple
//! - KeyDef / Key: key extraction for indexes
//! - Index: abstract index mutation used by the version-chain engine
//! - Space: a set of indexes over the same tuples
//! - Error: error type hierarchy and its classification

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod index;
pub mod key;
pub mod space;
pub mod tuple;

pub use error::{Error, ErrorKind, Result};
pub use index::{replace_check_dup, DupMode, DupViolation, Index, IndexError};
pub use key::{Key, KeyDef};
pub use space::{Space, SpaceDef, SpaceId, BOX_INDEX_MAX};
pub use tuple::{Field, Tuple, TupleId};
