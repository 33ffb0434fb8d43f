//! Storage layer for the MVCC engine
//!
//! This crate implements reference indexes behind the `strata_core::Index`
//! trait:
//! - TreeIndex: BTreeMap-based ordered unique index
//! - HashIndex: FxHashMap-based unordered unique index
//! - testing::FaultyIndex: wrapper that fails forward replaces on demand
//!
//! The indexes know nothing about versions. They hold whichever tuple was
//! last put under a key, dirty or not; the concurrency layer decides what a
//! given transaction actually sees.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod index;
pub mod testing;

pub use index::{HashIndex, TreeIndex};
