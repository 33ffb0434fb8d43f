//! Strata MVCC - in-memory transaction and version manager
//!
//! Keeps every uncommitted or still-observable version of a tuple in
//! per-index version chains so that concurrent transactions see consistent
//! data without copying it.
//!
//! # Quick Start
//!
//! ```
//! use strata_mvcc::{tuple, DupMode, Key, KeyDef, Request, RequestType, Space, SpaceDef};
//! use strata_mvcc::{TreeIndex, TxManager, TxManagerConfig};
//!
//! let mut mgr = TxManager::new(TxManagerConfig::default())?;
//! let space = mgr.create_space(Space::new(
//!     SpaceDef::new(512, "users"),
//!     vec![TreeIndex::boxed("pk", KeyDef::field(0))],
//! )?)?;
//!
//! let txn = mgr.begin();
//! let stmt = mgr.begin_statement(txn, Some(space))?;
//! mgr.apply(stmt, None, Some(&tuple![1u64, "alice"]), DupMode::Insert)?;
//! mgr.commit_statement(stmt, Request::local(RequestType::Insert))?;
//! mgr.commit(txn)?;
//!
//! assert!(mgr.get(None, space, 0, &Key::from(1u64))?.is_some());
//! # Ok::<(), strata_mvcc::Error>(())
//! ```
//!
//! # Architecture
//!
//! - [`strata_core`]: tuples, keys, the index trait, spaces and errors
//! - [`strata_storage`]: reference tree and hash indexes
//! - [`strata_concurrency`]: the transaction manager itself
//! - [`strata_durability`]: journal and synchronous commit queue

pub use strata_concurrency;
pub use strata_core;
pub use strata_durability;
pub use strata_storage;

pub use strata_concurrency::{
    CommitOutcome, Request, SavepointId, SharedTxManager, SnapshotCleaner, TxManager,
    TxManagerConfig, TxManagerStats, TxnId, TxnStatus,
};
pub use strata_core::{
    tuple, DupMode, Error, ErrorKind, Field, Key, KeyDef, Result, Space, SpaceDef, SpaceId, Tuple,
};
pub use strata_durability::{
    CommitQueue, Journal, JournalEntry, LimboState, MemoryJournal, RedoRow, RequestType,
};
pub use strata_storage::{HashIndex, TreeIndex};
