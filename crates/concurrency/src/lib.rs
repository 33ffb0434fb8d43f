//! MVCC transaction and version manager
//!
//! This crate keeps every uncommitted or still-observable version of a
//! tuple in per-index version chains ("stories") instead of copying data:
//! - TxManager: the single context owning spaces, stories and transactions
//! - Story table and version chains: one story per dirty tuple
//! - Statement ledger: per-transaction list of applied changes
//! - Conflict tracker and read tracker: who must be demoted when a
//!   transaction prepares
//! - Prepare/commit/rollback driver and the journal-driven commit
//! - Garbage collector: incremental reclamation of unobservable stories
//! - Snapshot cleaner: committed-only view for checkpoints
//!
//! The manager is single-writer; [`SharedTxManager`] wraps it for use from
//! several threads.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod commit;
pub mod config;
pub mod conflict;
pub mod driver;
pub mod gc;
pub mod history;
pub mod manager;
pub mod read_set;
pub mod savepoint;
pub mod shared;
pub mod snapshot;
pub mod statement;
pub mod story;
pub mod transaction;
pub mod visibility;

pub use arena::{Arena, Id};
pub use commit::{CommitOutcome, CommitStep, JournalWrite};
pub use config::{TxManagerConfig, TxManagerConfigError};
pub use conflict::{ConflictEdge, EdgeId};
pub use manager::{TxManager, TxManagerStats};
pub use read_set::{ReadTracker, TrackerId};
pub use savepoint::SavepointId;
pub use shared::SharedTxManager;
pub use snapshot::SnapshotCleaner;
pub use statement::{Request, Statement, StmtId};
pub use story::{Older, Story, StoryId, StoryLink, StoryTable};
pub use transaction::{Psn, Transaction, TxnId, TxnStatus};
