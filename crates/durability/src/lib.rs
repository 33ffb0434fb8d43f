//! Durability collaborators for the MVCC engine
//!
//! The transaction manager never persists anything itself. It hands a
//! prepared transaction's redo rows to a [`Journal`] and, for transactions
//! touching synchronous spaces, parks them in the [`CommitQueue`] until a
//! replication quorum confirms or rolls them back.
//!
//! - journal: redo rows, journal entries, checksummed in-memory journal
//! - limbo: the synchronous-replication commit queue

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod journal;
pub mod limbo;

pub use journal::{Journal, JournalEntry, MemoryJournal, RedoRow, RequestType};
pub use limbo::{CommitQueue, LimboState, LimboToken};
