//! Error types for the MVCC engine
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Conflicts are recorded as transaction status and only surface here when the
//! caller reaches the next statement or prepare. Broken invariants (an index
//! refusing to undo a change it has just made, for example) are not errors:
//! they panic.

use crate::space::SpaceId;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the MVCC engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A visible tuple with the same unique key already exists
    #[error("Duplicate key exists in unique index '{index}' in space '{space}'")]
    DuplicateKey {
        /// Name of the violated index
        index: String,
        /// Name of the space
        space: String,
    },

    /// A replace-only statement found nothing to replace
    #[error("Tuple doesn't exist in index '{index}' in space '{space}'")]
    TupleNotFound {
        /// Name of the index
        index: String,
        /// Name of the space
        space: String,
    },

    /// Transaction has been aborted by conflict
    #[error("Transaction has been aborted by conflict")]
    TransactionConflict,

    /// Statement nesting is too deep
    #[error("Statement nesting limit of {max} exceeded")]
    TooManyNestedStatements {
        /// Configured nesting limit
        max: usize,
    },

    /// Deferred foreign key constraints are still violated at prepare
    #[error("Foreign key constraint failed: {count} deferred violation(s)")]
    ForeignKeyDeferred {
        /// Number of outstanding violations
        count: i64,
    },

    /// A non-yieldable transaction was interrupted by a yield
    #[error("Transaction has been aborted by a fiber yield")]
    TransactionYield,

    /// Allocation quota exhausted
    #[error("Failed to allocate {size} bytes in {allocator} for {object}")]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
        /// Allocator that refused
        allocator: &'static str,
        /// Object being allocated
        object: &'static str,
    },

    /// The journal failed to persist a transaction
    #[error("Failed to write to disk: {0}")]
    WalIo(String),

    /// A synchronous transaction was rolled back by the commit queue
    #[error("A rollback for a synchronous transaction is received")]
    SyncRollback,

    /// Savepoint is unknown or no longer valid
    #[error("Can not rollback to savepoint: the savepoint does not exist")]
    NoSuchSavepoint,

    /// Space is not registered
    #[error("Space {0} does not exist")]
    NoSuchSpace(SpaceId),

    /// Transaction handle refers to a finished transaction
    #[error("No active transaction")]
    NoSuchTransaction,

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),
}

/// Coarse classification of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller may retry the transaction
    Conflict,
    /// An allocation quota was hit; the call was unwound
    ResourceExhausted,
    /// Journal or replication failure
    Io,
    /// API misuse (bad handle, bad savepoint, unknown space)
    Usage,
    /// Stored data failed validation
    Corruption,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateKey { .. }
            | Error::TupleNotFound { .. }
            | Error::TransactionConflict
            | Error::ForeignKeyDeferred { .. }
            | Error::TransactionYield => ErrorKind::Conflict,
            Error::OutOfMemory { .. } => ErrorKind::ResourceExhausted,
            Error::WalIo(_) | Error::SyncRollback => ErrorKind::Io,
            Error::TooManyNestedStatements { .. }
            | Error::NoSuchSavepoint
            | Error::NoSuchSpace(_)
            | Error::NoSuchTransaction
            | Error::InvalidOperation(_) => ErrorKind::Usage,
            Error::Serialization(_) | Error::Corruption(_) => ErrorKind::Corruption,
        }
    }

    /// Whether retrying the whole transaction may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::ResourceExhausted
        )
    }

    /// Whether this is a transaction conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::TransactionConflict)
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
