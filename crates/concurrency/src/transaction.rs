//! Transaction state
//!
//! A [`Transaction`] is created by [`TxManager::begin`] and lives in the
//! manager's arena until it commits or rolls back, after which its handle
//! goes stale.
//!
//! ## State machine
//!
//! ```text
//! InProgress ──prepare──> Prepared ──commit──> Committed
//!     │
//!     ├── a breaker prepares, we wrote ──> Conflicted
//!     ├── a breaker prepares, we only read ──> InReadView
//!     └── rollback (from any state) ──> Aborted
//! ```
//!
//! [`TxManager::begin`]: crate::TxManager::begin

use std::collections::VecDeque;
use std::time::Instant;

use crate::arena::Id;
use crate::conflict::EdgeId;
use crate::read_set::{Gap, TrackerId};
use crate::savepoint::Savepoint;
use crate::statement::StmtId;

/// Prepare sequence number
pub type Psn = i64;

/// Handle to a transaction
pub type TxnId = Id<Transaction>;

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnStatus {
    /// Running; may read and write
    InProgress,
    /// Assigned a psn; its changes are fixed in history
    Prepared,
    /// Finished successfully
    Committed,
    /// Rolled back
    Aborted,
    /// Read-only and pinned to the state before `rv_psn`
    InReadView,
    /// A concurrent commit invalidated it; it can only roll back
    Conflicted,
}

impl TxnStatus {
    /// Human-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::InProgress => "in progress",
            TxnStatus::Prepared => "prepared",
            TxnStatus::Committed => "committed",
            TxnStatus::Aborted => "aborted",
            TxnStatus::InReadView => "in read view",
            TxnStatus::Conflicted => "conflicted",
        }
    }
}

/// One transaction's bookkeeping
#[derive(Debug)]
pub struct Transaction {
    pub(crate) id: u64,
    pub(crate) psn: Psn,
    pub(crate) rv_psn: Psn,
    pub(crate) status: TxnStatus,
    pub(crate) stmts: Vec<StmtId>,
    /// Ledger length at each open `begin_statement`
    pub(crate) sub_stmt_begin: Vec<usize>,
    /// Edges where we are the breaker
    pub(crate) conflict_list: VecDeque<EdgeId>,
    /// Edges where we are the victim
    pub(crate) conflicted_by: VecDeque<EdgeId>,
    pub(crate) read_set: VecDeque<TrackerId>,
    /// Keys looked up and found absent
    pub(crate) gap_set: Vec<Gap>,
    /// Trackers and edges charged to this transaction
    pub(crate) region_objects: usize,
    pub(crate) n_new_rows: usize,
    pub(crate) n_local_rows: usize,
    pub(crate) n_applier_rows: usize,
    pub(crate) can_yield: bool,
    pub(crate) aborted_by_yield: bool,
    pub(crate) fk_deferred_count: i64,
    pub(crate) savepoints: Vec<Savepoint>,
    pub(crate) next_savepoint: u64,
    pub(crate) signature: Option<i64>,
    pub(crate) begin_tm: Instant,
    pub(crate) prepare_tm: Option<Instant>,
}

impl Transaction {
    pub(crate) fn new(id: u64) -> Self {
        Transaction {
            id,
            psn: 0,
            rv_psn: 0,
            status: TxnStatus::InProgress,
            stmts: Vec::new(),
            sub_stmt_begin: Vec::new(),
            conflict_list: VecDeque::new(),
            conflicted_by: VecDeque::new(),
            read_set: VecDeque::new(),
            gap_set: Vec::new(),
            region_objects: 0,
            n_new_rows: 0,
            n_local_rows: 0,
            n_applier_rows: 0,
            can_yield: true,
            aborted_by_yield: false,
            fk_deferred_count: 0,
            savepoints: Vec::new(),
            next_savepoint: 1,
            signature: None,
            begin_tm: Instant::now(),
            prepare_tm: None,
        }
    }

    /// Monotonic transaction id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Prepare sequence number, 0 until prepared
    pub fn psn(&self) -> Psn {
        self.psn
    }

    /// Read-view barrier, 0 unless in a read view
    pub fn rv_psn(&self) -> Psn {
        self.rv_psn
    }

    /// Current status
    pub fn status(&self) -> TxnStatus {
        self.status
    }

    /// Number of statements in the ledger
    pub fn statement_count(&self) -> usize {
        self.stmts.len()
    }

    /// Current statement nesting depth
    pub fn statement_depth(&self) -> usize {
        self.sub_stmt_begin.len()
    }

    /// Number of tracked reads
    pub fn read_count(&self) -> usize {
        self.read_set.len()
    }

    /// Number of tracked absent keys
    pub fn gap_count(&self) -> usize {
        self.gap_set.len()
    }

    /// Redo rows originating here
    pub fn new_rows(&self) -> usize {
        self.n_new_rows
    }

    /// Redo rows received from other replicas
    pub fn applier_rows(&self) -> usize {
        self.n_applier_rows
    }

    /// Journal signature once written
    pub fn signature(&self) -> Option<i64> {
        self.signature
    }

    /// Whether the transaction may span a yield
    pub fn can_yield(&self) -> bool {
        self.can_yield
    }

    /// Deferred foreign key counter
    pub fn fk_deferred_count(&self) -> i64 {
        self.fk_deferred_count
    }

    /// Whether it mixes local and replicated rows that must travel back
    pub fn is_distributed(&self) -> bool {
        self.n_new_rows > 0
            && self.n_applier_rows > 0
            && self.n_new_rows != self.n_local_rows
    }

    /// Whether it can still read or write
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            TxnStatus::InProgress | TxnStatus::InReadView | TxnStatus::Conflicted
        )
    }
}
