//! Journal-driven commit
//!
//! ```text
//! prepare ──> no rows? ──yes──> commit, Nop
//!    │
//!    └──> [sync: append to commit queue] ──> journal write
//!              │                                  │
//!              │ failed: abort queue entry,       │ ok
//!              │ rollback, WalIo                  v
//!              │                   async: commit, Committed{signature}
//!              │                   sync:  stay prepared, Pending{token}
//!              v
//! ```
//!
//! The commit is split in [`TxManager::start_commit`] and
//! [`TxManager::finish_commit`] so a caller sharing the manager between
//! threads can release its lock around the journal write.

use strata_core::{Error, Result};
use strata_durability::{
    CommitQueue, Journal, JournalEntry, LimboState, LimboToken, RedoRow, RequestType,
};
use tracing::{debug, warn};

use crate::manager::TxManager;
use crate::transaction::{TxnId, TxnStatus};

/// How a journal-driven commit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Written and committed
    Committed {
        /// Journal signature of the transaction
        signature: i64,
    },
    /// Nothing to write; committed without touching the journal
    Nop,
    /// Written, prepared, waiting for replication quorum
    Pending {
        /// Commit queue entry to resolve with [`TxManager::complete_pending`]
        token: LimboToken,
    },
}

/// Journal entry of a prepared transaction, ready to be written
#[derive(Debug)]
pub struct JournalWrite {
    /// Entry to persist
    pub entry: JournalEntry,
    /// The transaction touched a synchronous space
    pub is_sync: bool,
}

/// Result of [`TxManager::start_commit`]
#[derive(Debug)]
pub enum CommitStep {
    /// The transaction finished without a journal write
    Done(CommitOutcome),
    /// The entry must be written, then passed to `finish_commit`
    Write(JournalWrite),
}

impl TxManager {
    /// Prepare `txn` and build its journal entry
    ///
    /// Applier rows go first, followed by local rows. If the last local
    /// row is group-local while other rows are replicated, a trailing NOP
    /// keeps the transaction boundary visible to replicas.
    pub fn start_commit(&mut self, txn: TxnId) -> Result<CommitStep> {
        self.prepare(txn)?;
        let t = &self.txns[txn];
        if t.n_new_rows + t.n_applier_rows == 0 {
            self.commit(txn)?;
            return Ok(CommitStep::Done(CommitOutcome::Nop));
        }

        let mut applier = Vec::with_capacity(t.n_applier_rows);
        let mut local = Vec::with_capacity(t.n_new_rows + 1);
        let mut is_sync = false;
        for &stmt in &t.stmts {
            let s = &self.stmts[stmt];
            let Some(row) = &s.row else {
                continue;
            };
            if let Some(space) = s.space.and_then(|id| self.spaces.get(&id)) {
                is_sync |= space.def().is_sync;
            }
            if row.is_local() {
                local.push(row.clone());
            } else {
                applier.push(row.clone());
            }
        }
        let needs_nop = t.n_local_rows > 0
            && (t.n_local_rows != t.n_new_rows || t.n_applier_rows > 0)
            && local.last().is_some_and(|row| row.group_local);
        if needs_nop {
            local.push(RedoRow::new(RequestType::Nop, None));
        }
        applier.extend(local);
        Ok(CommitStep::Write(JournalWrite {
            entry: JournalEntry::new(t.id, applier),
            is_sync,
        }))
    }

    /// Complete a commit after the journal write returned
    ///
    /// `token` is the commit queue entry appended before the write, for a
    /// synchronous transaction.
    pub fn finish_commit(
        &mut self,
        txn: TxnId,
        token: Option<LimboToken>,
        written: Result<i64>,
        queue: &mut CommitQueue,
    ) -> Result<CommitOutcome> {
        let id = self.txn_ref(txn)?.id;
        let signature = match written {
            Ok(signature) => signature,
            Err(e) => {
                if let Some(token) = token {
                    queue.abort(token);
                }
                warn!(txn_id = id, error = %e, "journal write failed, rolling back");
                self.rollback(txn);
                return Err(match e {
                    Error::WalIo(msg) => Error::WalIo(msg),
                    other => Error::WalIo(other.to_string()),
                });
            }
        };
        self.txns[txn].signature = Some(signature);
        match token {
            None => {
                self.commit(txn)?;
                Ok(CommitOutcome::Committed { signature })
            }
            Some(token) => {
                queue.assign_lsn(token, signature);
                debug!(txn_id = id, signature, "transaction waits for quorum");
                Ok(CommitOutcome::Pending { token })
            }
        }
    }

    /// Prepare, journal and commit `txn`
    pub fn commit_with<J: Journal + ?Sized>(
        &mut self,
        txn: TxnId,
        journal: &mut J,
        queue: &mut CommitQueue,
    ) -> Result<CommitOutcome> {
        let mut write = match self.start_commit(txn)? {
            CommitStep::Done(outcome) => return Ok(outcome),
            CommitStep::Write(write) => write,
        };
        let token = write.is_sync.then(|| queue.append(write.entry.txn_id));
        let written = journal.write(&mut write.entry);
        self.finish_commit(txn, token, written, queue)
    }

    /// Resolve a transaction left pending by the commit queue
    pub fn complete_pending(&mut self, txn: TxnId, state: LimboState) -> Result<()> {
        let t = self.txn_ref(txn)?;
        if t.status != TxnStatus::Prepared {
            return Err(Error::InvalidOperation(format!(
                "cannot complete a {} transaction",
                t.status.as_str()
            )));
        }
        match state {
            LimboState::Confirmed => self.commit(txn),
            LimboState::RolledBack => {
                self.rollback(txn);
                Err(Error::SyncRollback)
            }
            LimboState::Pending => Err(Error::InvalidOperation(
                "transaction is still waiting for quorum".into(),
            )),
        }
    }
}
