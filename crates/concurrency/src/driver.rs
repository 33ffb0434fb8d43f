//! Prepare, commit and rollback
//!
//! ## Prepare
//!
//! ```text
//! 1. reject a conflicted transaction, a read view that wrote, outstanding
//!    deferred foreign keys, or a transaction aborted by yield
//! 2. psn = ++last_psn
//! 3. fix every statement's stories in history at psn
//! 4. demote every victim of our conflict edges
//! ```
//!
//! A rejected prepare rolls the transaction back before returning, and
//! never consumes a psn.

use std::time::Instant;
use strata_core::{Error, Result};
use tracing::{debug, warn};

use crate::manager::TxManager;
use crate::transaction::{Psn, TxnId, TxnStatus};

impl TxManager {
    /// Fix the transaction's changes in history
    ///
    /// Returns the assigned psn. On failure the transaction has already
    /// been rolled back.
    pub fn prepare(&mut self, txn: TxnId) -> Result<Psn> {
        let t = self.txn_ref(txn)?;
        if !t.is_active() {
            return Err(Error::InvalidOperation(format!(
                "cannot prepare a {} transaction",
                t.status.as_str()
            )));
        }
        let rejection = if t.status == TxnStatus::Conflicted
            || (t.status == TxnStatus::InReadView && !t.stmts.is_empty())
        {
            Some(Error::TransactionConflict)
        } else if t.fk_deferred_count != 0 {
            Some(Error::ForeignKeyDeferred {
                count: t.fk_deferred_count,
            })
        } else if t.aborted_by_yield {
            Some(Error::TransactionYield)
        } else {
            None
        };
        if let Some(e) = rejection {
            debug!(txn_id = t.id, error = %e, "prepare rejected");
            self.rollback(txn);
            return Err(e);
        }

        self.last_psn += 1;
        let psn = self.last_psn;
        self.txns[txn].psn = psn;

        let stmts = self.txns[txn].stmts.clone();
        for stmt in stmts {
            self.prepare_stmt_history(stmt);
        }

        let outgoing: Vec<_> = self.txns[txn].conflict_list.iter().copied().collect();
        for edge in outgoing {
            let victim = self.edges[edge].victim;
            self.handle_conflict(txn, victim);
            self.drop_edge(edge);
        }
        let incoming: Vec<_> = self.txns[txn].conflicted_by.iter().copied().collect();
        for edge in incoming {
            self.drop_edge(edge);
        }

        let t = &mut self.txns[txn];
        t.status = TxnStatus::Prepared;
        t.prepare_tm = Some(Instant::now());
        debug!(txn_id = t.id, psn, statements = t.stmts.len(), "transaction prepared");
        Ok(psn)
    }

    /// Finish a transaction, preparing it first if needed
    ///
    /// The caller must already have made the changes durable; see
    /// [`TxManager::commit_with`] for the journal-driven path.
    pub fn commit(&mut self, txn: TxnId) -> Result<()> {
        if self.txn_ref(txn)?.status != TxnStatus::Prepared {
            self.prepare(txn)?;
        }

        let stmts = self.txns[txn].stmts.clone();
        for &stmt in &stmts {
            self.commit_stmt_history(stmt);
        }

        let threshold = self.config.too_long_threshold;
        let t = &mut self.txns[txn];
        t.status = TxnStatus::Committed;
        if let Some(prepared) = t.prepare_tm {
            let waited = prepared.elapsed();
            if waited > threshold {
                warn!(
                    txn_id = t.id,
                    psn = t.psn,
                    elapsed_ms = waited.as_millis() as u64,
                    "too long transaction commit"
                );
            }
        }
        debug!(
            txn_id = t.id,
            psn = t.psn,
            duration_us = t.begin_tm.elapsed().as_micros() as u64,
            "transaction committed"
        );
        self.free_txn(txn);
        Ok(())
    }

    /// Undo every statement in reverse order and finish the transaction
    ///
    /// Always succeeds; a stale handle is ignored.
    pub fn rollback(&mut self, txn: TxnId) {
        let Some(t) = self.txns.get_mut(txn) else {
            return;
        };
        t.status = TxnStatus::Aborted;
        let id = t.id;
        self.rollback_to(txn, 0);
        debug!(txn_id = id, "transaction rolled back");
        self.free_txn(txn);
    }

    /// Allow or forbid the transaction to span a yield
    pub fn set_can_yield(&mut self, txn: TxnId, can_yield: bool) -> Result<()> {
        self.txn_mut(txn)?.can_yield = can_yield;
        Ok(())
    }

    /// Notify the manager that the task running `txn` yielded
    ///
    /// A non-yieldable transaction loses all its statements and can no
    /// longer prepare.
    pub fn on_yield(&mut self, txn: TxnId) -> Result<()> {
        let t = self.txn_ref(txn)?;
        if t.can_yield || t.aborted_by_yield || !t.is_active() {
            return Ok(());
        }
        let id = t.id;
        self.rollback_to(txn, 0);
        let t = &mut self.txns[txn];
        t.sub_stmt_begin.clear();
        t.savepoints.clear();
        t.aborted_by_yield = true;
        warn!(txn_id = id, "transaction aborted by yield");
        Ok(())
    }

    /// Adjust the deferred foreign key counter, returning the new value
    pub fn adjust_deferred_fk(&mut self, txn: TxnId, delta: i64) -> Result<i64> {
        let t = self.txn_mut(txn)?;
        t.fk_deferred_count += delta;
        Ok(t.fk_deferred_count)
    }
}
