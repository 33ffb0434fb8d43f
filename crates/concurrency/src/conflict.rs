//! Conflict tracker
//!
//! A conflict edge `(breaker, victim)` says: if `breaker` prepares first,
//! what `victim` has read or written is no longer valid. Edges are charged
//! to the victim's region. When the breaker prepares it walks its edges and
//! demotes each in-progress victim: a read-only victim moves to a read view
//! at the breaker's psn, a writer becomes conflicted.

use strata_core::Result;

use crate::arena::Id;
use crate::manager::TxManager;
use crate::transaction::{TxnId, TxnStatus};

/// Handle to a conflict edge
pub type EdgeId = Id<ConflictEdge>;

/// Directed breaker → victim dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictEdge {
    /// Transaction whose prepare invalidates the victim
    pub breaker: TxnId,
    /// Transaction that gets invalidated
    pub victim: TxnId,
}

impl TxManager {
    /// Record that `breaker` preparing invalidates `victim`
    ///
    /// An existing edge between the pair is moved to the front of both
    /// lists instead of being duplicated.
    pub(crate) fn cause_conflict(&mut self, breaker: TxnId, victim: TxnId) -> Result<()> {
        if breaker == victim {
            return Ok(());
        }
        let existing = {
            let b = &self.txns[breaker];
            let v = &self.txns[victim];
            b.conflict_list
                .iter()
                .zip(v.conflicted_by.iter())
                .find_map(|(&from_breaker, &from_victim)| {
                    if self.edges[from_breaker].victim == victim {
                        Some(from_breaker)
                    } else if self.edges[from_victim].breaker == breaker {
                        Some(from_victim)
                    } else {
                        None
                    }
                })
                .or_else(|| {
                    // Lists of unequal length: finish the longer one.
                    let (short, long) = (b.conflict_list.len(), v.conflicted_by.len());
                    if short > long {
                        b.conflict_list
                            .iter()
                            .skip(long)
                            .copied()
                            .find(|&e| self.edges[e].victim == victim)
                    } else {
                        v.conflicted_by
                            .iter()
                            .skip(short)
                            .copied()
                            .find(|&e| self.edges[e].breaker == breaker)
                    }
                })
        };

        let edge = match existing {
            Some(edge) => {
                self.txns[breaker].conflict_list.retain(|&e| e != edge);
                self.txns[victim].conflicted_by.retain(|&e| e != edge);
                edge
            }
            None => {
                self.region_alloc(victim, "conflict_tracker")?;
                self.edges.insert(ConflictEdge { breaker, victim })
            }
        };
        self.txns[breaker].conflict_list.push_front(edge);
        self.txns[victim].conflicted_by.push_front(edge);
        Ok(())
    }

    /// Demote `victim` now that `breaker` has a psn
    pub(crate) fn handle_conflict(&mut self, breaker: TxnId, victim: TxnId) {
        let psn = self.txns[breaker].psn;
        debug_assert!(psn != 0, "breaker must be prepared");
        let Some(v) = self.txns.get_mut(victim) else {
            return;
        };
        if v.status != TxnStatus::InProgress {
            return;
        }
        if v.stmts.is_empty() {
            v.status = TxnStatus::InReadView;
            v.rv_psn = psn;
            let txn_id = v.id;
            let pos = self
                .read_view_txs
                .iter()
                .position(|&t| self.txns[t].rv_psn > psn)
                .unwrap_or(self.read_view_txs.len());
            self.read_view_txs.insert(pos, victim);
            tracing::debug!(txn_id, rv_psn = psn, "transaction moved to read view");
        } else {
            v.status = TxnStatus::Conflicted;
            tracing::debug!(txn_id = v.id, breaker_psn = psn, "transaction conflicted");
        }
    }

    /// Mark a still-running transaction conflicted outright
    pub(crate) fn mark_conflicted(&mut self, txn: TxnId) {
        if let Some(t) = self.txns.get_mut(txn) {
            if matches!(t.status, TxnStatus::InProgress | TxnStatus::InReadView) {
                t.status = TxnStatus::Conflicted;
                tracing::debug!(txn_id = t.id, "transaction conflicted");
            }
        }
    }

    /// Unlink an edge from both sides and free it
    pub(crate) fn drop_edge(&mut self, edge: EdgeId) {
        let Some(ConflictEdge { breaker, victim }) = self.edges.remove(edge) else {
            return;
        };
        if let Some(b) = self.txns.get_mut(breaker) {
            b.conflict_list.retain(|&e| e != edge);
        }
        if let Some(v) = self.txns.get_mut(victim) {
            v.conflicted_by.retain(|&e| e != edge);
        }
    }
}
