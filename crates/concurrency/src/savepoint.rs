//! Transaction savepoints
//!
//! A savepoint remembers a position in the statement ledger together with
//! the statement nesting depth and the deferred foreign key counter at the
//! time it was taken. Rolling back to it undoes every later statement in
//! reverse order.

use strata_core::{Error, Result};
use tracing::debug;

use crate::manager::TxManager;
use crate::statement::StmtId;
use crate::transaction::TxnId;

/// Savepoint handle, unique within its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SavepointId(pub u64);

#[derive(Debug, Clone)]
pub(crate) struct Savepoint {
    pub(crate) id: SavepointId,
    pub(crate) name: Option<String>,
    /// Last statement before the savepoint, to detect it being rolled back
    pub(crate) stmt: Option<StmtId>,
    pub(crate) len: usize,
    pub(crate) depth: usize,
    pub(crate) fk_deferred_count: i64,
}

impl TxManager {
    /// Remember the current ledger position
    ///
    /// A named savepoint replaces an older one with the same name.
    pub fn savepoint(&mut self, txn: TxnId, name: Option<&str>) -> Result<SavepointId> {
        let t = self.txn_mut(txn)?;
        if !t.is_active() {
            return Err(Error::InvalidOperation(format!(
                "cannot create a savepoint in a {} transaction",
                t.status.as_str()
            )));
        }
        if let Some(name) = name {
            t.savepoints.retain(|s| s.name.as_deref() != Some(name));
        }
        let id = SavepointId(t.next_savepoint);
        t.next_savepoint += 1;
        let savepoint = Savepoint {
            id,
            name: name.map(str::to_owned),
            stmt: t.stmts.last().copied(),
            len: t.stmts.len(),
            depth: t.sub_stmt_begin.len(),
            fk_deferred_count: t.fk_deferred_count,
        };
        t.savepoints.push(savepoint);
        Ok(id)
    }

    /// Find a named savepoint
    pub fn savepoint_by_name(&self, txn: TxnId, name: &str) -> Option<SavepointId> {
        self.txns
            .get(txn)?
            .savepoints
            .iter()
            .rev()
            .find(|s| s.name.as_deref() == Some(name))
            .map(|s| s.id)
    }

    fn savepoint_position(&self, txn: TxnId, id: SavepointId) -> Result<usize> {
        let t = self.txn_ref(txn)?;
        let pos = t
            .savepoints
            .iter()
            .position(|s| s.id == id)
            .ok_or(Error::NoSuchSavepoint)?;
        let s = &t.savepoints[pos];
        let stmt_alive = match s.stmt {
            None => true,
            Some(stmt) => t.stmts.get(s.len.wrapping_sub(1)) == Some(&stmt),
        };
        if !stmt_alive || s.len > t.stmts.len() || s.depth != t.sub_stmt_begin.len() {
            return Err(Error::NoSuchSavepoint);
        }
        Ok(pos)
    }

    /// Undo everything done after the savepoint
    ///
    /// The savepoint itself survives; newer ones are discarded.
    pub fn rollback_to_savepoint(&mut self, txn: TxnId, id: SavepointId) -> Result<()> {
        let pos = self.savepoint_position(txn, id)?;
        let (len, fk) = {
            let s = &self.txns[txn].savepoints[pos];
            (s.len, s.fk_deferred_count)
        };
        self.rollback_to(txn, len);
        let t = &mut self.txns[txn];
        t.savepoints.truncate(pos + 1);
        t.fk_deferred_count = fk;
        debug!(txn_id = t.id, savepoint = id.0, statements = len, "rolled back to savepoint");
        Ok(())
    }

    /// Forget the savepoint and every newer one
    pub fn release_savepoint(&mut self, txn: TxnId, id: SavepointId) -> Result<()> {
        let pos = self.savepoint_position(txn, id)?;
        self.txns[txn].savepoints.truncate(pos);
        Ok(())
    }
}
