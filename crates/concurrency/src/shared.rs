//! Thread-safe handle to a transaction manager
//!
//! The manager itself assumes a single writer. [`SharedTxManager`] puts it
//! behind one mutex that is held for the duration of each call, which keeps
//! every chain mutation atomic with respect to other threads. The lock is
//! released while a commit waits for the journal.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use strata_core::Result;
use strata_durability::{CommitQueue, Journal};

use crate::commit::{CommitOutcome, CommitStep};
use crate::config::TxManagerConfig;
use crate::manager::TxManager;
use crate::transaction::TxnId;

/// Cloneable, lock-protected [`TxManager`]
#[derive(Clone, Debug)]
pub struct SharedTxManager {
    inner: Arc<Mutex<TxManager>>,
}

impl SharedTxManager {
    /// New manager with the given configuration
    pub fn new(config: TxManagerConfig) -> Result<Self> {
        Ok(Self::from_manager(TxManager::new(config)?))
    }

    /// Share an existing manager
    pub fn from_manager(mgr: TxManager) -> Self {
        SharedTxManager {
            inner: Arc::new(Mutex::new(mgr)),
        }
    }

    /// Lock the manager
    pub fn lock(&self) -> MutexGuard<'_, TxManager> {
        self.inner.lock()
    }

    /// Run `f` with the manager locked
    pub fn with<R>(&self, f: impl FnOnce(&mut TxManager) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Journal-driven commit that does not hold the lock during the write
    ///
    /// The transaction is prepared under the lock, so its changes are
    /// already fixed in history while the journal works.
    pub fn commit_with<J: Journal + ?Sized>(
        &self,
        txn: TxnId,
        journal: &Mutex<J>,
        queue: &Mutex<CommitQueue>,
    ) -> Result<CommitOutcome> {
        let mut write = match self.lock().start_commit(txn)? {
            CommitStep::Done(outcome) => return Ok(outcome),
            CommitStep::Write(write) => write,
        };
        let token = write
            .is_sync
            .then(|| queue.lock().append(write.entry.txn_id));
        let written = journal.lock().write(&mut write.entry);
        let mut queue = queue.lock();
        self.lock().finish_commit(txn, token, written, &mut queue)
    }
}
