//! Synchronous replication commit queue ("limbo")
//!
//! A transaction that touched a synchronous space is appended here before its
//! journal write. Once written it gets the LSN of its last row, and waits
//! until `quorum` distinct instances (the local write counts as one) have
//! acknowledged that LSN. Confirmation is strictly in queue order: an entry
//! is never confirmed while an older one is still pending. Rolling an entry
//! back rolls back every newer entry as well, since they may depend on it.

use rustc_hash::FxHashSet;
use std::collections::VecDeque;

/// Handle to a queued transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LimboToken(u64);

/// Resolution state of a queued transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimboState {
    /// Waiting for quorum
    Pending,
    /// Quorum reached
    Confirmed,
    /// Rolled back by the queue
    RolledBack,
}

#[derive(Debug)]
struct LimboEntry {
    token: LimboToken,
    txn_id: u64,
    lsn: Option<i64>,
    acks: FxHashSet<u32>,
    state: LimboState,
}

/// Queue of transactions awaiting replication quorum
#[derive(Debug)]
pub struct CommitQueue {
    entries: VecDeque<LimboEntry>,
    next_token: u64,
    quorum: usize,
    instance_id: u32,
    confirmed_lsn: i64,
}

impl CommitQueue {
    /// Queue for the local instance `instance_id` with the given quorum
    pub fn new(instance_id: u32, quorum: usize) -> Self {
        CommitQueue {
            entries: VecDeque::new(),
            next_token: 1,
            quorum: quorum.max(1),
            instance_id,
            confirmed_lsn: 0,
        }
    }

    /// Local instance id
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// Required number of acknowledgements
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Change the quorum and confirm whatever now qualifies
    pub fn set_quorum(&mut self, quorum: usize) {
        self.quorum = quorum.max(1);
        self.confirm_ready();
    }

    /// Highest LSN confirmed so far
    pub fn confirmed_lsn(&self) -> i64 {
        self.confirmed_lsn
    }

    /// Number of entries not yet collected
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue a transaction
    pub fn append(&mut self, txn_id: u64) -> LimboToken {
        let token = LimboToken(self.next_token);
        self.next_token += 1;
        self.entries.push_back(LimboEntry {
            token,
            txn_id,
            lsn: None,
            acks: FxHashSet::default(),
            state: LimboState::Pending,
        });
        tracing::trace!(txn_id, token = token.0, "appended to commit queue");
        token
    }

    /// Drop an entry whose journal write failed
    ///
    /// Entries behind it are rolled back as well.
    pub fn abort(&mut self, token: LimboToken) {
        self.rollback(token);
        if let Some(pos) = self.position(token) {
            self.entries.remove(pos);
        }
    }

    /// Record the LSN of the entry's last row; the local write acks it
    pub fn assign_lsn(&mut self, token: LimboToken, lsn: i64) {
        let local = self.instance_id;
        if let Some(pos) = self.position(token) {
            let entry = &mut self.entries[pos];
            entry.lsn = Some(lsn);
            entry.acks.insert(local);
        }
        self.confirm_ready();
    }

    /// Acknowledge every entry up to `lsn` on behalf of `replica_id`
    pub fn ack(&mut self, replica_id: u32, lsn: i64) {
        for entry in self.entries.iter_mut() {
            if entry.state != LimboState::Pending {
                continue;
            }
            match entry.lsn {
                Some(l) if l <= lsn => {
                    entry.acks.insert(replica_id);
                }
                _ => {}
            }
        }
        self.confirm_ready();
    }

    /// Roll back an entry and every newer one
    pub fn rollback(&mut self, token: LimboToken) {
        let Some(pos) = self.position(token) else {
            return;
        };
        for entry in self.entries.iter_mut().skip(pos) {
            if entry.state == LimboState::Pending {
                tracing::debug!(txn_id = entry.txn_id, "commit queue rollback");
                entry.state = LimboState::RolledBack;
            }
        }
    }

    /// Current state of an entry, `None` once collected
    pub fn state(&self, token: LimboToken) -> Option<LimboState> {
        self.position(token).map(|pos| self.entries[pos].state)
    }

    /// Remove and return every resolved entry as `(token, txn_id, state)`
    pub fn take_completed(&mut self) -> Vec<(LimboToken, u64, LimboState)> {
        let mut done = Vec::new();
        self.entries.retain(|entry| {
            if entry.state == LimboState::Pending {
                return true;
            }
            done.push((entry.token, entry.txn_id, entry.state));
            false
        });
        done
    }

    fn position(&self, token: LimboToken) -> Option<usize> {
        self.entries.iter().position(|e| e.token == token)
    }

    fn confirm_ready(&mut self) {
        for entry in self.entries.iter_mut() {
            match entry.state {
                LimboState::Confirmed => continue,
                LimboState::RolledBack => break,
                LimboState::Pending => {}
            }
            match entry.lsn {
                Some(lsn) if entry.acks.len() >= self.quorum => {
                    entry.state = LimboState::Confirmed;
                    self.confirmed_lsn = self.confirmed_lsn.max(lsn);
                    tracing::trace!(txn_id = entry.txn_id, lsn, "commit queue confirm");
                }
                _ => break,
            }
        }
    }
}
