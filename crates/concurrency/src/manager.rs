//! Transaction manager
//!
//! [`TxManager`] is the single context object holding all MVCC state: the
//! registered spaces, the story table, and the arenas of transactions,
//! statements, conflict edges and read trackers. Every public operation of
//! the engine is a method on it and runs to completion without suspending.
//!
//! ## Lifecycle
//!
//! ```text
//! begin() ─> begin_statement() ─> apply() ─> commit_statement() ─┐
//!   ^                                                            │
//!   └──────────────── more statements ───────────────────────────┘
//!                                │
//!             prepare() ─> commit()   or   rollback()
//! ```
//!
//! The manager is not thread-safe by itself; see
//! [`SharedTxManager`](crate::SharedTxManager) for the locked wrapper.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::mem;
use strata_core::{DupMode, Error, Result, Space, SpaceId, Tuple};
use tracing::{debug, error, trace};

use crate::arena::Arena;
use crate::config::TxManagerConfig;
use crate::conflict::{ConflictEdge, EdgeId};
use crate::read_set::{Gap, ReadTracker};
use crate::statement::Statement;
use crate::story::{Older, Story, StoryId, StoryTable};
use crate::transaction::{Psn, Transaction, TxnId, TxnStatus};

/// Counters describing the manager's current state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxManagerStats {
    /// Live stories
    pub stories: usize,
    /// Live transactions
    pub transactions: usize,
    /// Transactions currently in a read view
    pub read_view_transactions: usize,
    /// Live statements across all transactions
    pub statements: usize,
    /// Live conflict edges
    pub conflict_edges: usize,
    /// Live read trackers
    pub read_trackers: usize,
    /// Live gap trackers
    pub gap_trackers: usize,
    /// Last assigned prepare sequence number
    pub last_psn: Psn,
    /// Next arena slot the garbage collector inspects; a slot index, not
    /// a story count
    pub gc_cursor: usize,
}

/// MVCC transaction and version manager
pub struct TxManager {
    pub(crate) config: TxManagerConfig,
    pub(crate) spaces: FxHashMap<SpaceId, Space>,
    pub(crate) stories: StoryTable,
    pub(crate) txns: Arena<Transaction>,
    pub(crate) stmts: Arena<Statement>,
    pub(crate) edges: Arena<ConflictEdge>,
    pub(crate) trackers: Arena<ReadTracker>,
    /// Readers of every absent key
    pub(crate) gaps: FxHashMap<Gap, SmallVec<[TxnId; 2]>>,
    /// Transactions in a read view, ascending by `rv_psn`
    pub(crate) read_view_txs: VecDeque<TxnId>,
    pub(crate) last_psn: Psn,
    pub(crate) next_txn_id: u64,
    pub(crate) gc_cursor: usize,
}

impl TxManager {
    /// Create a manager
    ///
    /// Fails if the configuration does not validate.
    pub fn new(config: TxManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: TxManagerConfig) -> Self {
        TxManager {
            config,
            spaces: FxHashMap::default(),
            stories: StoryTable::new(),
            txns: Arena::new(),
            stmts: Arena::new(),
            edges: Arena::new(),
            trackers: Arena::new(),
            gaps: FxHashMap::default(),
            read_view_txs: VecDeque::new(),
            last_psn: 0,
            next_txn_id: 0,
            gc_cursor: 0,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &TxManagerConfig {
        &self.config
    }

    /// Register a space; its id must be unused
    pub fn create_space(&mut self, space: Space) -> Result<SpaceId> {
        let id = space.id();
        if self.spaces.contains_key(&id) {
            return Err(Error::InvalidOperation(format!(
                "space {} already exists",
                id
            )));
        }
        debug!(space_id = id.0, name = space.name(), "space registered");
        self.spaces.insert(id, space);
        Ok(id)
    }

    /// Look up a space
    pub fn space(&self, id: SpaceId) -> Option<&Space> {
        self.spaces.get(&id)
    }

    /// Insert already-committed data, bypassing transactions
    ///
    /// Used to populate a space from a snapshot. The tuple goes straight
    /// into every index and stays clean.
    pub fn load(&mut self, space: SpaceId, tuple: Tuple) -> Result<()> {
        if self.stories.is_dirty(&tuple) {
            return Err(Error::InvalidOperation(
                "tuple is already owned by a space".into(),
            ));
        }
        let s = self.space_mut(space)?;
        for i in 0..s.index_count() {
            if let Err(e) = s.replace(i, None, Some(&tuple), DupMode::Insert) {
                for j in (0..i).rev() {
                    // Undoing a put we just made cannot hit a duplicate.
                    let _ = s.replace(j, Some(&tuple), None, DupMode::Insert);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Start a transaction
    pub fn begin(&mut self) -> TxnId {
        self.next_txn_id += 1;
        let id = self.next_txn_id;
        let txn = self.txns.insert(Transaction::new(id));
        debug!(txn_id = id, "transaction started");
        txn
    }

    /// Look up a live transaction
    pub fn txn(&self, txn: TxnId) -> Option<&Transaction> {
        self.txns.get(txn)
    }

    /// Status of a live transaction, `None` once it has finished
    pub fn status(&self, txn: TxnId) -> Option<TxnStatus> {
        self.txns.get(txn).map(|t| t.status)
    }

    /// The story table
    pub fn stories(&self) -> &StoryTable {
        &self.stories
    }

    /// Last assigned prepare sequence number
    pub fn last_psn(&self) -> Psn {
        self.last_psn
    }

    /// Snapshot of the manager's counters
    pub fn stats(&self) -> TxManagerStats {
        TxManagerStats {
            stories: self.stories.len(),
            transactions: self.txns.len(),
            read_view_transactions: self.read_view_txs.len(),
            statements: self.stmts.len(),
            conflict_edges: self.edges.len(),
            read_trackers: self.trackers.len(),
            gap_trackers: self.gaps.values().map(|readers| readers.len()).sum(),
            last_psn: self.last_psn,
            gc_cursor: self.gc_cursor,
        }
    }

    pub(crate) fn txn_ref(&self, txn: TxnId) -> Result<&Transaction> {
        self.txns.get(txn).ok_or(Error::NoSuchTransaction)
    }

    pub(crate) fn txn_mut(&mut self, txn: TxnId) -> Result<&mut Transaction> {
        self.txns.get_mut(txn).ok_or(Error::NoSuchTransaction)
    }

    pub(crate) fn space_ref(&self, space: SpaceId) -> Result<&Space> {
        self.spaces.get(&space).ok_or(Error::NoSuchSpace(space))
    }

    pub(crate) fn space_mut(&mut self, space: SpaceId) -> Result<&mut Space> {
        self.spaces.get_mut(&space).ok_or(Error::NoSuchSpace(space))
    }

    /// Charge one tracker or edge to a transaction's region
    pub(crate) fn region_alloc(&mut self, txn: TxnId, object: &'static str) -> Result<()> {
        let limit = self.config.txn_region_limit;
        let t = self.txn_mut(txn)?;
        if let Some(limit) = limit {
            if t.region_objects >= limit {
                let size = match object {
                    "conflict_tracker" => mem::size_of::<ConflictEdge>(),
                    _ => mem::size_of::<ReadTracker>(),
                };
                return Err(Error::OutOfMemory {
                    size,
                    allocator: "tx region",
                    object,
                });
            }
        }
        t.region_objects += 1;
        Ok(())
    }

    /// Story of `tuple`, creating an ancient one for a clean tuple
    pub(crate) fn find_or_create_story(&mut self, space: SpaceId, tuple: &Tuple) -> Result<StoryId> {
        match self.stories.find(tuple) {
            Some(story) => Ok(story),
            None => self.create_story(space, tuple),
        }
    }

    /// Allocate a story for a clean tuple
    ///
    /// Runs a few garbage collector steps first, so allocation pressure
    /// drives reclamation.
    pub(crate) fn create_story(&mut self, space: SpaceId, tuple: &Tuple) -> Result<StoryId> {
        for _ in 0..self.config.gc_steps_per_story {
            self.gc_step();
        }
        if let Some(max) = self.config.max_stories {
            if self.stories.len() >= max {
                return Err(Error::OutOfMemory {
                    size: mem::size_of::<Story>(),
                    allocator: "tx_manager",
                    object: "tx story",
                });
            }
        }
        let index_count = self.space_ref(space)?.index_count();
        let story = self.stories.insert(space, tuple, index_count);
        trace!(space_id = space.0, tuple = %tuple.id(), "story created");
        Ok(story)
    }

    /// Free a fully unlinked story, detaching its readers
    pub(crate) fn delete_story(&mut self, story: StoryId) {
        let s = &self.stories[story];
        if s.add_stmt.is_some() || !s.del_stmts.is_empty() {
            error!(
                space_id = s.space.0,
                tuple = %s.tuple.id(),
                "deleting a story still referenced by a statement"
            );
            panic!("story {:?} is still referenced by a statement", story);
        }
        self.detach_readers(story);
        self.stories.remove(story);
    }

    /// Delete a rolled-back add story
    ///
    /// The writer that was replacing it now replaces `heir`, the story that
    /// lay beneath it in the primary index. Pure deletes lose their target.
    /// If the story had been prepared, other transactions could see it:
    /// foreign deleters that depended on it and its other readers are
    /// conflicted.
    pub(crate) fn retire_story(&mut self, story: StoryId, owner: TxnId, heir: Option<StoryId>) {
        let prepared = self.stories[story].add_psn != 0;
        let dels = self.stories[story].del_stmts.clone();
        for stmt in dels {
            let (deleter, requires_old_tuple, writer) = {
                let s = &self.stmts[stmt];
                (s.txn, s.requires_old_tuple, s.add_story.is_some())
            };
            if prepared && deleter != owner && requires_old_tuple {
                self.mark_conflicted(deleter);
            }
            let to = if writer { heir } else { None };
            self.retarget_delete(stmt, to);
        }
        if prepared {
            for reader in self.active_readers(story, owner) {
                self.mark_conflicted(reader);
            }
        }
        self.delete_story(story);
    }

    /// Replace in an index where failure would mean broken chains
    pub(crate) fn restore_index(
        &mut self,
        space: SpaceId,
        index: usize,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
    ) {
        let result = match self.spaces.get_mut(&space) {
            Some(s) => s.replace(index, old, new, DupMode::Insert),
            None => Err(Error::NoSuchSpace(space)),
        };
        if let Err(e) = result {
            error!(space_id = space.0, index, error = %e, "failed to restore index entry");
            panic!("failed to rollback change: {}", e);
        }
    }

    /// Release everything a finished transaction still holds
    pub(crate) fn free_txn(&mut self, txn: TxnId) {
        self.release_read_set(txn);
        let edges: Vec<EdgeId> = {
            let t = &mut self.txns[txn];
            t.conflict_list
                .drain(..)
                .chain(t.conflicted_by.drain(..))
                .collect()
        };
        for edge in edges {
            self.drop_edge(edge);
        }
        self.read_view_txs.retain(|&t| t != txn);
        let stmts = mem::take(&mut self.txns[txn].stmts);
        for stmt in stmts {
            let attached = self
                .stmts
                .get(stmt)
                .is_some_and(|s| s.add_story.is_some() || s.del_story.is_some());
            if attached {
                self.rollback_stmt_history(stmt);
            }
            self.stmts.remove(stmt);
        }
        self.txns.remove(txn);
    }

    /// Verify version chains against the indexes
    ///
    /// Checks back-pointer symmetry, the tuple → story map, that chains
    /// are acyclic, and that each chain top is the tuple physically stored
    /// in its index under its key.
    pub fn check_chains(&self) -> Result<()> {
        let corrupt = |msg: String| Err(Error::Corruption(msg));
        for (id, story) in self.stories.iter() {
            if self.stories.find(&story.tuple) != Some(id) {
                return corrupt(format!("story {:?} is not registered for its tuple", id));
            }
            let Some(space) = self.spaces.get(&story.space) else {
                return corrupt(format!("story {:?} belongs to a missing space", id));
            };
            if story.links.len() != space.index_count() {
                return corrupt(format!("story {:?} has {} links", id, story.links.len()));
            }
            for (i, link) in story.links.iter().enumerate() {
                if let Older::Story(older) = link.older {
                    match self.stories.get(older) {
                        Some(o) if o.links[i].newer == Some(id) => {}
                        _ => {
                            return corrupt(format!(
                                "story {:?} index {}: older link is not mutual",
                                id, i
                            ))
                        }
                    }
                }
                match link.newer {
                    Some(newer) => match self.stories.get(newer) {
                        Some(n) if n.links[i].older.story() == Some(id) => {}
                        _ => {
                            return corrupt(format!(
                                "story {:?} index {}: newer link is not mutual",
                                id, i
                            ))
                        }
                    },
                    None => {
                        let key = space.index(i).key_def().extract(&story.tuple);
                        let stored = space.get(i, &key);
                        if !matches!(&stored, Some(t) if *t == story.tuple) {
                            return corrupt(format!(
                                "story {:?} is the top of index {} but the index holds {:?}",
                                id, i, stored
                            ));
                        }
                    }
                }
                let mut steps = 0;
                let mut cur = id;
                while let Some(newer) = self.stories[cur].links[i].newer {
                    steps += 1;
                    if steps > self.stories.len() {
                        return corrupt(format!("cycle through story {:?} in index {}", id, i));
                    }
                    cur = newer;
                }
            }
        }
        Ok(())
    }
}

impl Default for TxManager {
    fn default() -> Self {
        Self::with_config(TxManagerConfig::default())
    }
}

impl std::fmt::Debug for TxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxManager")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxManagerConfig;
    use strata_core::{tuple, Key, KeyDef, SpaceDef};
    use strata_storage::{HashIndex, TreeIndex};

    fn two_index_space(id: u32) -> Space {
        Space::new(
            SpaceDef::new(id, "users"),
            vec![
                TreeIndex::boxed("pk", KeyDef::field(0)),
                HashIndex::boxed("name", KeyDef::field(1)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TxManagerConfig::new().with_max_sub_statements(0);
        assert!(matches!(
            TxManager::new(config),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_duplicate_space_rejected() {
        let mut mgr = TxManager::default();
        mgr.create_space(two_index_space(512)).unwrap();
        assert!(mgr.create_space(two_index_space(512)).is_err());
        assert!(mgr.space(SpaceId(512)).is_some());
        assert!(mgr.space(SpaceId(513)).is_none());
    }

    #[test]
    fn test_load_fills_every_index() {
        let mut mgr = TxManager::default();
        let space = mgr.create_space(two_index_space(512)).unwrap();
        let t = tuple![1u64, "alice"];
        mgr.load(space, t.clone()).unwrap();
        let s = mgr.space(space).unwrap();
        assert_eq!(s.get(0, &Key::from(1u64)), Some(t.clone()));
        assert_eq!(s.get(1, &Key::from("alice")), Some(t));
        assert!(mgr.stories().is_empty());
    }

    #[test]
    fn test_load_unwinds_on_secondary_duplicate() {
        let mut mgr = TxManager::default();
        let space = mgr.create_space(two_index_space(512)).unwrap();
        mgr.load(space, tuple![1u64, "alice"]).unwrap();
        let err = mgr.load(space, tuple![2u64, "alice"]).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
        assert!(mgr.space(space).unwrap().get(0, &Key::from(2u64)).is_none());
    }

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let mut mgr = TxManager::default();
        let a = mgr.begin();
        let b = mgr.begin();
        assert!(mgr.txn(b).unwrap().id() > mgr.txn(a).unwrap().id());
        assert_eq!(mgr.stats().transactions, 2);
    }

    #[test]
    fn test_story_quota() {
        let mut mgr = TxManager::new(TxManagerConfig::for_testing().with_max_stories(1)).unwrap();
        let space = mgr.create_space(two_index_space(512)).unwrap();
        mgr.create_story(space, &tuple![1u64, "a"]).unwrap();
        let err = mgr.create_story(space, &tuple![2u64, "b"]).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfMemory {
                object: "tx story",
                ..
            }
        ));
    }

    #[test]
    fn test_finished_handle_is_stale() {
        let mut mgr = TxManager::default();
        let txn = mgr.begin();
        mgr.rollback(txn);
        assert!(mgr.txn(txn).is_none());
        assert_eq!(mgr.status(txn), None);
        assert_eq!(
            mgr.begin_statement(txn, None).unwrap_err(),
            Error::NoSuchTransaction
        );
    }

    #[test]
    #[should_panic(expected = "still referenced")]
    fn test_delete_referenced_story_panics() {
        let mut mgr = TxManager::new(TxManagerConfig::for_testing()).unwrap();
        let space = mgr.create_space(two_index_space(512)).unwrap();
        let txn = mgr.begin();
        let stmt = mgr.begin_statement(txn, Some(space)).unwrap();
        let t = tuple![1u64, "a"];
        mgr.apply(stmt, None, Some(&t), DupMode::Insert).unwrap();
        let story = mgr.stories().find(&t).unwrap();
        mgr.delete_story(story);
    }

    #[test]
    fn test_check_chains_on_clean_manager() {
        let mut mgr = TxManager::new(TxManagerConfig::for_testing()).unwrap();
        let space = mgr.create_space(two_index_space(512)).unwrap();
        let txn = mgr.begin();
        let stmt = mgr.begin_statement(txn, Some(space)).unwrap();
        mgr.apply(stmt, None, Some(&tuple![1u64, "a"]), DupMode::Insert)
            .unwrap();
        mgr.check_chains().unwrap();
    }
}
