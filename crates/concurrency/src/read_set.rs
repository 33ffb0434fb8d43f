//! Read tracker
//!
//! A tracker `(reader, story)` remembers that a transaction observed a
//! version. When another transaction later prepares a change that
//! overwrites or deletes that version, every in-progress reader is demoted
//! through the conflict handler.
//!
//! A lookup that finds nothing has no version to hang on. It is recorded as
//! a [`Gap`] instead, and the first writer to put a tuple into the gap gets
//! a conflict edge to every reader of it.

use smallvec::SmallVec;
use strata_core::{Key, Result, SpaceId, Tuple};
use tracing::debug;

use crate::arena::Id;
use crate::manager::TxManager;
use crate::story::{Older, StoryId};
use crate::transaction::{TxnId, TxnStatus};

/// Handle to a read tracker
pub type TrackerId = Id<ReadTracker>;

/// Reader → story observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTracker {
    /// Observing transaction
    pub reader: TxnId,
    /// Observed version
    pub story: StoryId,
}

/// Part of an index a transaction found empty
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Gap {
    pub space: SpaceId,
    pub index: usize,
    /// Absent key, `None` for a scan of the whole index
    pub key: Option<Key>,
}

impl TxManager {
    /// Record that `txn` read `tuple`
    ///
    /// A clean tuple gets an ancient story so the read has something to
    /// hang on. Repeated reads of the same story reuse the tracker.
    pub(crate) fn track_read(
        &mut self,
        txn: Option<TxnId>,
        space: SpaceId,
        tuple: &Tuple,
    ) -> Result<()> {
        let Some(txn) = txn else {
            return Ok(());
        };
        let story = match self.stories.find(tuple) {
            Some(story) => story,
            None => {
                let story = self.create_story(space, tuple)?;
                if let Err(e) = self.region_alloc(txn, "read_tracker") {
                    self.delete_story(story);
                    return Err(e);
                }
                self.attach_tracker(txn, story);
                return Ok(());
            }
        };

        let existing = {
            let readers = &self.stories[story].readers;
            let read_set = &self.txns[txn].read_set;
            let steps = readers.len().max(read_set.len());
            (0..steps).find_map(|i| {
                if let Some(&t) = readers.get(i) {
                    if self.trackers[t].reader == txn {
                        return Some(t);
                    }
                }
                if let Some(&t) = read_set.get(i) {
                    if self.trackers[t].story == story {
                        return Some(t);
                    }
                }
                None
            })
        };

        match existing {
            Some(tracker) => {
                self.stories[story].readers.retain(|&t| t != tracker);
                self.txns[txn].read_set.retain(|&t| t != tracker);
                self.stories[story].readers.push_front(tracker);
                self.txns[txn].read_set.push_front(tracker);
            }
            None => {
                self.region_alloc(txn, "read_tracker")?;
                self.attach_tracker(txn, story);
            }
        }
        Ok(())
    }

    /// Record that `txn` found `key` absent in `index`
    ///
    /// `key: None` covers the whole index.
    pub(crate) fn track_gap(
        &mut self,
        txn: Option<TxnId>,
        space: SpaceId,
        index: usize,
        key: Option<Key>,
    ) -> Result<()> {
        let Some(txn) = txn else {
            return Ok(());
        };
        let gap = Gap { space, index, key };
        if self.gaps.get(&gap).is_some_and(|readers| readers.contains(&txn)) {
            return Ok(());
        }
        self.region_alloc(txn, "read_tracker")?;
        self.gaps.entry(gap.clone()).or_default().push(txn);
        self.txns[txn].gap_set.push(gap);
        Ok(())
    }

    /// Give `writer` a conflict edge to every reader of the gap `key` fills
    ///
    /// A reader whose region cannot hold the edge is conflicted at once.
    pub(crate) fn fill_gap(&mut self, writer: TxnId, space: SpaceId, index: usize, key: &Key) {
        let mut victims: SmallVec<[TxnId; 4]> = SmallVec::new();
        for key in [Some(key.clone()), None] {
            let gap = Gap { space, index, key };
            for &reader in self.gaps.get(&gap).into_iter().flatten() {
                if reader != writer && !victims.contains(&reader) {
                    victims.push(reader);
                }
            }
        }
        for victim in victims {
            if let Err(e) = self.cause_conflict(writer, victim) {
                debug!(error = %e, "gap reader conflicted early");
                self.mark_conflicted(victim);
            }
        }
    }

    /// Pass the readers of a vanishing story to what lies beneath it
    ///
    /// The readers skipped the story and saw the version below, or nothing.
    /// A clean tuple below gets an ancient story to carry the trackers, and
    /// an empty chain becomes a gap. Readers of a prepared story are left to
    /// [`TxManager::retire_story`].
    pub(crate) fn hand_down_readers(&mut self, story: StoryId, owner: TxnId) {
        if self.stories[story].add_psn != 0 {
            return;
        }
        let readers: SmallVec<[TxnId; 4]> = self.stories[story]
            .readers
            .iter()
            .map(|&t| self.trackers[t].reader)
            .filter(|&r| r != owner)
            .filter(|&r| self.txns.get(r).map(|t| t.status) == Some(TxnStatus::InProgress))
            .collect();
        if readers.is_empty() {
            return;
        }
        let space = self.stories[story].space;
        for i in 0..self.stories[story].index_count() {
            let target = match self.stories[story].links[i].older.clone() {
                Older::Story(older) => older,
                Older::Tuple(tuple) => self.adopt_older_tuple(story, space, &tuple),
                Older::None => {
                    let Some(key) = self
                        .spaces
                        .get(&space)
                        .map(|s| s.index(i).key_def().extract(&self.stories[story].tuple))
                    else {
                        continue;
                    };
                    for &reader in &readers {
                        if self.track_gap(Some(reader), space, i, Some(key.clone())).is_err() {
                            self.mark_conflicted(reader);
                        }
                    }
                    continue;
                }
            };
            for &reader in &readers {
                let tracked = self.stories[target]
                    .readers
                    .iter()
                    .any(|&t| self.trackers[t].reader == reader);
                if !tracked {
                    self.attach_tracker(reader, target);
                }
            }
        }
    }

    /// Give the clean tuple beneath `story` a story and link it in place
    fn adopt_older_tuple(&mut self, story: StoryId, space: SpaceId, tuple: &Tuple) -> StoryId {
        let index_count = self.stories[story].index_count();
        let older = match self.stories.find(tuple) {
            Some(older) => older,
            None => self.stories.insert(space, tuple, index_count),
        };
        for j in 0..index_count {
            let points_here =
                matches!(&self.stories[story].links[j].older, Older::Tuple(t) if t == tuple);
            if points_here && self.stories[older].links[j].newer.is_none() {
                self.stories.unlink(story, j);
                self.stories.link_story(story, older, j);
            }
        }
        older
    }

    fn attach_tracker(&mut self, reader: TxnId, story: StoryId) {
        let tracker = self.trackers.insert(ReadTracker { reader, story });
        self.stories[story].readers.push_front(tracker);
        self.txns[reader].read_set.push_front(tracker);
    }

    /// In-progress transactions other than `except` that read `story`
    pub(crate) fn active_readers(&self, story: StoryId, except: TxnId) -> Vec<TxnId> {
        self.stories[story]
            .readers
            .iter()
            .map(|&t| self.trackers[t].reader)
            .filter(|&r| r != except)
            .filter(|&r| self.txns.get(r).map(|t| t.status) == Some(TxnStatus::InProgress))
            .collect()
    }

    /// Free every tracker attached to `story`
    pub(crate) fn detach_readers(&mut self, story: StoryId) {
        let readers = std::mem::take(&mut self.stories[story].readers);
        for tracker in readers {
            if let Some(ReadTracker { reader, .. }) = self.trackers.remove(tracker) {
                if let Some(t) = self.txns.get_mut(reader) {
                    t.read_set.retain(|&x| x != tracker);
                }
            }
        }
    }

    /// Free every tracker and gap owned by `txn`
    pub(crate) fn release_read_set(&mut self, txn: TxnId) {
        let gaps = std::mem::take(&mut self.txns[txn].gap_set);
        for gap in gaps {
            if let Some(readers) = self.gaps.get_mut(&gap) {
                readers.retain(|r| *r != txn);
                if readers.is_empty() {
                    self.gaps.remove(&gap);
                }
            }
        }
        let read_set = std::mem::take(&mut self.txns[txn].read_set);
        for tracker in read_set {
            if let Some(ReadTracker { story, .. }) = self.trackers.remove(tracker) {
                if let Some(s) = self.stories.get(story) {
                    if s.readers.contains(&tracker) {
                        self.stories[story].readers.retain(|&x| x != tracker);
                    }
                }
            }
        }
    }
}
