//! Story garbage collector
//!
//! An incremental crawler over the story arena. Each step inspects one
//! slot and reclaims the story there if nothing can observe it any more:
//!
//! - no statement adds or deletes it, and no transaction has read it
//! - its `add_psn` and `del_psn` are both 0 or below the oldest read view
//!   (or below `last_psn` when there is no read view)
//! - nothing below it in any index is still a story
//!
//! Chains are therefore reclaimed bottom-up. A reclaimed chain top that
//! represents a committed delete is removed from the index for real.

use tracing::trace;

use crate::manager::TxManager;
use crate::story::{Older, StoryId};
use crate::transaction::Psn;

impl TxManager {
    /// Lowest psn a read view may still need
    pub(crate) fn lowest_read_view_psn(&self) -> Psn {
        self.read_view_txs
            .front()
            .map(|&t| self.txns[t].rv_psn)
            .unwrap_or(self.last_psn)
    }

    fn is_reclaimable(&self, story: StoryId, lowest: Psn) -> bool {
        let s = &self.stories[story];
        let below = |psn: Psn| psn == 0 || psn < lowest;
        s.add_stmt.is_none()
            && s.del_stmts.is_empty()
            && s.readers.is_empty()
            && below(s.add_psn)
            && below(s.del_psn)
            && s.links.iter().all(|link| !link.older.is_story())
    }

    /// Advance the crawler by one slot
    ///
    /// Returns `true` if a story was reclaimed. Reaching the end of the
    /// arena wraps the cursor and counts as a step.
    pub fn gc_step(&mut self) -> bool {
        if self.gc_cursor >= self.stories.capacity() {
            self.gc_cursor = 0;
            return false;
        }
        let slot = self.gc_cursor;
        self.gc_cursor += 1;
        let Some(story) = self.stories.id_at(slot) else {
            return false;
        };
        let lowest = self.lowest_read_view_psn();
        if !self.is_reclaimable(story, lowest) {
            return false;
        }
        self.reclaim(story);
        true
    }

    fn reclaim(&mut self, story: StoryId) {
        let (space, tuple, del_psn, index_count) = {
            let s = &self.stories[story];
            (s.space, s.tuple.clone(), s.del_psn, s.index_count())
        };
        for i in 0..index_count {
            match self.stories[story].links[i].newer {
                None => {
                    if del_psn > 0 {
                        self.restore_index(space, i, Some(&tuple), None);
                    }
                    self.stories.unlink(story, i);
                }
                Some(newer) => {
                    let older = self.stories.unlink(story, i);
                    self.stories.unlink(newer, i);
                    debug_assert!(!older.is_story());
                    self.stories[newer].links[i].older = match older {
                        Older::Story(_) => Older::None,
                        other => other,
                    };
                }
            }
        }
        trace!(
            space_id = space.0,
            tuple = %tuple.id(),
            add_psn = self.stories[story].add_psn,
            del_psn,
            "story reclaimed"
        );
        self.delete_story(story);
    }

    /// Run the crawler until a full pass reclaims nothing
    ///
    /// Returns the number of stories reclaimed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut total = 0;
        loop {
            self.gc_cursor = 0;
            let mut reclaimed = 0;
            while self.gc_cursor < self.stories.capacity() {
                if self.gc_step() {
                    reclaimed += 1;
                }
            }
            self.gc_cursor = 0;
            total += reclaimed;
            if reclaimed == 0 {
                return total;
            }
        }
    }
}
