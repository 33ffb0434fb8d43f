//! Visibility and the read path
//!
//! A transaction walks a chain from the top, asking of each story whether
//! it is visible. The first visible story decides what the transaction sees
//! (the story's tuple, or nothing if the visible event is a delete). A
//! transaction in a read view ignores anything prepared at or after its
//! `rv_psn`.

use smallvec::SmallVec;
use strata_core::{Error, Key, Result, SpaceId, Tuple};

use crate::manager::TxManager;
use crate::statement::StmtId;
use crate::story::{Older, StoryId};
use crate::transaction::{Psn, TxnId, TxnStatus};

/// Transactions whose commit would change what a chain walk saw
pub(crate) type Conflicts = SmallVec<[TxnId; 4]>;

/// Result of a visibility check on one story
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Visible {
    /// Tuple seen, `None` when the visible event is a delete
    pub tuple: Option<Tuple>,
    /// The event was made by the asking transaction itself
    pub own: bool,
}

impl TxManager {
    fn read_view_psn(&self, txn: Option<TxnId>) -> Psn {
        txn.and_then(|t| self.txns.get(t))
            .map(|t| t.rv_psn)
            .filter(|&psn| psn != 0)
            .unwrap_or(Psn::MAX)
    }

    fn stmt_of(&self, stmt: StmtId, txn: Option<TxnId>) -> bool {
        txn.is_some() && Some(self.stmts[stmt].txn) == txn
    }

    /// Whether `story` is visible to `txn`; `None` if it must be skipped
    ///
    /// With `prepared_ok`, changes of prepared but not yet committed
    /// transactions count as visible.
    pub(crate) fn is_visible(
        &self,
        story: StoryId,
        txn: Option<TxnId>,
        prepared_ok: bool,
    ) -> Option<Visible> {
        let rv_psn = self.read_view_psn(txn);
        let s = &self.stories[story];

        if s.del_stmts.iter().any(|&d| self.stmt_of(d, txn)) {
            return Some(Visible {
                tuple: None,
                own: true,
            });
        }
        if prepared_ok && s.del_psn != 0 && s.del_psn < rv_psn {
            return Some(Visible {
                tuple: None,
                own: false,
            });
        }
        if s.del_psn != 0 && s.del_stmts.is_empty() && s.del_psn < rv_psn {
            return Some(Visible {
                tuple: None,
                own: false,
            });
        }

        let present = |own| {
            Some(Visible {
                tuple: Some(s.tuple.clone()),
                own,
            })
        };
        if let Some(add) = s.add_stmt {
            if self.stmt_of(add, txn) {
                return present(true);
            }
        }
        if prepared_ok && s.add_psn != 0 && s.add_psn < rv_psn {
            return present(false);
        }
        if s.add_psn != 0 && s.add_stmt.is_none() && s.add_psn < rv_psn {
            return present(false);
        }
        if s.is_ancient() {
            return present(false);
        }
        None
    }

    /// Whether some story above `story` in the primary chain was added by `txn`
    fn overwritten_by(&self, story: StoryId, txn: TxnId) -> bool {
        let mut cur = story;
        while let Some(newer) = self.stories[cur].links[0].newer {
            if let Some(add) = self.stories[newer].add_stmt {
                if self.stmts[add].txn == txn {
                    return true;
                }
            }
            cur = newer;
        }
        false
    }

    /// Walk below `story` in `index` to the first version visible to `stmt`
    ///
    /// Creators of skipped stories whose commit would change the answer are
    /// pushed to `conflicts`.
    pub(crate) fn find_visible(
        &self,
        stmt: StmtId,
        story: StoryId,
        index: usize,
        conflicts: &mut Conflicts,
    ) -> Option<Tuple> {
        let txn = self.stmts[stmt].txn;
        let requires_old_tuple = self.stmts[stmt].requires_old_tuple;
        let mut cur = story;
        loop {
            cur = match &self.stories[cur].links[index].older {
                Older::None => return None,
                Older::Tuple(tuple) => return Some(tuple.clone()),
                Older::Story(older) => *older,
            };
            if let Some(visible) = self.is_visible(cur, Some(txn), true) {
                return visible.tuple;
            }
            // Overwriting the skipped story in the primary index makes the
            // secondary-index skip harmless.
            let cross_conflict = requires_old_tuple
                || (index != 0 && !self.overwritten_by(cur, txn));
            if cross_conflict {
                if let Some(add) = self.stories[cur].add_stmt {
                    let creator = self.stmts[add].txn;
                    if !conflicts.contains(&creator) {
                        conflicts.push(creator);
                    }
                }
            }
        }
    }

    /// Resolve what `txn` sees in place of the raw index entry `tuple`
    ///
    /// A clean tuple is returned as is. For a dirty tuple the chain in
    /// `index` is walked to the first visible version. Unless the answer is
    /// the transaction's own change, the read is tracked, and every
    /// in-progress creator of a skipped version gets a conflict edge to
    /// `txn`.
    pub fn clarify(
        &mut self,
        txn: Option<TxnId>,
        space: SpaceId,
        tuple: &Tuple,
        index: usize,
    ) -> Result<Option<Tuple>> {
        if let Some(t) = txn {
            self.txn_ref(t)?;
        }
        let Some(top) = self.stories.find(tuple) else {
            self.track_read(txn, space, tuple)?;
            return Ok(Some(tuple.clone()));
        };

        let mut skipped: Conflicts = SmallVec::new();
        let mut cur = top;
        let visible = loop {
            if let Some(visible) = self.is_visible(cur, txn, true) {
                break visible;
            }
            if let (Some(reader), Some(add)) = (txn, self.stories[cur].add_stmt) {
                let creator = self.stmts[add].txn;
                let running = self.txns.get(creator).map(|t| t.status) == Some(TxnStatus::InProgress);
                if creator != reader && running && !skipped.contains(&creator) {
                    skipped.push(creator);
                }
            }
            match &self.stories[cur].links[index].older {
                Older::Story(older) => cur = *older,
                Older::Tuple(tuple) => {
                    break Visible {
                        tuple: Some(tuple.clone()),
                        own: false,
                    }
                }
                Older::None => {
                    break Visible {
                        tuple: None,
                        own: false,
                    }
                }
            }
        };

        if !visible.own {
            self.track_read(txn, space, tuple)?;
        }
        if let Some(reader) = txn {
            for creator in skipped {
                self.cause_conflict(creator, reader)?;
            }
        }
        Ok(visible.tuple)
    }

    /// Point lookup through `index` as seen by `txn`
    ///
    /// A key with no index entry at all is tracked as a gap, so a later
    /// insert of it conflicts with the reader.
    pub fn get(
        &mut self,
        txn: Option<TxnId>,
        space: SpaceId,
        index: usize,
        key: &Key,
    ) -> Result<Option<Tuple>> {
        let raw = {
            let s = self.space_ref(space)?;
            if index >= s.index_count() {
                return Err(Error::InvalidOperation(format!(
                    "space '{}' has no index {}",
                    s.name(),
                    index
                )));
            }
            s.get(index, key)
        };
        match raw {
            Some(tuple) => self.clarify(txn, space, &tuple, index),
            None => {
                if let Some(t) = txn {
                    self.txn_ref(t)?;
                }
                self.track_gap(txn, space, index, Some(key.clone()))?;
                Ok(None)
            }
        }
    }

    /// Every tuple of `index` visible to `txn`, in index order
    pub fn select_all(
        &mut self,
        txn: Option<TxnId>,
        space: SpaceId,
        index: usize,
    ) -> Result<Vec<Tuple>> {
        let raw = {
            let s = self.space_ref(space)?;
            if index >= s.index_count() {
                return Err(Error::InvalidOperation(format!(
                    "space '{}' has no index {}",
                    s.name(),
                    index
                )));
            }
            s.index(index).tuples()
        };
        if let Some(t) = txn {
            self.txn_ref(t)?;
        }
        // a scan also reads every key it did not find
        self.track_gap(txn, space, index, None)?;
        let mut out = Vec::with_capacity(raw.len());
        for tuple in raw {
            if let Some(visible) = self.clarify(txn, space, &tuple, index)? {
                out.push(visible);
            }
        }
        Ok(out)
    }
}
