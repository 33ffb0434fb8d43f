//! Version history: applying, preparing, committing and rolling back
//! statements
//!
//! `apply` puts the new tuple physically into every index and records the
//! displaced tuples as older versions. What the statement *logically*
//! replaced is found by walking each chain past versions its transaction
//! cannot see. Prepare later reorders chains so that prepared changes sit
//! beneath changes still in progress.

use smallvec::SmallVec;
use strata_core::{replace_check_dup, DupMode, DupViolation, Error, Result, SpaceId, Tuple};

use crate::manager::TxManager;
use crate::statement::StmtId;
use crate::story::{Older, StoryId};
use crate::transaction::{Psn, TxnId, TxnStatus};
use crate::visibility::Conflicts;

/// How far `apply` got, for unwinding
#[derive(Debug, Default)]
struct ApplyProgress {
    add_story: Option<StoryId>,
    /// Indexes already holding the new tuple
    linked: usize,
    del_story: Option<StoryId>,
    del_created: bool,
}

impl TxManager {
    /// Apply a change under an open statement
    ///
    /// Installs `new` (if any) in every index, then attaches the statement
    /// as a deleter of the version it replaced (or of `old` for a pure
    /// delete). Duplicate checks run against the version visible to the
    /// statement's transaction: `mode` on the primary index, `Insert` on
    /// secondary ones. An `Insert` also fails while another in-progress
    /// transaction holds an uncommitted tuple under the same primary key.
    ///
    /// Returns the replaced tuple as visible to the transaction. On error
    /// every index is restored and no story is left behind.
    pub fn apply(
        &mut self,
        stmt: StmtId,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: DupMode,
    ) -> Result<Option<Tuple>> {
        let (txn, space) = self.check_applicable(stmt, old, new)?;
        let requested = self.stmts[stmt].requires_old_tuple;
        if new.is_none() || mode != DupMode::ReplaceOrInsert {
            self.stmts[stmt].requires_old_tuple = true;
        }

        let mut progress = ApplyProgress::default();
        match self.apply_steps(stmt, txn, space, old, new, mode, &mut progress) {
            Ok(replaced) => Ok(replaced),
            Err(e) => {
                self.unwind_apply(stmt, space, progress);
                self.stmts[stmt].requires_old_tuple = requested;
                Err(e)
            }
        }
    }

    fn check_applicable(
        &self,
        stmt: StmtId,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
    ) -> Result<(TxnId, SpaceId)> {
        let s = self.stmts.get(stmt).ok_or(Error::NoSuchTransaction)?;
        let space = s
            .space
            .ok_or_else(|| Error::InvalidOperation("statement has no space".into()))?;
        if old.is_none() && new.is_none() {
            return Err(Error::InvalidOperation(
                "a change needs an old or a new tuple".into(),
            ));
        }
        if s.add_story.is_some()
            || s.del_story.is_some()
            || s.new_tuple.is_some()
            || s.old_tuple.is_some()
        {
            return Err(Error::InvalidOperation("statement was already applied".into()));
        }
        match self.txn_ref(s.txn)?.status {
            TxnStatus::InProgress | TxnStatus::InReadView => {}
            TxnStatus::Conflicted => return Err(Error::TransactionConflict),
            status => {
                return Err(Error::InvalidOperation(format!(
                    "cannot change data in a {} transaction",
                    status.as_str()
                )))
            }
        }
        if let Some(new) = new {
            if self.stories.is_dirty(new) {
                return Err(Error::InvalidOperation(
                    "tuple is already owned by a space".into(),
                ));
            }
        }
        Ok((s.txn, space))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_steps(
        &mut self,
        stmt: StmtId,
        txn: TxnId,
        space: SpaceId,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: DupMode,
        progress: &mut ApplyProgress,
    ) -> Result<Option<Tuple>> {
        let mut old = old.cloned();
        let mut conflicts: Conflicts = SmallVec::new();
        let index_count = self.space_ref(space)?.index_count();

        if let Some(new) = new {
            let add = self.create_story(space, new)?;
            self.stories[add].add_stmt = Some(stmt);
            self.stmts[stmt].add_story = Some(add);
            progress.add_story = Some(add);

            for i in 0..index_count {
                let replaced =
                    self.space_mut(space)?
                        .replace(i, None, Some(new), DupMode::ReplaceOrInsert)?;
                self.stories.link_tuple(add, replaced, i);
                progress.linked = i + 1;

                let visible = self.find_visible(stmt, add, i, &mut conflicts);
                let check = if i == 0 { mode } else { DupMode::Insert };
                if let Some(violation) = replace_check_dup(old.as_ref(), visible.as_ref(), check) {
                    return Err(self.space_ref(space)?.dup_error(i, violation));
                }
                if i == 0 {
                    if check == DupMode::Insert
                        && visible.is_none()
                        && self.pending_insert_below(add, txn)
                    {
                        return Err(self
                            .space_ref(space)?
                            .dup_error(0, DupViolation::TupleFound));
                    }
                    old = visible;
                }
            }
        }

        let (mut del_story, del_tuple) = match progress.add_story {
            Some(add) => match &self.stories[add].links[0].older {
                Older::Story(s) => (Some(*s), Some(self.stories[*s].tuple.clone())),
                Older::Tuple(t) => (None, Some(t.clone())),
                Older::None => (None, None),
            },
            None => (None, old.clone()),
        };
        if let (None, Some(tuple)) = (del_story, &del_tuple) {
            let dirty = self.stories.is_dirty(tuple);
            let story = self.find_or_create_story(space, tuple)?;
            if !dirty {
                progress.del_created = true;
                if let Some(add) = progress.add_story {
                    for i in 0..index_count {
                        let points_here =
                            matches!(&self.stories[add].links[i].older, Older::Tuple(t) if t == tuple);
                        if points_here {
                            self.stories.unlink(add, i);
                            self.stories.link_story(add, story, i);
                        }
                    }
                }
            }
            del_story = Some(story);
        }
        if let Some(story) = del_story {
            self.stories[story].del_stmts.insert(0, stmt);
            self.stmts[stmt].del_story = Some(story);
            progress.del_story = Some(story);
        }

        for breaker in conflicts {
            self.cause_conflict(breaker, txn)?;
        }
        if let Some(new) = new {
            for i in 0..index_count {
                let key = self.space_ref(space)?.index(i).key_def().extract(new);
                self.fill_gap(txn, space, i, &key);
            }
        }

        let s = &mut self.stmts[stmt];
        s.old_tuple = old.clone();
        s.new_tuple = new.cloned();
        Ok(old)
    }

    /// Whether an in-progress transaction other than `txn` has an
    /// uncommitted, undeleted tuple somewhere below `story` in the primary
    /// chain
    fn pending_insert_below(&self, story: StoryId, txn: TxnId) -> bool {
        let mut cur = story;
        while let Some(older) = self.stories[cur].links[0].older.story() {
            let s = &self.stories[older];
            if let Some(add) = s.add_stmt {
                let creator = self.stmts[add].txn;
                let deleted_by_creator = s.del_stmts.iter().any(|&d| self.stmts[d].txn == creator);
                if creator != txn && s.add_psn == 0 && !deleted_by_creator {
                    return true;
                }
            }
            cur = older;
        }
        false
    }

    fn unwind_apply(&mut self, stmt: StmtId, space: SpaceId, progress: ApplyProgress) {
        if let Some(add) = progress.add_story {
            let tuple = self.stories[add].tuple.clone();
            for i in (0..progress.linked).rev() {
                let was = self.stories.older_tuple(add, i);
                self.restore_index(space, i, Some(&tuple), was.as_ref());
                self.stories.unlink(add, i);
            }
            self.stories[add].add_stmt = None;
            self.stmts[stmt].add_story = None;
            self.delete_story(add);
        }
        if let Some(del) = progress.del_story {
            self.stories[del].del_stmts.retain(|d| *d != stmt);
            self.stmts[stmt].del_story = None;
            if progress.del_created {
                self.delete_story(del);
            }
        }
    }

    /// Undo a statement's effect on version chains and indexes
    pub(crate) fn rollback_stmt_history(&mut self, stmt: StmtId) {
        let (txn, add, del) = {
            let s = &self.stmts[stmt];
            (s.txn, s.add_story, s.del_story)
        };

        if let Some(story) = add {
            let space = self.stories[story].space;
            let tuple = self.stories[story].tuple.clone();
            self.hand_down_readers(story, txn);
            let heir = self.stories[story].links[0].older.story();
            for i in 0..self.stories[story].index_count() {
                match self.stories[story].links[i].newer {
                    None => {
                        let was = self.stories.older_tuple(story, i);
                        self.restore_index(space, i, Some(&tuple), was.as_ref());
                        self.stories.unlink(story, i);
                    }
                    Some(newer) => {
                        let older = self.stories.unlink(story, i);
                        self.stories.unlink(newer, i);
                        self.stories.link_older(newer, older, i);
                    }
                }
            }
            self.stories[story].add_stmt = None;
            self.stmts[stmt].add_story = None;
            self.retire_story(story, txn, heir);
        }

        if let Some(story) = del {
            let psn = self.txns.get(txn).map_or(0, |t| t.psn);
            self.stories[story].del_stmts.retain(|d| *d != stmt);
            self.stmts[stmt].del_story = None;
            if psn != 0 && self.stories[story].del_psn == psn {
                self.stories[story].del_psn = self.prepared_del_psn(story);
            }
            self.drop_if_unused(story);
        }
    }

    /// Earliest psn among prepared transactions still deleting `story`
    fn prepared_del_psn(&self, story: StoryId) -> Psn {
        self.stories[story]
            .del_stmts
            .iter()
            .filter_map(|&d| self.txns.get(self.stmts[d].txn))
            .map(|t| t.psn)
            .filter(|&psn| psn != 0)
            .min()
            .unwrap_or(0)
    }

    /// Make `stmt` delete `to` instead of its current target
    pub(crate) fn retarget_delete(&mut self, stmt: StmtId, to: Option<StoryId>) {
        let psn = self.txns.get(self.stmts[stmt].txn).map_or(0, |t| t.psn);
        if let Some(from) = self.stmts[stmt].del_story.take() {
            self.stories[from].del_stmts.retain(|d| *d != stmt);
            if psn != 0 && self.stories[from].del_psn == psn {
                self.stories[from].del_psn = self.prepared_del_psn(from);
            }
        }
        if let Some(to) = to {
            let s = &mut self.stories[to];
            s.del_stmts.insert(0, stmt);
            if psn != 0 && (s.del_psn == 0 || s.del_psn > psn) {
                s.del_psn = psn;
            }
        }
        self.stmts[stmt].del_story = to;
    }

    /// Free an ancient story that nothing refers to any more
    fn drop_if_unused(&mut self, story: StoryId) {
        let s = &self.stories[story];
        let unused = s.is_ancient()
            && s.del_psn == 0
            && s.del_stmts.is_empty()
            && s.readers.is_empty()
            && s
                .links
                .iter()
                .all(|l| l.newer.is_none() && matches!(l.older, Older::None));
        if unused {
            self.delete_story(story);
        }
    }

    /// Fix a statement's changes in history at its transaction's psn
    ///
    /// Unprepared stories of other transactions found directly beneath the
    /// added story are moved above it. Their writers are conflicted when
    /// their statement depended on the old tuple or the swap happens in a
    /// secondary index. Readers of every overwritten or deleted version are
    /// handled as conflict victims.
    pub(crate) fn prepare_stmt_history(&mut self, stmt: StmtId) {
        let txn = self.stmts[stmt].txn;
        let psn = self.txns[txn].psn;
        debug_assert!(psn != 0, "statement prepared outside of a prepared transaction");

        if let Some(story) = self.stmts[stmt].add_story {
            let space = self.stories[story].space;
            let index_count = self.stories[story].index_count();
            let mut i = 0;
            while i < index_count {
                let Some(old_story) = self.stories[story].links[i].older.story() else {
                    i += 1;
                    continue;
                };
                let old_add = match self.stories[old_story].add_stmt {
                    Some(add) if !self.stories[old_story].is_prepared() => add,
                    _ => {
                        for reader in self.active_readers(old_story, txn) {
                            self.handle_conflict(txn, reader);
                        }
                        i += 1;
                        continue;
                    }
                };
                let other = self.stmts[old_add].txn;
                if other == txn {
                    i += 1;
                    continue;
                }
                if self.stmts[old_add].requires_old_tuple || i != 0 {
                    self.mark_conflicted(other);
                }
                for reader in self.active_readers(old_story, txn) {
                    self.handle_conflict(txn, reader);
                }
                self.swap_with_older(space, story, old_story, i);
                if i == 0 {
                    self.relink_deletes(stmt, story, old_story);
                }
            }
            self.stories[story].add_psn = psn;
        }

        if let Some(del) = self.stmts[stmt].del_story {
            // Deleters that already prepared keep the earlier psn.
            let losers: SmallVec<[StmtId; 2]> = self.stories[del]
                .del_stmts
                .iter()
                .copied()
                .filter(|&d| {
                    let other = self.stmts[d].txn;
                    other != txn && self.txns.get(other).map_or(0, |t| t.psn) == 0
                })
                .collect();
            for d in losers {
                let other = self.stmts[d].txn;
                self.mark_conflicted(other);
                self.stmts[d].del_story = None;
                self.stories[del].del_stmts.retain(|x| *x != d);
            }
            for reader in self.active_readers(del, txn) {
                self.handle_conflict(txn, reader);
            }
            if self.stories[del].del_psn == 0 {
                self.stories[del].del_psn = psn;
            }
        }
    }

    /// Exchange `story` with the story directly beneath it in `index`
    fn swap_with_older(&mut self, space: SpaceId, story: StoryId, old_story: StoryId, index: usize) {
        let below = self.stories.unlink(old_story, index);
        self.stories.unlink(story, index);
        match self.stories[story].links[index].newer {
            None => {
                let top = self.stories[story].tuple.clone();
                let under = self.stories[old_story].tuple.clone();
                self.restore_index(space, index, Some(&top), Some(&under));
            }
            Some(newer) => {
                self.stories.unlink(newer, index);
                self.stories.link_story(newer, old_story, index);
            }
        }
        self.stories.link_older(story, below, index);
        self.stories.link_story(old_story, story, index);
    }

    /// Restore "every writer deletes the story directly beneath its own"
    /// after a primary-index swap
    ///
    /// Before the swap the chain read `N -> story -> old_story -> Y`, after it
    /// `N -> old_story -> story -> Y`. Our statement now deletes `Y`, the
    /// overtaken writer deletes `story`, and a writer of `N` follows its
    /// target down to `old_story`. Pure deletes keep their targets.
    fn relink_deletes(&mut self, stmt: StmtId, story: StoryId, old_story: StoryId) {
        let below = self.stories[story].links[0].older.story();
        self.retarget_delete(stmt, below);
        if let Some(other) = self.stories[old_story].add_stmt {
            self.retarget_delete(other, Some(story));
        }
        if let Some(newer) = self.stories[old_story].links[0].newer {
            if let Some(above) = self.stories[newer].add_stmt {
                if self.stmts[above].del_story == Some(story) {
                    self.retarget_delete(above, Some(old_story));
                }
            }
        }
    }

    /// Detach a committed statement from its stories
    pub(crate) fn commit_stmt_history(&mut self, stmt: StmtId) {
        if let Some(add) = self.stmts[stmt].add_story.take() {
            self.stories[add].add_stmt = None;
        }
        if let Some(del) = self.stmts[stmt].del_story.take() {
            self.stories[del].del_stmts.retain(|d| *d != stmt);
        }
    }
}
