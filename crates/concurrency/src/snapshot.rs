//! Committed-only view of a space for checkpointing
//!
//! A checkpoint writer iterates a space's primary index while transactions
//! keep running. [`SnapshotCleaner`] is built once, up front, and maps each
//! dirty tuple to what a reader seeing only prepared and committed changes
//! would find in its place. Clean tuples pass through unchanged.

use rustc_hash::FxHashMap;
use strata_core::{Result, SpaceId, Tuple, TupleId};

use crate::manager::TxManager;
use crate::story::{Older, StoryId};

/// Map from dirty tuples to their committed counterparts
#[derive(Debug, Default)]
pub struct SnapshotCleaner {
    map: FxHashMap<TupleId, Option<Tuple>>,
}

impl SnapshotCleaner {
    /// Capture the committed state of every dirty tuple of `space`
    pub fn create(mgr: &TxManager, space: SpaceId) -> Result<Self> {
        mgr.space_ref(space)?;
        let mut map = FxHashMap::default();
        for story in mgr.stories.space_stories(space) {
            let tuple = &mgr.stories[story].tuple;
            let clean = committed_version(mgr, story);
            let unchanged = matches!(&clean, Some(clean) if Tuple::ptr_eq(clean, tuple));
            if !unchanged {
                map.insert(tuple.id(), clean);
            }
        }
        Ok(SnapshotCleaner { map })
    }

    /// What to write in place of `tuple`; `None` means skip it
    pub fn clarify(&self, tuple: &Tuple) -> Option<Tuple> {
        match self.map.get(&tuple.id()) {
            Some(clean) => clean.clone(),
            None => Some(tuple.clone()),
        }
    }

    /// Number of tuples that need replacing
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether every tuple passes through unchanged
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn committed_version(mgr: &TxManager, story: StoryId) -> Option<Tuple> {
    let mut cur = story;
    loop {
        if let Some(visible) = mgr.is_visible(cur, None, true) {
            return visible.tuple;
        }
        cur = match &mgr.stories[cur].links[0].older {
            Older::None => return None,
            Older::Tuple(tuple) => return Some(tuple.clone()),
            Older::Story(older) => *older,
        };
    }
}
