//! Stories and the story table
//!
//! A [`Story`] is one version of a tuple: who added it, who is deleting it,
//! and which transactions have looked at it. Stories of tuples sharing a key
//! form one chain per index, newest at the top. The top story's tuple is the
//! one physically present in the index.
//!
//! The [`StoryTable`] owns every story and maps a tuple's identity to its
//! story. A tuple is *dirty* exactly when it has an entry here.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::ops;
use strata_core::{SpaceId, Tuple, TupleId};

use crate::arena::{Arena, Id};
use crate::read_set::TrackerId;
use crate::statement::StmtId;
use crate::transaction::Psn;

/// Handle to a story
pub type StoryId = Id<Story>;

/// What lies beneath a story in one index
#[derive(Debug, Clone, Default)]
pub enum Older {
    /// Nothing; the story's tuple was the first with its key
    #[default]
    None,
    /// A clean tuple with no story of its own
    Tuple(Tuple),
    /// Another story
    Story(StoryId),
}

impl Older {
    /// The older story, if the link points at one
    pub fn story(&self) -> Option<StoryId> {
        match self {
            Older::Story(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether the link points at a story
    pub fn is_story(&self) -> bool {
        matches!(self, Older::Story(_))
    }
}

/// Per-index position of a story in its chain
#[derive(Debug, Clone, Default)]
pub struct StoryLink {
    /// Story directly above, `None` at the top of the chain
    pub newer: Option<StoryId>,
    /// Entity directly below
    pub older: Older,
}

/// One version of a tuple
#[derive(Debug)]
pub struct Story {
    pub(crate) space: SpaceId,
    pub(crate) tuple: Tuple,
    pub(crate) add_stmt: Option<StmtId>,
    pub(crate) add_psn: Psn,
    /// Statements racing to delete this version, latest first
    pub(crate) del_stmts: SmallVec<[StmtId; 2]>,
    pub(crate) del_psn: Psn,
    pub(crate) readers: VecDeque<TrackerId>,
    pub(crate) links: SmallVec<[StoryLink; 4]>,
}

impl Story {
    fn new(space: SpaceId, tuple: Tuple, index_count: usize) -> Self {
        Story {
            space,
            tuple,
            add_stmt: None,
            add_psn: 0,
            del_stmts: SmallVec::new(),
            del_psn: 0,
            readers: VecDeque::new(),
            links: (0..index_count).map(|_| StoryLink::default()).collect(),
        }
    }

    /// Owning space
    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// The version's tuple
    pub fn tuple(&self) -> &Tuple {
        &self.tuple
    }

    /// Psn of the transaction that added the tuple, 0 if not prepared
    pub fn add_psn(&self) -> Psn {
        self.add_psn
    }

    /// Psn of the transaction that deleted the tuple, 0 if not prepared
    pub fn del_psn(&self) -> Psn {
        self.del_psn
    }

    /// Whether an unfinished statement added this version
    pub fn has_add_stmt(&self) -> bool {
        self.add_stmt.is_some()
    }

    /// Number of unfinished statements deleting this version
    pub fn del_stmt_count(&self) -> usize {
        self.del_stmts.len()
    }

    /// Number of transactions tracking a read of this version
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    /// Number of indexes of the owning space
    pub fn index_count(&self) -> usize {
        self.links.len()
    }

    /// Chain position in index `index`
    pub fn link(&self, index: usize) -> &StoryLink {
        &self.links[index]
    }

    /// Predates any transaction bookkeeping
    pub fn is_ancient(&self) -> bool {
        self.add_psn == 0 && self.add_stmt.is_none()
    }

    /// Fixed in history: prepared, committed or ancient
    pub(crate) fn is_prepared(&self) -> bool {
        self.del_psn != 0 || self.add_psn != 0 || self.add_stmt.is_none()
    }
}

/// Every live story, indexed by tuple identity and by space
#[derive(Default)]
pub struct StoryTable {
    stories: Arena<Story>,
    by_tuple: FxHashMap<TupleId, StoryId>,
    by_space: FxHashMap<SpaceId, FxHashSet<StoryId>>,
}

impl StoryTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live stories
    pub fn len(&self) -> usize {
        self.stories.len()
    }

    /// Whether no story is live
    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    /// Number of arena slots; bounds the GC cursor
    pub(crate) fn capacity(&self) -> usize {
        self.stories.capacity()
    }

    /// Live story at arena slot `slot`
    pub(crate) fn id_at(&self, slot: usize) -> Option<StoryId> {
        self.stories.id_at(slot)
    }

    /// Look up a story
    pub fn get(&self, id: StoryId) -> Option<&Story> {
        self.stories.get(id)
    }

    /// Iterate all stories
    pub fn iter(&self) -> impl Iterator<Item = (StoryId, &Story)> {
        self.stories.iter()
    }

    /// Story of a dirty tuple
    pub fn find(&self, tuple: &Tuple) -> Option<StoryId> {
        self.by_tuple.get(&tuple.id()).copied()
    }

    /// Whether the tuple currently has a story
    pub fn is_dirty(&self, tuple: &Tuple) -> bool {
        self.by_tuple.contains_key(&tuple.id())
    }

    /// Stories of one space
    pub fn space_stories(&self, space: SpaceId) -> Vec<StoryId> {
        self.by_space
            .get(&space)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Register a fresh, unlinked story for a clean tuple
    pub(crate) fn insert(&mut self, space: SpaceId, tuple: &Tuple, index_count: usize) -> StoryId {
        debug_assert!(!self.is_dirty(tuple), "tuple {} already has a story", tuple.id());
        let id = self
            .stories
            .insert(Story::new(space, tuple.clone(), index_count));
        self.by_tuple.insert(tuple.id(), id);
        self.by_space.entry(space).or_default().insert(id);
        id
    }

    /// Drop a fully unlinked story; its tuple becomes clean
    pub(crate) fn remove(&mut self, id: StoryId) -> Option<Story> {
        let story = self.stories.remove(id)?;
        debug_assert!(story
            .links
            .iter()
            .all(|l| l.newer.is_none() && matches!(l.older, Older::None)));
        self.by_tuple.remove(&story.tuple.id());
        if let Some(set) = self.by_space.get_mut(&story.space) {
            set.remove(&id);
            if set.is_empty() {
                self.by_space.remove(&story.space);
            }
        }
        Some(story)
    }

    /// Put `older` beneath `story` in `index`, setting its back-pointer
    pub(crate) fn link_story(&mut self, story: StoryId, older: StoryId, index: usize) {
        debug_assert!(matches!(self.stories[story].links[index].older, Older::None));
        self.stories[story].links[index].older = Older::Story(older);
        self.stories[older].links[index].newer = Some(story);
    }

    /// Put a tuple beneath `story`; a dirty tuple is linked via its story
    pub(crate) fn link_tuple(&mut self, story: StoryId, older: Option<Tuple>, index: usize) {
        debug_assert!(matches!(self.stories[story].links[index].older, Older::None));
        let Some(tuple) = older else {
            return;
        };
        match self.find(&tuple) {
            Some(older_story) => self.link_story(story, older_story, index),
            None => self.stories[story].links[index].older = Older::Tuple(tuple),
        }
    }

    /// Re-attach a link previously returned by [`StoryTable::unlink`]
    pub(crate) fn link_older(&mut self, story: StoryId, older: Older, index: usize) {
        match older {
            Older::None => {}
            Older::Tuple(tuple) => self.link_tuple(story, Some(tuple), index),
            Older::Story(older_story) => self.link_story(story, older_story, index),
        }
    }

    /// Detach whatever lies beneath `story` in `index` and return it
    pub(crate) fn unlink(&mut self, story: StoryId, index: usize) -> Older {
        let older = std::mem::take(&mut self.stories[story].links[index].older);
        if let Older::Story(older_story) = older {
            self.stories[older_story].links[index].newer = None;
        }
        older
    }

    /// Tuple directly beneath `story` in `index`
    pub(crate) fn older_tuple(&self, story: StoryId, index: usize) -> Option<Tuple> {
        match &self.stories[story].links[index].older {
            Older::None => None,
            Older::Tuple(tuple) => Some(tuple.clone()),
            Older::Story(older) => Some(self.stories[*older].tuple.clone()),
        }
    }
}

impl ops::Index<StoryId> for StoryTable {
    type Output = Story;

    fn index(&self, id: StoryId) -> &Story {
        &self.stories[id]
    }
}

impl ops::IndexMut<StoryId> for StoryTable {
    fn index_mut(&mut self, id: StoryId) -> &mut Story {
        &mut self.stories[id]
    }
}
