//! Unique indexes keyed by extracted tuple keys
//!
//! Both indexes share one replace routine; they differ only in the map that
//! holds the slots.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use strata_core::{replace_check_dup, DupMode, Index, IndexError, Key, KeyDef, Tuple};

/// Minimal map surface needed by [`replace_slot`]
trait Slots {
    fn slot(&self, key: &Key) -> Option<&Tuple>;
    fn put(&mut self, key: Key, tuple: Tuple) -> Option<Tuple>;
    fn take(&mut self, key: &Key) -> Option<Tuple>;
}

impl Slots for BTreeMap<Key, Tuple> {
    fn slot(&self, key: &Key) -> Option<&Tuple> {
        self.get(key)
    }
    fn put(&mut self, key: Key, tuple: Tuple) -> Option<Tuple> {
        self.insert(key, tuple)
    }
    fn take(&mut self, key: &Key) -> Option<Tuple> {
        self.remove(key)
    }
}

impl Slots for FxHashMap<Key, Tuple> {
    fn slot(&self, key: &Key) -> Option<&Tuple> {
        self.get(key)
    }
    fn put(&mut self, key: Key, tuple: Tuple) -> Option<Tuple> {
        self.insert(key, tuple)
    }
    fn take(&mut self, key: &Key) -> Option<Tuple> {
        self.remove(key)
    }
}

fn replace_slot<S: Slots>(
    slots: &mut S,
    key_def: &KeyDef,
    old: Option<&Tuple>,
    new: Option<&Tuple>,
    mode: DupMode,
) -> Result<Option<Tuple>, IndexError> {
    let Some(new) = new else {
        return Ok(old.and_then(|old| slots.take(&key_def.extract(old))));
    };
    let key = key_def.extract(new);
    let dup = slots.slot(&key).cloned();
    if let Some(violation) = replace_check_dup(old, dup.as_ref(), mode) {
        return Err(IndexError::Dup(violation));
    }
    slots.put(key.clone(), new.clone());
    if dup.is_none() {
        // An update that changed the key leaves the old slot behind.
        if let Some(old) = old {
            let old_key = key_def.extract(old);
            if old_key != key && slots.slot(&old_key) == Some(old) {
                return Ok(slots.take(&old_key));
            }
        }
    }
    Ok(dup)
}

/// Ordered unique index
#[derive(Debug)]
pub struct TreeIndex {
    name: String,
    key_def: KeyDef,
    entries: BTreeMap<Key, Tuple>,
}

impl TreeIndex {
    /// Create an empty index
    pub fn new(name: impl Into<String>, key_def: KeyDef) -> Self {
        TreeIndex {
            name: name.into(),
            key_def,
            entries: BTreeMap::new(),
        }
    }

    /// Boxed for [`strata_core::Space::new`]
    pub fn boxed(name: impl Into<String>, key_def: KeyDef) -> Box<dyn Index> {
        Box::new(Self::new(name, key_def))
    }
}

impl Index for TreeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_def(&self) -> &KeyDef {
        &self.key_def
    }

    fn replace(
        &mut self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: DupMode,
    ) -> Result<Option<Tuple>, IndexError> {
        replace_slot(&mut self.entries, &self.key_def, old, new, mode)
    }

    fn get(&self, key: &Key) -> Option<Tuple> {
        self.entries.get(key).cloned()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn tuples(&self) -> Vec<Tuple> {
        self.entries.values().cloned().collect()
    }
}

/// Unordered unique index
#[derive(Debug)]
pub struct HashIndex {
    name: String,
    key_def: KeyDef,
    entries: FxHashMap<Key, Tuple>,
}

impl HashIndex {
    /// Create an empty index
    pub fn new(name: impl Into<String>, key_def: KeyDef) -> Self {
        HashIndex {
            name: name.into(),
            key_def,
            entries: FxHashMap::default(),
        }
    }

    /// Boxed for [`strata_core::Space::new`]
    pub fn boxed(name: impl Into<String>, key_def: KeyDef) -> Box<dyn Index> {
        Box::new(Self::new(name, key_def))
    }
}

impl Index for HashIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_def(&self) -> &KeyDef {
        &self.key_def
    }

    fn replace(
        &mut self,
        old: Option<&Tuple>,
        new: Option<&Tuple>,
        mode: DupMode,
    ) -> Result<Option<Tuple>, IndexError> {
        replace_slot(&mut self.entries, &self.key_def, old, new, mode)
    }

    fn get(&self, key: &Key) -> Option<Tuple> {
        self.entries.get(key).cloned()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn tuples(&self) -> Vec<Tuple> {
        self.entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{tuple, DupViolation};

    fn pk() -> TreeIndex {
        TreeIndex::new("pk", KeyDef::field(0))
    }

    #[test]
    fn test_insert_and_get() {
        let mut idx = pk();
        let t = tuple![1u64, "a"];
        assert_eq!(idx.replace(None, Some(&t), DupMode::Insert), Ok(None));
        assert_eq!(idx.get(&Key::from(1u64)), Some(t));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let mut idx = pk();
        let a = tuple![1u64, "a"];
        let b = tuple![1u64, "b"];
        idx.replace(None, Some(&a), DupMode::Insert).unwrap();
        assert_eq!(
            idx.replace(None, Some(&b), DupMode::Insert),
            Err(IndexError::Dup(DupViolation::TupleFound))
        );
        assert_eq!(idx.get(&Key::from(1u64)), Some(a));
    }

    #[test]
    fn test_replace_or_insert_returns_previous() {
        let mut idx = pk();
        let a = tuple![1u64, "a"];
        let b = tuple![1u64, "b"];
        idx.replace(None, Some(&a), DupMode::Insert).unwrap();
        let prev = idx
            .replace(None, Some(&b), DupMode::ReplaceOrInsert)
            .unwrap();
        assert_eq!(prev, Some(a));
        assert_eq!(idx.get(&Key::from(1u64)), Some(b));
    }

    #[test]
    fn test_delete_by_old() {
        let mut idx = pk();
        let a = tuple![1u64, "a"];
        idx.replace(None, Some(&a), DupMode::Insert).unwrap();
        let removed = idx.replace(Some(&a), None, DupMode::Insert).unwrap();
        assert_eq!(removed, Some(a));
        assert!(idx.is_empty());
    }

    #[test]
    fn test_restore_previous_occupant() {
        let mut idx = pk();
        let a = tuple![1u64, "a"];
        let b = tuple![1u64, "b"];
        idx.replace(None, Some(&a), DupMode::Insert).unwrap();
        idx.replace(None, Some(&b), DupMode::ReplaceOrInsert)
            .unwrap();
        let prev = idx.replace(Some(&b), Some(&a), DupMode::Insert).unwrap();
        assert_eq!(prev, Some(b));
        assert_eq!(idx.get(&Key::from(1u64)), Some(a));
    }

    #[test]
    fn test_key_change_clears_old_slot() {
        let mut idx = pk();
        let a = tuple![1u64, "a"];
        let b = tuple![2u64, "a"];
        idx.replace(None, Some(&a), DupMode::Insert).unwrap();
        let prev = idx.replace(Some(&a), Some(&b), DupMode::Replace);
        // Replace mode with no occupant under the new key
        assert_eq!(prev, Err(IndexError::Dup(DupViolation::TupleNotFound)));
        let prev = idx
            .replace(Some(&a), Some(&b), DupMode::ReplaceOrInsert)
            .unwrap();
        assert_eq!(prev, Some(a));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_tree_index_ordered() {
        let mut idx = pk();
        for k in [3u64, 1, 2] {
            idx.replace(None, Some(&tuple![k]), DupMode::Insert).unwrap();
        }
        let keys: Vec<_> = idx
            .tuples()
            .iter()
            .map(|t| t.field(0).cloned())
            .collect();
        assert_eq!(
            keys,
            vec![
                Some(1u64.into()),
                Some(2u64.into()),
                Some(3u64.into())
            ]
        );
    }

    #[test]
    fn test_hash_index_same_semantics() {
        let mut idx = HashIndex::new("sk", KeyDef::field(1));
        let a = tuple![1u64, "x"];
        let b = tuple![2u64, "x"];
        idx.replace(None, Some(&a), DupMode::Insert).unwrap();
        assert!(idx.replace(None, Some(&b), DupMode::Insert).is_err());
        assert_eq!(
            idx.replace(None, Some(&b), DupMode::ReplaceOrInsert)
                .unwrap(),
            Some(a)
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_mode() -> impl Strategy<Value = DupMode> {
            prop_oneof![
                Just(DupMode::Insert),
                Just(DupMode::Replace),
                Just(DupMode::ReplaceOrInsert),
            ]
        }

        proptest! {
            /// Ordered and hashed indexes accept and reject the same replaces
            #[test]
            fn prop_tree_and_hash_agree(
                ops in prop::collection::vec((0u64..8, 0u64..4, arb_mode(), any::<bool>()), 1..64)
            ) {
                let mut tree = TreeIndex::new("pk", KeyDef::field(0));
                let mut hash = HashIndex::new("pk", KeyDef::field(0));
                for (key, payload, mode, remove) in ops {
                    let current = tree.get(&Key::from(key));
                    let (old, new) = if remove {
                        (current, None)
                    } else {
                        (None, Some(tuple![key, payload]))
                    };
                    if old.is_none() && new.is_none() {
                        continue;
                    }
                    let a = tree.replace(old.as_ref(), new.as_ref(), mode);
                    let b = hash.replace(old.as_ref(), new.as_ref(), mode);
                    prop_assert_eq!(a, b);
                    prop_assert_eq!(tree.len(), hash.len());
                }
                let mut hashed = hash.tuples();
                hashed.sort_by_key(|t| t.field(0).cloned());
                prop_assert_eq!(tree.tuples(), hashed);
            }
        }
    }
}
