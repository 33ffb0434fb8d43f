//! Test utilities for the engine comprehensive tests
//!
//! Provides helpers for creating managers, writing through statements and
//! reading back committed contents.

#![allow(dead_code)]

use std::collections::BTreeMap;

pub use strata_mvcc::{
    tuple, CommitOutcome, CommitQueue, DupMode, Error, Field, Key, KeyDef, LimboState,
    MemoryJournal, Request, RequestType, Result, SharedTxManager, Space, SpaceDef, SpaceId,
    TreeIndex, Tuple, TxManager, TxManagerConfig, TxnId, TxnStatus,
};
use strata_mvcc::HashIndex;

// =============================================================================
// Manager Creation
// =============================================================================

/// Space with a tree primary key on field 0 and a hash key on field 1
pub fn users_space(def: SpaceDef) -> Space {
    Space::new(
        def,
        vec![
            TreeIndex::boxed("pk", KeyDef::field(0)),
            HashIndex::boxed("email", KeyDef::field(1)),
        ],
    )
    .expect("valid space")
}

/// Manager with one asynchronous users space
pub fn create_manager(config: TxManagerConfig) -> (TxManager, SpaceId) {
    let mut mgr = TxManager::new(config).expect("valid config");
    let space = mgr
        .create_space(users_space(SpaceDef::new(512, "users")))
        .expect("fresh space");
    (mgr, space)
}

/// A user tuple
pub fn user(id: u64, email: &str) -> Tuple {
    tuple![id, email]
}

// =============================================================================
// Statement Helpers
// =============================================================================

/// Run one change as a full statement, rolling the statement back on error
pub fn write(
    mgr: &mut TxManager,
    txn: TxnId,
    space: SpaceId,
    old: Option<&Tuple>,
    new: Option<&Tuple>,
    mode: DupMode,
) -> Result<Option<Tuple>> {
    let stmt = mgr.begin_statement(txn, Some(space))?;
    match mgr.apply(stmt, old, new, mode) {
        Ok(replaced) => {
            let request = match (new, mode) {
                (None, _) => RequestType::Delete,
                (Some(_), DupMode::Insert) => RequestType::Insert,
                _ => RequestType::Replace,
            };
            mgr.commit_statement(stmt, Request::local(request))?;
            Ok(replaced)
        }
        Err(e) => {
            mgr.rollback_statement(stmt)?;
            Err(e)
        }
    }
}

/// Delete the version of `id` visible to `txn`, if any
pub fn delete(mgr: &mut TxManager, txn: TxnId, space: SpaceId, id: u64) -> Result<Option<Tuple>> {
    match mgr.get(Some(txn), space, 0, &Key::from(id))? {
        Some(old) => write(mgr, txn, space, Some(&old), None, DupMode::Insert),
        None => Ok(None),
    }
}

// =============================================================================
// Assertions
// =============================================================================

/// Committed contents of a users space as `id -> email`
pub fn contents(mgr: &mut TxManager, space: SpaceId) -> BTreeMap<u64, String> {
    visible(mgr, None, space)
}

/// What `txn` sees in a users space
pub fn visible(mgr: &mut TxManager, txn: Option<TxnId>, space: SpaceId) -> BTreeMap<u64, String> {
    as_map(&mgr.select_all(txn, space, 0).expect("space exists"))
}

/// Users tuples as `id -> email`
pub fn as_map(tuples: &[Tuple]) -> BTreeMap<u64, String> {
    tuples
        .iter()
        .map(|t| match (t.field(0), t.field(1)) {
            (Some(Field::Unsigned(id)), Some(Field::Str(email))) => (*id, email.clone()),
            _ => panic!("unexpected tuple {:?}", t),
        })
        .collect()
}
