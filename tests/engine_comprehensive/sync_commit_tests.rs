//! Synchronous commit tests
//!
//! Transactions touching a synchronous space are written, stay prepared and
//! are parked in the commit queue until replicas acknowledge them.

use crate::test_utils::*;

fn setup() -> (TxManager, SpaceId, SpaceId) {
    let mut mgr = TxManager::new(TxManagerConfig::for_testing()).unwrap();
    let sync = mgr
        .create_space(users_space(SpaceDef::new(600, "ledger").sync()))
        .unwrap();
    let plain = mgr
        .create_space(users_space(SpaceDef::new(601, "cache")))
        .unwrap();
    (mgr, sync, plain)
}

#[test]
fn test_quorum_confirms_in_order() {
    let (mut mgr, space, _) = setup();
    let mut journal = MemoryJournal::new();
    let mut queue = CommitQueue::new(1, 2);

    let mut pending = Vec::new();
    for id in 1..=3u64 {
        let txn = mgr.begin();
        write(&mut mgr, txn, space, None, Some(&user(id, &format!("{}@x", id))), DupMode::Insert)
            .unwrap();
        match mgr.commit_with(txn, &mut journal, &mut queue).unwrap() {
            CommitOutcome::Pending { token } => pending.push((txn, token)),
            other => panic!("expected a pending commit, got {:?}", other),
        }
        assert_eq!(mgr.status(txn), Some(TxnStatus::Prepared));
    }
    // prepared versions are already what a fresh reader sees
    assert_eq!(contents(&mut mgr, space).len(), 3);

    // replica 2 has the first two entries
    queue.ack(2, 2);
    let done = queue.take_completed();
    assert_eq!(done.len(), 2);
    for (token, _, state) in done {
        let (txn, _) = pending
            .iter()
            .find(|(_, t)| *t == token)
            .copied()
            .unwrap();
        assert_eq!(state, LimboState::Confirmed);
        mgr.complete_pending(txn, state).unwrap();
        assert_eq!(mgr.status(txn), None);
    }

    let (last, token) = pending[2];
    assert_eq!(queue.state(token), Some(LimboState::Pending));
    assert!(matches!(
        mgr.complete_pending(last, LimboState::Pending),
        Err(Error::InvalidOperation(_))
    ));
    queue.ack(2, 3);
    assert_eq!(queue.state(token), Some(LimboState::Confirmed));
    mgr.complete_pending(last, LimboState::Confirmed).unwrap();
    assert_eq!(mgr.stats().transactions, 0);
}

#[test]
fn test_queue_rollback_cascades() {
    let (mut mgr, space, _) = setup();
    let mut journal = MemoryJournal::new();
    let mut queue = CommitQueue::new(1, 2);

    let mut pending = Vec::new();
    for id in 1..=2u64 {
        let txn = mgr.begin();
        write(&mut mgr, txn, space, None, Some(&user(id, &format!("{}@x", id))), DupMode::Insert)
            .unwrap();
        let CommitOutcome::Pending { token } =
            mgr.commit_with(txn, &mut journal, &mut queue).unwrap()
        else {
            panic!("expected a pending commit");
        };
        pending.push((txn, token));
    }

    // rolling back the older entry takes the newer one with it
    queue.rollback(pending[0].1);
    let done = queue.take_completed();
    assert_eq!(done.len(), 2);
    for (token, _, state) in done {
        assert_eq!(state, LimboState::RolledBack);
        let (txn, _) = pending.iter().find(|(_, t)| *t == token).copied().unwrap();
        assert_eq!(mgr.complete_pending(txn, state), Err(Error::SyncRollback));
    }
    assert!(contents(&mut mgr, space).is_empty());
    assert_eq!(mgr.stats().stories, 0);
}

#[test]
fn test_async_space_skips_the_queue() {
    let (mut mgr, _, plain) = setup();
    let mut journal = MemoryJournal::new();
    let mut queue = CommitQueue::new(1, 3);

    let txn = mgr.begin();
    write(&mut mgr, txn, plain, None, Some(&user(1, "a@x")), DupMode::Insert).unwrap();
    let outcome = mgr.commit_with(txn, &mut journal, &mut queue).unwrap();
    assert_eq!(outcome, CommitOutcome::Committed { signature: 1 });
    assert!(queue.is_empty());
}

#[test]
fn test_mixed_transaction_waits() {
    let (mut mgr, sync, plain) = setup();
    let mut journal = MemoryJournal::new();
    let mut queue = CommitQueue::new(1, 1);

    let txn = mgr.begin();
    write(&mut mgr, txn, plain, None, Some(&user(1, "a@x")), DupMode::Insert).unwrap();
    write(&mut mgr, txn, sync, None, Some(&user(1, "a@x")), DupMode::Insert).unwrap();
    let outcome = mgr.commit_with(txn, &mut journal, &mut queue).unwrap();

    // a quorum of one is reached by the local write itself
    let CommitOutcome::Pending { token } = outcome else {
        panic!("expected a pending commit, got {:?}", outcome);
    };
    assert_eq!(queue.state(token), Some(LimboState::Confirmed));
    mgr.complete_pending(txn, LimboState::Confirmed).unwrap();
    assert_eq!(contents(&mut mgr, sync).len(), 1);
    assert_eq!(contents(&mut mgr, plain).len(), 1);
}
