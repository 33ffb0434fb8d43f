//! Read view tests
//!
//! A reader whose reads were overwritten is moved into a read view and
//! keeps seeing exactly what it saw, however many writers commit after it.

use crate::test_utils::*;
use strata_mvcc::SnapshotCleaner;

fn load_users(mgr: &mut TxManager, space: SpaceId, count: u64) {
    for id in 0..count {
        mgr.load(space, user(id, &format!("u{}@x", id))).unwrap();
    }
}

fn commit_one(mgr: &mut TxManager, change: impl FnOnce(&mut TxManager, TxnId)) {
    let txn = mgr.begin();
    change(mgr, txn);
    mgr.commit(txn).unwrap();
}

#[test]
fn test_reader_picture_is_stable() {
    let (mut mgr, space) = create_manager(TxManagerConfig::default());
    load_users(&mut mgr, space, 10);

    let reader = mgr.begin();
    let picture = visible(&mut mgr, Some(reader), space);
    assert_eq!(picture.len(), 10);

    commit_one(&mut mgr, |mgr, txn| {
        write(mgr, txn, space, None, Some(&user(0, "first@x")), DupMode::Replace).unwrap();
    });
    assert_eq!(mgr.status(reader), Some(TxnStatus::InReadView));

    for id in 1..5 {
        commit_one(&mut mgr, |mgr, txn| {
            let email = format!("new{}@x", id);
            write(mgr, txn, space, None, Some(&user(id, &email)), DupMode::Replace).unwrap();
        });
    }
    for id in 5..8 {
        commit_one(&mut mgr, |mgr, txn| {
            delete(mgr, txn, space, id).unwrap();
        });
    }
    for id in 10..15 {
        commit_one(&mut mgr, |mgr, txn| {
            let email = format!("u{}@x", id);
            write(mgr, txn, space, None, Some(&user(id, &email)), DupMode::Insert).unwrap();
        });
    }

    assert_eq!(visible(&mut mgr, Some(reader), space), picture);
    let by_email = mgr.get(Some(reader), space, 1, &Key::from("u3@x")).unwrap();
    assert_eq!(by_email.and_then(|t| t.field(0).cloned()), Some(Field::from(3u64)));
    assert_ne!(contents(&mut mgr, space), picture);
    mgr.check_chains().unwrap();

    mgr.commit(reader).unwrap();
    let idle = mgr.begin();
    mgr.commit(idle).unwrap();
    mgr.collect_garbage();
    assert_eq!(mgr.stats().stories, 0);
    assert_eq!(contents(&mut mgr, space).len(), 12);
}

#[test]
fn test_read_view_outlives_collection() {
    let (mut mgr, space) = create_manager(TxManagerConfig::default());
    load_users(&mut mgr, space, 3);
    let reader = mgr.begin();
    let picture = visible(&mut mgr, Some(reader), space);

    for round in 0..20 {
        commit_one(&mut mgr, |mgr, txn| {
            let email = format!("r{}@x", round);
            write(mgr, txn, space, None, Some(&user(round % 3, &email)), DupMode::Replace).unwrap();
        });
        mgr.collect_garbage();
        assert_eq!(visible(&mut mgr, Some(reader), space), picture);
    }
    mgr.commit(reader).unwrap();
}

#[test]
fn test_snapshot_cleaner_sees_committed_only() {
    let (mut mgr, space) = create_manager(TxManagerConfig::for_testing());
    load_users(&mut mgr, space, 5);
    let committed = contents(&mut mgr, space);

    let txn = mgr.begin();
    write(&mut mgr, txn, space, None, Some(&user(1, "changed@x")), DupMode::Replace).unwrap();
    write(&mut mgr, txn, space, None, Some(&user(9, "added@x")), DupMode::Insert).unwrap();
    delete(&mut mgr, txn, space, 3).unwrap();

    let cleaner = SnapshotCleaner::create(&mgr, space).unwrap();
    let raw = mgr.space(space).unwrap().index(0).tuples();
    assert_eq!(raw.len(), 6);
    let clean: Vec<Tuple> = raw.iter().filter_map(|t| cleaner.clarify(t)).collect();
    assert_eq!(as_map(&clean), committed);

    mgr.rollback(txn);
}
