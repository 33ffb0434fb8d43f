//! Journal replay tests
//!
//! A primary commits a seeded random workload through the journal. Decoding
//! the journal and replaying it on a second manager as applier rows must
//! reproduce the primary's committed contents.

use crate::test_utils::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_mvcc::{Journal, JournalEntry};

const SEED: u64 = 0x5EED_0F_1057;

fn run_workload(mgr: &mut TxManager, space: SpaceId, journal: &mut MemoryJournal, txns: usize) {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut queue = CommitQueue::new(1, 1);
    let mut serial = 0u64;

    for _ in 0..txns {
        let txn = mgr.begin();
        for _ in 0..rng.gen_range(1..5) {
            let id = rng.gen_range(0..16u64);
            serial += 1;
            let email = format!("user{}@example.com", serial);
            // failed statements are rolled back and simply skipped
            let _ = match rng.gen_range(0..3) {
                0 => write(mgr, txn, space, None, Some(&user(id, &email)), DupMode::Insert),
                1 => write(mgr, txn, space, None, Some(&user(id, &email)), DupMode::ReplaceOrInsert),
                _ => delete(mgr, txn, space, id),
            };
        }
        if rng.gen_bool(0.8) {
            mgr.commit_with(txn, journal, &mut queue).unwrap();
        } else {
            mgr.rollback(txn);
        }
    }
}

fn replay(replica: &mut TxManager, entries: &[JournalEntry]) {
    let mut journal = MemoryJournal::new();
    let mut queue = CommitQueue::new(2, 1);
    for entry in entries {
        let txn = replica.begin();
        for row in &entry.rows {
            if row.request_type == RequestType::Nop {
                continue;
            }
            let space = row.space_id.expect("data rows name their space");
            let new = row.new_tuple.as_deref().map(Tuple::decode).transpose().unwrap();
            let old = match (&new, row.old_tuple.as_deref()) {
                (None, Some(bytes)) => {
                    let key = KeyDef::field(0).extract(&Tuple::decode(bytes).unwrap());
                    replica.get(Some(txn), space, 0, &key).unwrap()
                }
                _ => None,
            };
            let stmt = replica.begin_statement(txn, Some(space)).unwrap();
            replica
                .apply(stmt, old.as_ref(), new.as_ref(), DupMode::ReplaceOrInsert)
                .unwrap();
            replica
                .commit_statement(stmt, Request::applier(row.request_type, 1, row.lsn))
                .unwrap();
        }
        replica.commit_with(txn, &mut journal, &mut queue).unwrap();
    }
}

#[test]
fn test_replay_reproduces_committed_state() {
    let (mut primary, space) = create_manager(TxManagerConfig::default());
    let mut journal = MemoryJournal::new();
    run_workload(&mut primary, space, &mut journal, 60);

    let entries = journal.read_all().unwrap();
    assert_eq!(entries.len(), journal.len());

    let (mut replica, replica_space) = create_manager(TxManagerConfig::default());
    assert_eq!(replica_space, space);
    replay(&mut replica, &entries);

    assert_eq!(contents(&mut replica, space), contents(&mut primary, space));
    primary.check_chains().unwrap();
    replica.check_chains().unwrap();
}

#[test]
fn test_journal_lsns_are_dense() {
    let (mut primary, space) = create_manager(TxManagerConfig::default());
    let mut journal = MemoryJournal::new();
    run_workload(&mut primary, space, &mut journal, 40);

    let lsns: Vec<i64> = journal
        .read_all()
        .unwrap()
        .iter()
        .flat_map(|e| e.rows.iter().map(|r| r.lsn))
        .collect();
    let expected: Vec<i64> = (1..=lsns.len() as i64).collect();
    assert_eq!(lsns, expected);
    assert_eq!(journal.last_lsn(), lsns.len() as i64);
}

#[test]
fn test_replayed_rows_keep_their_origin() {
    let (mut primary, space) = create_manager(TxManagerConfig::default());
    let mut journal = MemoryJournal::new();
    let mut queue = CommitQueue::new(1, 1);
    let txn = primary.begin();
    write(&mut primary, txn, space, None, Some(&user(1, "a@x")), DupMode::Insert).unwrap();
    primary.commit_with(txn, &mut journal, &mut queue).unwrap();

    let (mut replica, _) = create_manager(TxManagerConfig::default());
    let entries = journal.read_all().unwrap();
    let txn = replica.begin();
    let row = &entries[0].rows[0];
    let stmt = replica.begin_statement(txn, Some(space)).unwrap();
    let t = Tuple::decode(row.new_tuple.as_deref().unwrap()).unwrap();
    replica.apply(stmt, None, Some(&t), DupMode::Insert).unwrap();
    replica
        .commit_statement(stmt, Request::applier(row.request_type, 1, row.lsn))
        .unwrap();

    let mut replica_journal = MemoryJournal::new();
    let outcome = replica.commit_with(txn, &mut replica_journal, &mut queue).unwrap();
    // an entry made only of applier rows is signed with their lsn
    assert_eq!(outcome, CommitOutcome::Committed { signature: row.lsn });
    let written = replica_journal.read_all().unwrap();
    assert_eq!(written[0].rows[0].replica_id, 1);
    assert_eq!(replica_journal.last_lsn(), 0);
}

#[test]
fn test_failed_write_leaves_no_trace() {
    let (mut mgr, space) = create_manager(TxManagerConfig::for_testing());
    let mut journal = MemoryJournal::new();
    let mut queue = CommitQueue::new(1, 1);
    journal.fail_next_writes(1);

    let txn = mgr.begin();
    write(&mut mgr, txn, space, None, Some(&user(1, "a@x")), DupMode::Insert).unwrap();
    let err = mgr.commit_with(txn, &mut journal, &mut queue).unwrap_err();
    assert!(matches!(err, Error::WalIo(_)));
    assert!(journal.is_empty());
    assert!(contents(&mut mgr, space).is_empty());
    assert_eq!(mgr.stats().stories, 0);

    // the journal recovers and the next attempt goes through
    let txn = mgr.begin();
    write(&mut mgr, txn, space, None, Some(&user(1, "a@x")), DupMode::Insert).unwrap();
    let outcome = mgr.commit_with(txn, &mut journal as &mut dyn Journal, &mut queue).unwrap();
    assert_eq!(outcome, CommitOutcome::Committed { signature: 1 });
}
