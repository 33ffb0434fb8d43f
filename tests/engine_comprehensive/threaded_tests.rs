//! Threaded tests
//!
//! Several threads share one manager through [`SharedTxManager`]. Each
//! transaction body runs under the lock, commits release it around the
//! journal write, so transactions genuinely interleave.

use crate::test_utils::*;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const USERS: u64 = 8;

fn shared_env() -> (SharedTxManager, SpaceId) {
    let shared = SharedTxManager::new(TxManagerConfig::default()).unwrap();
    let space = shared.with(|mgr| {
        let space = mgr
            .create_space(users_space(SpaceDef::new(512, "users")))
            .unwrap();
        for id in 0..USERS {
            mgr.load(space, user(id, &format!("u{}@x", id))).unwrap();
        }
        space
    });
    (shared, space)
}

/// Read one user and overwrite it, all under one lock
fn read_modify_write(shared: &SharedTxManager, space: SpaceId, id: u64, email: &str) -> Result<TxnId> {
    shared.with(|mgr| {
        let txn = mgr.begin();
        let body = mgr
            .get(Some(txn), space, 0, &Key::from(id))
            .and_then(|_| write(mgr, txn, space, None, Some(&user(id, email)), DupMode::Replace));
        match body {
            Ok(_) => Ok(txn),
            Err(e) => {
                mgr.rollback(txn);
                Err(e)
            }
        }
    })
}

#[test]
fn test_contended_read_modify_write() {
    let (shared, space) = shared_env();
    let journal = Arc::new(Mutex::new(MemoryJournal::new()));
    let queue = Arc::new(Mutex::new(CommitQueue::new(1, 1)));
    let committed = Arc::new(AtomicUsize::new(0));
    let aborted = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4u64)
        .map(|worker| {
            let shared = shared.clone();
            let journal = Arc::clone(&journal);
            let queue = Arc::clone(&queue);
            let committed = Arc::clone(&committed);
            let aborted = Arc::clone(&aborted);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(worker);
                barrier.wait();
                for i in 0..50 {
                    let id = rng.gen_range(0..USERS);
                    let email = format!("w{}-{}@x", worker, i);
                    let outcome = read_modify_write(&shared, space, id, &email)
                        .and_then(|txn| shared.commit_with(txn, &*journal, &*queue));
                    match outcome {
                        Ok(_) => committed.fetch_add(1, Ordering::Relaxed),
                        Err(Error::TransactionConflict) => aborted.fetch_add(1, Ordering::Relaxed),
                        Err(e) => panic!("unexpected error {:?}", e),
                    };
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let committed = committed.load(Ordering::Relaxed);
    assert_eq!(committed + aborted.load(Ordering::Relaxed), 200);
    assert_eq!(journal.lock().len(), committed);

    let mut mgr = shared.lock();
    let stats = mgr.stats();
    assert_eq!(stats.transactions, 0);
    assert_eq!(stats.conflict_edges, 0);
    assert_eq!(stats.read_trackers, 0);
    assert_eq!(contents(&mut mgr, space).len(), USERS as usize);
    mgr.check_chains().unwrap();
}

#[test]
fn test_reads_are_repeatable_under_load() {
    let (shared, space) = shared_env();
    let journal = Arc::new(Mutex::new(MemoryJournal::new()));
    let queue = Arc::new(Mutex::new(CommitQueue::new(1, 1)));
    let stop = Arc::new(AtomicUsize::new(0));

    let writers: Vec<_> = (0..2u64)
        .map(|worker| {
            let shared = shared.clone();
            let journal = Arc::clone(&journal);
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + worker);
                for i in 0..100 {
                    let id = rng.gen_range(0..USERS);
                    let email = format!("w{}-{}@x", worker, i);
                    if let Ok(txn) = read_modify_write(&shared, space, id, &email) {
                        let _ = shared.commit_with(txn, &*journal, &*queue);
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let shared = shared.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while stop.load(Ordering::Relaxed) == 0 {
                    let txn = shared.with(|mgr| mgr.begin());
                    let first = shared.with(|mgr| visible(mgr, Some(txn), space));
                    thread::yield_now();
                    let second = shared.with(|mgr| visible(mgr, Some(txn), space));
                    assert_eq!(first, second);
                    assert_eq!(first.len(), USERS as usize);
                    shared.with(|mgr| mgr.commit(txn)).unwrap();
                }
            })
        })
        .collect();

    for handle in writers {
        handle.join().unwrap();
    }
    stop.store(1, Ordering::Relaxed);
    for handle in readers {
        handle.join().unwrap();
    }

    let mut mgr = shared.lock();
    assert_eq!(mgr.stats().transactions, 0);
    mgr.collect_garbage();
    mgr.check_chains().unwrap();
}
