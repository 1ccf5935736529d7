//! Concurrent writers on one key, through one handle and through many.

mod support;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use sqlkv::{Store, UpsertMode};
use support::temp_db::{fast_retry, TempDb};

const WRITERS: usize = 8;
const ROUNDS: usize = 10;

fn value(writer: usize, round: usize) -> Vec<u8> {
    format!("w{writer}-r{round}").into_bytes()
}

fn hammer(stores: Vec<Arc<Store>>) {
    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let store = Arc::clone(&stores[writer % stores.len()]);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    store.put("contended", &value(writer, round)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer should not fail because of the race");
    }
}

fn assert_single_written_value(store: &Store) {
    let written: HashSet<Vec<u8>> = (0..WRITERS)
        .flat_map(|w| (0..ROUNDS).map(move |r| value(w, r)))
        .collect();
    let final_value = store.get("contended").unwrap().expect("key present");
    assert!(written.contains(&final_value));
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn native_upsert_under_contention() {
    let db = TempDb::create();
    let store = Arc::new(db.open_with("kv", UpsertMode::Auto));
    hammer(vec![Arc::clone(&store)]);
    assert_single_written_value(&store);
}

#[test]
fn fallback_upsert_under_contention() {
    let db = TempDb::create();
    let store = Arc::new(db.open_with("kv", UpsertMode::Fallback));
    hammer(vec![Arc::clone(&store)]);
    assert_single_written_value(&store);
}

#[test]
fn fallback_upsert_under_contention_with_tight_budget() {
    let db = TempDb::create();
    let config = db.config_with(UpsertMode::Fallback, fast_retry(2));
    let store = Arc::new(Store::open("kv", &config).unwrap());
    store.put("contended", b"seed").unwrap();
    hammer(vec![Arc::clone(&store)]);
    assert_single_written_value(&store);
}

#[test]
fn independent_handles_on_one_table() {
    let db = TempDb::create();
    let stores: Vec<_> = (0..4)
        .map(|_| Arc::new(db.open_with("kv", UpsertMode::Fallback)))
        .collect();
    hammer(stores.clone());
    for store in &stores {
        assert_single_written_value(store);
    }
}

#[test]
fn concurrent_pops_hand_out_each_value_once() {
    let db = TempDb::create();
    let store = Arc::new(db.open("kv"));
    for i in 0..20 {
        store.put(&format!("job-{i:02}"), b"payload").unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..20)
                    .filter(|i| store.pop(&format!("job-{i:02}")).unwrap().is_some())
                    .count()
            })
        })
        .collect();
    let popped: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(popped, 20);
    assert!(store.is_empty().unwrap());
}
