//! Concurrency tests
//!
//! Many reader threads call `get` while one writer thread runs write sessions
//! and another thread compacts. Readers must never see bytes written for a
//! different key.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use merkle_datafiles::{AtomicLocationIndex, DataFileError, MemoryIndexDiskKeyValueStore};

use common::{key_of, payload, setup_temp_store, test_config};

const NUM_KEYS: u64 = 64;
const NUM_READERS: usize = 6;
const NUM_SESSIONS: u8 = 30;

#[test]
fn test_readers_never_see_wrong_key() {
    let (_temp, path) = setup_temp_store();
    let index = Arc::new(AtomicLocationIndex::with_capacity(NUM_KEYS as usize + 1));
    let store = MemoryIndexDiskKeyValueStore::open(test_config(), &path, "leaves", index).unwrap();
    store.update_valid_key_range(1, NUM_KEYS);

    let done = AtomicBool::new(false);
    let reads = AtomicUsize::new(0);
    let exhausted = AtomicUsize::new(0);

    crossbeam::scope(|s| {
        for reader_id in 0..NUM_READERS {
            let store = &store;
            let done = &done;
            let reads = &reads;
            let exhausted = &exhausted;
            s.spawn(move |_| {
                let mut key = 1 + reader_id as u64;
                while !done.load(Ordering::Acquire) {
                    match store.get(key) {
                        Ok(Some(value)) => {
                            assert_eq!(key_of(&value), key, "read bytes of another key");
                            assert_eq!(value.len(), 48);
                            reads.fetch_add(1, Ordering::Relaxed);
                        }
                        // not written yet
                        Ok(None) => {}
                        Err(DataFileError::ReadRetriesExhausted { .. }) => {
                            exhausted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => panic!("read of key {} failed: {}", key, e),
                    }
                    key = key % NUM_KEYS + 1;
                }
            });
        }

        // compactor
        {
            let store = &store;
            let done = &done;
            s.spawn(move |_| {
                while !done.load(Ordering::Acquire) {
                    common::compact(store.file_collection(), store.index().as_ref());
                    thread::sleep(Duration::from_millis(5));
                }
            });
        }

        // writer
        for version in 0..NUM_SESSIONS {
            store.start_writing().unwrap();
            for key in 1..=NUM_KEYS {
                store.put(key, &payload(key, version, 48)).unwrap();
            }
            store.end_writing(1, NUM_KEYS).unwrap();
        }
        done.store(true, Ordering::Release);
    })
    .unwrap();

    assert!(reads.load(Ordering::Relaxed) > 0);
    assert!(
        exhausted.load(Ordering::Relaxed) * 100 <= reads.load(Ordering::Relaxed),
        "too many reads gave up"
    );

    // every key ends at the last version, whatever the compactor moved
    for key in 1..=NUM_KEYS {
        let value = store.get(key).unwrap().unwrap();
        assert_eq!(value.as_ref(), payload(key, NUM_SESSIONS - 1, 48).as_slice());
    }
}

#[test]
fn test_concurrent_reads_of_one_session() {
    let (_temp, path) = setup_temp_store();
    let index = Arc::new(AtomicLocationIndex::with_capacity(NUM_KEYS as usize + 1));
    let store = MemoryIndexDiskKeyValueStore::open(test_config(), &path, "leaves", index).unwrap();
    store.update_valid_key_range(1, NUM_KEYS);
    store.start_writing().unwrap();
    for key in 1..=NUM_KEYS {
        store.put(key, &payload(key, 0, 200)).unwrap();
    }
    store.end_writing(1, NUM_KEYS).unwrap();

    let store = Arc::new(store);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    for key in 1..=NUM_KEYS {
                        let value = store.get(key).unwrap().unwrap();
                        assert_eq!(value.as_ref(), payload(key, 0, 200).as_slice());
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
