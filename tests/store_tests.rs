//! Tests for MemoryIndexDiskKeyValueStore
//!
//! These tests verify:
//! - put/get round-trips within a session and after it ends
//! - Range-based deletion, with key 0 always looked up
//! - Compaction drops keys outside the valid range
//! - Rebuilding the index on reopen and from a snapshot

mod common;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use merkle_datafiles::location::file_index;
use merkle_datafiles::{AtomicLocationIndex, LocationIndex, MemoryIndexDiskKeyValueStore};

use common::{key_of, payload, setup_temp_store, test_config};

type Store = MemoryIndexDiskKeyValueStore<AtomicLocationIndex>;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_store(path: &Path) -> Store {
    let index = Arc::new(AtomicLocationIndex::with_capacity(1024));
    Store::open(test_config(), path, "leaves", index).unwrap()
}

/// Open a store over existing files, rebuilding the index from their items
fn reopen_store(path: &Path) -> Store {
    let index = Arc::new(AtomicLocationIndex::with_capacity(1024));
    let rebuild = Arc::clone(&index);
    let mut callback = move |location: u64, data: Bytes| {
        rebuild.put(key_of(&data), location).unwrap();
    };
    Store::open_with_callback(test_config(), path, "leaves", None, index, &mut callback).unwrap()
}

fn write_keys(store: &Store, keys: std::ops::RangeInclusive<u64>, version: u8) {
    store.update_valid_key_range(*keys.start(), *keys.end());
    store.start_writing().unwrap();
    for key in keys.clone() {
        store.put(key, &payload(key, version, 32)).unwrap();
    }
    store.end_writing(*keys.start(), *keys.end()).unwrap();
}

// =============================================================================
// Get/Put Tests
// =============================================================================

#[test]
fn test_put_get_scenario() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);

    store.update_valid_key_range(100, 110);
    store.start_writing().unwrap();
    for key in 100..=110 {
        store.put(key, &payload(key, 0, 32)).unwrap();
    }
    let location_105 = store.index().get(105);
    let reader = store.end_writing(100, 110).unwrap();

    assert!(reader.is_file_completed());
    assert_eq!(file_index(location_105), reader.index());
    assert_eq!(store.get(105).unwrap().unwrap().as_ref(), payload(105, 0, 32).as_slice());
    assert!(store.get(50).unwrap().is_none());
    assert!(store.get(0).unwrap().is_none());
}

#[test]
fn test_get_during_session() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);
    store.update_valid_key_range(1, 10);

    store.start_writing().unwrap();
    store.put(3, &payload(3, 0, 32)).unwrap();

    assert_eq!(store.get(3).unwrap().unwrap().as_ref(), payload(3, 0, 32).as_slice());
    assert!(store.get(4).unwrap().is_none());
    store.end_writing(1, 10).unwrap();
}

#[test]
fn test_put_with_writes_in_place() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);
    store.update_valid_key_range(1, 1);
    let expected = payload(1, 9, 64);

    store.start_writing().unwrap();
    store
        .put_with(1, expected.len(), |buf| buf.copy_from_slice(&expected))
        .unwrap();
    store.end_writing(1, 1).unwrap();

    assert_eq!(store.get(1).unwrap().unwrap().as_ref(), expected.as_slice());
}

#[test]
fn test_latest_put_wins() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);

    write_keys(&store, 1..=20, 0);
    write_keys(&store, 1..=20, 1);

    for key in 1..=20 {
        assert_eq!(store.get(key).unwrap().unwrap().as_ref(), payload(key, 1, 32).as_slice());
    }
}

#[test]
fn test_values_round_trip_across_sizes() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);
    let sizes = [8usize, 9, 63, 64, 65, 500, 4000, 12_000];

    store.update_valid_key_range(1, sizes.len() as u64);
    store.start_writing().unwrap();
    for (key, size) in (1u64..).zip(sizes) {
        store.put(key, &payload(key, 0, size)).unwrap();
    }
    store.end_writing(1, sizes.len() as u64).unwrap();

    for (key, size) in (1u64..).zip(sizes) {
        let value = store.get(key).unwrap().unwrap();
        assert_eq!(value.as_ref(), payload(key, 0, size).as_slice());
    }
}

// =============================================================================
// Range Deletion Tests
// =============================================================================

#[test]
fn test_key_zero_is_readable_outside_range() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);

    store.update_valid_key_range(0, 5);
    store.start_writing().unwrap();
    store.put(0, &payload(0, 0, 32)).unwrap();
    store.put(5, &payload(5, 0, 32)).unwrap();
    store.end_writing(1, 5).unwrap();

    assert_eq!(store.get(0).unwrap().unwrap().as_ref(), payload(0, 0, 32).as_slice());
    assert!(store.get(6).unwrap().is_none());
}

#[test]
fn test_compaction_drops_keys_outside_range() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);
    write_keys(&store, 1..=30, 0);
    write_keys(&store, 11..=30, 1);

    store.update_valid_key_range(11, 20);
    let moved = common::compact(store.file_collection(), store.index().as_ref());

    assert_eq!(moved, 10);
    assert_eq!(store.file_collection().num_of_files(), 1);
    for key in 1..=30 {
        let value = store.get(key).unwrap();
        if (11..=20).contains(&key) {
            assert_eq!(value.unwrap().as_ref(), payload(key, 1, 32).as_slice());
        } else {
            assert!(value.is_none(), "key {} should be deleted", key);
        }
    }

    // the dropped keys are gone from disk too
    let reopened = {
        store.close().unwrap();
        reopen_store(&path)
    };
    for key in (1..=10).chain(21..=30) {
        assert_eq!(reopened.index().get(key), 0);
    }
}

// =============================================================================
// Reopen and Snapshot Tests
// =============================================================================

#[test]
fn test_reopen_rebuilds_index() {
    let (_temp, path) = setup_temp_store();
    {
        let store = open_store(&path);
        write_keys(&store, 1..=50, 0);
        write_keys(&store, 20..=60, 1);
        store.close().unwrap();
    }

    let store = reopen_store(&path);

    assert_eq!(store.valid_key_range().min_valid_key(), 20);
    assert_eq!(store.valid_key_range().max_valid_key(), 60);
    for key in 20..=60 {
        assert_eq!(store.get(key).unwrap().unwrap().as_ref(), payload(key, 1, 32).as_slice());
    }
    assert!(store.get(10).unwrap().is_none());
}

#[test]
fn test_snapshot_restores_same_values() {
    let (temp, path) = setup_temp_store();
    let snapshot_dir = temp.path().join("snapshot");
    let store = open_store(&path);
    write_keys(&store, 1..=40, 0);
    write_keys(&store, 1..=40, 1);

    store.snapshot(&snapshot_dir).unwrap();

    // later writes don't reach the snapshot
    write_keys(&store, 1..=40, 2);

    let restored = reopen_store(&snapshot_dir);
    assert_eq!(restored.file_collection().num_of_files(), 2);
    for key in 1..=40 {
        assert_eq!(restored.get(key).unwrap().unwrap().as_ref(), payload(key, 1, 32).as_slice());
        assert_eq!(store.get(key).unwrap().unwrap().as_ref(), payload(key, 2, 32).as_slice());
    }
}
