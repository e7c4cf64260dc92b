//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::PathBuf;

use merkle_datafiles::files::MAX_COMPACTION_LEVEL;
use merkle_datafiles::{Config, DataFileCollection, LocationIndex};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output to the test harness; set RUST_LOG to see it
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn setup_temp_store() -> (TempDir, PathBuf) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");
    (temp_dir, path)
}

/// Small windows and probes so tests cross window and probe boundaries
pub fn test_config() -> Config {
    Config::builder()
        .mapped_window_size(16 * 1024)
        .read_probe_size(64)
        .max_file_channels(4)
        .threads_per_file_channel(2)
        .read_buffer_pool_size(4)
        .build()
}

/// `len`-byte value starting with `key` (little endian), then filler derived
/// from `key` and `version`
pub fn payload(key: u64, version: u8, len: usize) -> Vec<u8> {
    assert!(len >= 8);
    let mut data = key.to_le_bytes().to_vec();
    data.extend((0..len - 8).map(|i| (key as u8).wrapping_add(version).wrapping_add(i as u8)));
    data
}

/// Key a value produced by [`payload`] was written for
pub fn key_of(data: &[u8]) -> u64 {
    u64::from_le_bytes(data[..8].try_into().unwrap())
}

/// Merge every completed file into one new file, dropping items outside the
/// valid key range and items the index no longer points at.
///
/// Returns the number of items moved.
pub fn compact<I: LocationIndex + ?Sized>(collection: &DataFileCollection, index: &I) -> usize {
    let files = collection.all_completed_files();
    if files.is_empty() {
        return 0;
    }
    let range = collection.valid_key_range();
    let newest = files
        .iter()
        .map(|f| f.metadata().creation_date())
        .max()
        .unwrap();
    let level = files
        .iter()
        .map(|f| f.metadata().compaction_level())
        .max()
        .unwrap()
        .saturating_add(1)
        .min(MAX_COMPACTION_LEVEL);

    let mut writer = collection.new_data_file(newest, level).unwrap();
    let reader = collection
        .add_new_data_file_reader(writer.path(), writer.metadata().clone())
        .unwrap();

    let mut moved = 0;
    for file in &files {
        for item in file.create_iterator().unwrap() {
            let (old_location, data) = item.unwrap();
            let key = key_of(&data);
            if !range.within_range(key) || index.get(key) != old_location {
                continue;
            }
            let new_location = writer.store_data_item(&data).unwrap();
            if index.put_if_equal(key, old_location, new_location).unwrap() {
                moved += 1;
            }
        }
    }

    let metadata = writer.finish_writing().unwrap();
    reader.set_items_count(metadata.items_count());
    reader.set_file_completed().unwrap();
    collection.delete_files(&files).unwrap();
    moved
}
