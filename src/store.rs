//! Indexed Key/Value Store
//!
//! Dense numeric keys over a [`DataFileCollection`] and an externally owned
//! [`LocationIndex`].
//!
//! ## Deletion
//! There is no delete. Keys outside the valid key range are logically
//! deleted; the next compaction drops their items from disk.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::Result;
use crate::files::{DataFileCollection, DataFileReader, LoadedDataCallback};
use crate::index::LocationIndex;
use crate::key_range::KeyRange;

/// Key/value store keeping values on disk and their locations in `I`
pub struct MemoryIndexDiskKeyValueStore<I: LocationIndex> {
    store_name: String,
    /// Key → data location, shared with whoever owns the index
    index: Arc<I>,
    file_collection: DataFileCollection,
}

impl<I: LocationIndex> MemoryIndexDiskKeyValueStore<I> {
    /// Open or create a store in `store_dir`.
    ///
    /// Existing files are loaded but not replayed, so `index` must already
    /// point into them.
    pub fn open(config: Config, store_dir: &Path, store_name: &str, index: Arc<I>) -> Result<Self> {
        let file_collection = DataFileCollection::open(config, store_dir, store_name)?;
        Ok(Self::with_collection(store_name, index, file_collection))
    }

    /// Open or create a store, replaying every existing item through `callback`
    /// so the caller can rebuild `index`
    pub fn open_with_callback<C>(
        config: Config,
        store_dir: &Path,
        store_name: &str,
        legacy_store_name: Option<&str>,
        index: Arc<I>,
        callback: &mut C,
    ) -> Result<Self>
    where
        C: LoadedDataCallback,
    {
        let file_collection = DataFileCollection::open_with_callback(
            config,
            store_dir,
            store_name,
            legacy_store_name,
            callback,
        )?;
        Ok(Self::with_collection(store_name, index, file_collection))
    }

    fn with_collection(store_name: &str, index: Arc<I>, file_collection: DataFileCollection) -> Self {
        debug!(
            store = store_name,
            files = file_collection.num_of_files(),
            range = %file_collection.valid_key_range(),
            "opened key/value store"
        );
        Self {
            store_name: store_name.to_string(),
            index,
            file_collection,
        }
    }

    /// Set the keys that are live. Call before any `put` of a key beyond the
    /// current range.
    pub fn update_valid_key_range(&self, min_valid_key: u64, max_valid_key: u64) {
        self.index.update_valid_range(min_valid_key, max_valid_key);
        self.file_collection
            .update_valid_key_range(min_valid_key, max_valid_key);
    }

    /// Start a write session
    pub fn start_writing(&self) -> Result<()> {
        self.file_collection.start_writing()
    }

    /// Store `value` for `key` and point the index at it
    pub fn put(&self, key: u64, value: &[u8]) -> Result<()> {
        let data_location = self.file_collection.store_data_item(value)?;
        self.index.put(key, data_location)
    }

    /// Store a value of `size` bytes written in place by `write`
    pub fn put_with<F>(&self, key: u64, size: usize, write: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]),
    {
        let data_location = self.file_collection.store_data_item_with(size, write)?;
        self.index.put(key, data_location)
    }

    /// End the write session and make the new file available for compaction
    pub fn end_writing(&self, min_valid_key: u64, max_valid_key: u64) -> Result<Arc<DataFileReader>> {
        let reader = self
            .file_collection
            .end_writing(min_valid_key, max_valid_key)?;
        reader.set_file_completed()?;
        trace!(
            store = %self.store_name,
            file_index = reader.index(),
            items = reader.items_count(),
            "write session completed"
        );
        Ok(reader)
    }

    /// Value stored for `key`.
    ///
    /// Keys outside the valid key range read as `None`, except key 0 which
    /// is always looked up.
    pub fn get(&self, key: u64) -> Result<Option<Bytes>> {
        if key != 0 && !self.file_collection.valid_key_range().within_range(key) {
            return Ok(None);
        }
        self.file_collection
            .read_data_item_using_index(self.index.as_ref(), key)
    }

    /// Hard-link every completed file and write the sidecar into `snapshot_dir`
    pub fn snapshot(&self, snapshot_dir: &Path) -> Result<()> {
        self.file_collection.snapshot(snapshot_dir)
    }

    pub fn close(&self) -> Result<()> {
        self.file_collection.close()
    }

    pub fn valid_key_range(&self) -> KeyRange {
        self.file_collection.valid_key_range()
    }

    /// The underlying collection, for compactors and statistics
    pub fn file_collection(&self) -> &DataFileCollection {
        &self.file_collection
    }

    pub fn index(&self) -> &Arc<I> {
        &self.index
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }
}
