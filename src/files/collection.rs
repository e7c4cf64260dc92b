//! Data File Collection
//!
//! Owns every data file of one store: the ordered set of readers, the single
//! in-flight writer, the valid key range and the store directory.
//!
//! ## Responsibilities
//! - Discover existing data files on startup and replay them to the caller
//! - Run write sessions (start → store items → end)
//! - Resolve data locations to readers for concurrent reads
//! - Hard-link completed files into snapshots
//! - Provide the primitives a compactor builds on
//!
//! ## Concurrency
//! - `data_files`: immutable [`ReaderList`] behind an `ArcSwap`, replaced whole
//!   on every change. Reads never wait for writers or compactors.
//! - `valid_key_range`: `ArcSwap`, replaced whole
//! - `session`: the only lock; held by the single writer thread

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::{Buf, Bytes};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::codec::{get_varint, make_tag, put_varint, split_tag, WireType};
use crate::config::Config;
use crate::error::{DataFileError, Result};
use crate::index::LocationIndex;
use crate::key_range::KeyRange;
use crate::location::{file_index, DisplayLocation, MAX_FILE_INDEX, NON_EXISTENT_DATA_LOCATION};

use super::reader_list::ReaderList;
use super::{
    is_data_file, DataFileMetadata, DataFileReader, DataFileWriter, FILE_EXTENSION,
    INITIAL_COMPACTION_LEVEL,
};

/// Attempts of an index-mediated read before giving up
const NUM_OF_READ_RETRIES: usize = 5;

/// Suffix of the sidecar file holding the valid key range
const METADATA_FILE_SUFFIX: &str = "_metadata";

const FIELD_MIN_VALID_KEY: u32 = 1;
const FIELD_MAX_VALID_KEY: u32 = 2;

/// Receives every data item of every existing file while a collection loads,
/// so the caller can rebuild its index
pub trait LoadedDataCallback {
    fn new_index_entry(&mut self, data_location: u64, data: Bytes);
}

impl<F> LoadedDataCallback for F
where
    F: FnMut(u64, Bytes),
{
    fn new_index_entry(&mut self, data_location: u64, data: Bytes) {
        self(data_location, data)
    }
}

/// Count and sizes (in bytes) of a set of data files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileSizeStatistics {
    pub count: usize,
    pub total: u64,
    pub min: u64,
    pub max: u64,
}

/// The open write session: its writer and the reader serving its items
struct WriteSession {
    writer: DataFileWriter,
    reader: Arc<DataFileReader>,
}

/// All data files of one store
pub struct DataFileCollection {
    config: Config,
    /// Directory holding the data files and the sidecar
    store_dir: PathBuf,
    /// Prefix of every file this collection writes
    store_name: String,
    /// Alternate prefix still accepted when loading
    legacy_store_name: Option<String>,
    loaded_from_existing_files: bool,

    /// Index for the next new file, never reused
    next_file_index: AtomicU32,
    valid_key_range: ArcSwap<KeyRange>,
    data_files: ArcSwap<ReaderList>,
    session: Mutex<Option<WriteSession>>,
    closed: AtomicBool,
}

impl DataFileCollection {
    /// Open or create a collection in `store_dir`
    pub fn open(config: Config, store_dir: &Path, store_name: &str) -> Result<Self> {
        Self::open_inner(config, store_dir, store_name, None, None)
    }

    /// Open a collection that also loads files written under `legacy_store_name`.
    ///
    /// New files always use `store_name`.
    pub fn open_with_legacy_name(
        config: Config,
        store_dir: &Path,
        store_name: &str,
        legacy_store_name: &str,
    ) -> Result<Self> {
        Self::open_inner(config, store_dir, store_name, Some(legacy_store_name), None)
    }

    /// Open a collection, passing every item of every existing file to `callback`
    ///
    /// On startup:
    /// 1. Create the store directory if it doesn't exist
    /// 2. Load the valid key range from the sidecar
    /// 3. Open a reader for every data file with either prefix
    /// 4. Replay items oldest file first through `callback`
    /// 5. Mark every loaded file completed
    pub fn open_with_callback<C>(
        config: Config,
        store_dir: &Path,
        store_name: &str,
        legacy_store_name: Option<&str>,
        callback: &mut C,
    ) -> Result<Self>
    where
        C: LoadedDataCallback,
    {
        let callback: &mut dyn LoadedDataCallback = callback;
        Self::open_inner(config, store_dir, store_name, legacy_store_name, Some(callback))
    }

    fn open_inner(
        config: Config,
        store_dir: &Path,
        store_name: &str,
        legacy_store_name: Option<&str>,
        callback: Option<&mut dyn LoadedDataCallback>,
    ) -> Result<Self> {
        config.validate()?;

        let mut collection = Self {
            config,
            store_dir: store_dir.to_path_buf(),
            store_name: store_name.to_string(),
            legacy_store_name: legacy_store_name.map(str::to_string),
            loaded_from_existing_files: false,
            next_file_index: AtomicU32::new(0),
            valid_key_range: ArcSwap::from_pointee(KeyRange::INVALID),
            data_files: ArcSwap::from_pointee(ReaderList::default()),
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
        };

        if store_dir.exists() {
            if !store_dir.is_dir() {
                return Err(DataFileError::InvalidState(format!(
                    "Store path {} is not a directory",
                    store_dir.display()
                )));
            }
            collection.loaded_from_existing_files = collection.load_existing(callback)?;
        } else {
            fs::create_dir_all(store_dir)?;
        }

        Ok(collection)
    }

    // =========================================================================
    // Write Session
    // =========================================================================

    /// Start a write session on a new data file.
    ///
    /// Fails if a session is already open. Items are readable as soon as they
    /// are stored.
    pub fn start_writing(&self) -> Result<()> {
        self.ensure_open()?;
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(DataFileError::InvalidState(format!(
                "Write session already open for store {}",
                self.store_name
            )));
        }

        let writer = self.new_data_file(Utc::now(), INITIAL_COMPACTION_LEVEL)?;
        let reader =
            self.add_new_data_file_reader(writer.path(), writer.metadata().clone())?;

        debug!(
            store = %self.store_name,
            file_index = reader.index(),
            "started write session"
        );
        *session = Some(WriteSession { writer, reader });
        Ok(())
    }

    /// Append a data item to the current session's file, returning its location
    pub fn store_data_item(&self, data: &[u8]) -> Result<u64> {
        let mut session = self.session.lock();
        self.current_session(&mut session)?
            .writer
            .store_data_item(data)
    }

    /// Append a data item of `size` bytes written in place by `write`
    pub fn store_data_item_with<F>(&self, size: usize, write: F) -> Result<u64>
    where
        F: FnOnce(&mut [u8]),
    {
        let mut session = self.session.lock();
        self.current_session(&mut session)?
            .writer
            .store_data_item_with(size, write)
    }

    /// Seal the current session's file and record the new valid key range.
    ///
    /// The returned reader is not yet completed: the caller marks it with
    /// [`DataFileReader::set_file_completed`] once its index points at the new
    /// items and the file may be compacted.
    pub fn end_writing(&self, min_valid_key: u64, max_valid_key: u64) -> Result<Arc<DataFileReader>> {
        let session = self.session.lock().take().ok_or_else(|| {
            DataFileError::InvalidState(format!(
                "Tried to end writing with no write session open for store {}",
                self.store_name
            ))
        })?;

        let WriteSession { writer, reader } = session;
        let metadata = match writer.finish_writing() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    store = %self.store_name,
                    file_index = reader.index(),
                    error = %e,
                    "failed to finish data file, its reader stays uncompleted"
                );
                return Err(e);
            }
        };
        reader.set_items_count(metadata.items_count());
        self.valid_key_range
            .store(Arc::new(KeyRange::new(min_valid_key, max_valid_key)));

        debug!(
            store = %self.store_name,
            file_index = reader.index(),
            items = metadata.items_count(),
            min_valid_key,
            max_valid_key,
            "ended write session"
        );
        Ok(reader)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read the data item at `data_location`.
    ///
    /// Returns `Ok(None)` for the non-existent location and for a file that was
    /// closed by a compaction. A location naming a file the collection does not
    /// know is an error.
    pub fn read_data_item(&self, data_location: u64) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        if data_location == NON_EXISTENT_DATA_LOCATION {
            return Ok(None);
        }
        let index = file_index(data_location);
        let reader = self
            .data_files
            .load()
            .get(index)
            .cloned()
            .ok_or_else(|| DataFileError::MissingFile {
                file_index: index,
                location: DisplayLocation(data_location).to_string(),
            })?;
        if !reader.is_open() {
            warn!(
                store = %self.store_name,
                location = %DisplayLocation(data_location),
                "data file was closed before the read"
            );
            return Ok(None);
        }
        reader.read_data_item(data_location)
    }

    /// Read the item `index` maps `key` to.
    ///
    /// A compaction may move the item between the index lookup and the read.
    /// The whole lookup is retried, with a fresh index read each time, up to
    /// five times.
    pub fn read_data_item_using_index<I>(&self, index: &I, key: u64) -> Result<Option<Bytes>>
    where
        I: LocationIndex + ?Sized,
    {
        for retry in 0..NUM_OF_READ_RETRIES {
            let data_location = index.get(key);
            if data_location == NON_EXISTENT_DATA_LOCATION {
                return Ok(None);
            }
            match self.read_data_item(data_location) {
                Ok(Some(data)) => return Ok(Some(data)),
                Ok(None) => {
                    debug!(
                        store = %self.store_name,
                        key,
                        location = %DisplayLocation(data_location),
                        retry,
                        "data file closed during read, retrying"
                    );
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        store = %self.store_name,
                        key,
                        location = %DisplayLocation(data_location),
                        retry,
                        error = %e,
                        "read failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(DataFileError::ReadRetriesExhausted {
            key,
            retries: NUM_OF_READ_RETRIES,
        })
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Write the sidecar into `snapshot_dir` and hard-link every completed data
    /// file next to it.
    ///
    /// Writing and compaction must be paused for the snapshot to be
    /// consistent; a file still being written is left out.
    pub fn snapshot(&self, snapshot_dir: &Path) -> Result<()> {
        self.ensure_open()?;
        fs::create_dir_all(snapshot_dir)?;
        self.save_metadata(snapshot_dir)?;

        let files = self.all_completed_files();
        for reader in &files {
            let file_name = reader.path().file_name().ok_or_else(|| {
                DataFileError::InvalidState(format!(
                    "Data file path {} has no file name",
                    reader.path().display()
                ))
            })?;
            fs::hard_link(reader.path(), snapshot_dir.join(file_name))?;
        }

        info!(
            store = %self.store_name,
            dir = %snapshot_dir.display(),
            files = files.len(),
            "snapshot written"
        );
        Ok(())
    }

    // =========================================================================
    // Compaction Primitives
    // =========================================================================

    /// Create a writer for a new data file with the next file index.
    ///
    /// Compactions pass the creation date of the newest merged file, so the
    /// new file orders among its inputs. The writer is independent of the
    /// write session.
    pub fn new_data_file(
        &self,
        creation_date: DateTime<Utc>,
        compaction_level: u8,
    ) -> Result<DataFileWriter> {
        self.ensure_open()?;
        let index = self.next_file_index.fetch_add(1, Ordering::SeqCst);
        if index > MAX_FILE_INDEX {
            return Err(DataFileError::InvalidState(format!(
                "Store {} has used every file index up to {}",
                self.store_name, MAX_FILE_INDEX
            )));
        }
        trace!(store = %self.store_name, file_index = index, compaction_level, "new data file");
        DataFileWriter::create(
            &self.store_dir,
            &self.store_name,
            index,
            creation_date,
            compaction_level,
            self.config.mapped_window_size,
        )
    }

    /// Open a reader for a file created by [`new_data_file`](Self::new_data_file)
    /// and make it visible to reads.
    pub fn add_new_data_file_reader(
        &self,
        path: &Path,
        metadata: DataFileMetadata,
    ) -> Result<Arc<DataFileReader>> {
        self.ensure_open()?;
        let reader = Arc::new(DataFileReader::open_with_metadata(&self.config, path, metadata)?);
        self.data_files
            .rcu(|files| files.with_added(Arc::clone(&reader)));
        Ok(reader)
    }

    /// Remove files from the collection, then close and delete them.
    ///
    /// Called by a compactor once every live item of these files is durably
    /// stored elsewhere and the index points there.
    pub fn delete_files(&self, readers: &[Arc<DataFileReader>]) -> Result<()> {
        let indices: HashSet<u32> = readers.iter().map(|r| r.index()).collect();
        self.data_files.rcu(|files| files.with_deleted(&indices));

        for reader in readers {
            reader.close();
            fs::remove_file(reader.path())?;
            debug!(
                store = %self.store_name,
                file_index = reader.index(),
                path = %reader.path().display(),
                "deleted data file"
            );
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Set the valid key range without ending a write session
    pub fn update_valid_key_range(&self, min_valid_key: u64, max_valid_key: u64) {
        self.valid_key_range
            .store(Arc::new(KeyRange::new(min_valid_key, max_valid_key)));
    }

    pub fn valid_key_range(&self) -> KeyRange {
        **self.valid_key_range.load()
    }

    /// True if data files existed when the collection was opened
    pub fn is_loaded_from_existing_files(&self) -> bool {
        self.loaded_from_existing_files
    }

    /// Number of data files, including one being written
    pub fn num_of_files(&self) -> usize {
        self.data_files.load().len()
    }

    /// Completed files in file index order
    pub fn all_completed_files(&self) -> Vec<Arc<DataFileReader>> {
        self.data_files
            .load()
            .iter()
            .filter(|r| r.is_file_completed())
            .cloned()
            .collect()
    }

    /// Count and sizes of all completed files
    pub fn all_completed_files_size_statistics(&self) -> Result<FileSizeStatistics> {
        let mut stats = FileSizeStatistics::default();
        for reader in self.all_completed_files() {
            let size = reader.size()?;
            stats.min = if stats.count == 0 { size } else { stats.min.min(size) };
            stats.max = stats.max.max(size);
            stats.total += size;
            stats.count += 1;
        }
        Ok(stats)
    }

    /// Reader for the file with `index`, if the collection holds it
    pub fn data_file(&self, index: u32) -> Option<Arc<DataFileReader>> {
        self.data_files.load().get(index).cloned()
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Finish any open write session, save the sidecar and close every reader.
    ///
    /// The collection can't be used afterwards.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(WriteSession { writer, reader }) = self.session.lock().take() {
            let metadata = writer.finish_writing()?;
            reader.set_items_count(metadata.items_count());
        }
        self.save_metadata(&self.store_dir)?;

        let files = self.data_files.swap(Arc::new(ReaderList::default()));
        for reader in files.iter() {
            reader.close();
        }
        debug!(store = %self.store_name, files = files.len(), "closed data file collection");
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataFileError::InvalidState(format!(
                "Data file collection {} is closed",
                self.store_name
            )));
        }
        Ok(())
    }

    fn current_session<'a>(
        &self,
        session: &'a mut Option<WriteSession>,
    ) -> Result<&'a mut WriteSession> {
        self.ensure_open()?;
        session.as_mut().ok_or_else(|| {
            DataFileError::InvalidState(format!(
                "Tried to store a data item with no write session open for store {}",
                self.store_name
            ))
        })
    }

    /// Load the sidecar and every existing data file. Returns true if any data
    /// file was found.
    fn load_existing(&mut self, callback: Option<&mut dyn LoadedDataCallback>) -> Result<bool> {
        let loaded_metadata = self.load_metadata()?;

        let mut readers = Vec::new();
        for entry in fs::read_dir(&self.store_dir)? {
            let path = entry?.path();
            let matches = is_data_file(&self.store_name, &path)
                || self
                    .legacy_store_name
                    .as_deref()
                    .is_some_and(|legacy| is_data_file(legacy, &path));
            if matches {
                readers.push(Arc::new(DataFileReader::open(&self.config, &path)?));
            }
        }
        if readers.is_empty() {
            return Ok(false);
        }
        readers.sort();

        info!(
            store = %self.store_name,
            files = readers.len(),
            "loading existing data files"
        );
        if !loaded_metadata {
            warn!(
                store = %self.store_name,
                dir = %self.store_dir.display(),
                "loading existing data files but no metadata file was found"
            );
        }

        let list = ReaderList::from_readers(readers.iter().cloned());
        let next_index = readers.iter().map(|r| r.index()).max().map_or(0, |max| max + 1);
        self.next_file_index.store(next_index, Ordering::SeqCst);

        if let Some(callback) = callback {
            for reader in &readers {
                for item in reader.create_iterator()? {
                    let (data_location, data) = item?;
                    callback.new_index_entry(data_location, data);
                }
            }
        }
        for reader in &readers {
            reader.set_file_completed()?;
        }

        info!(
            store = %self.store_name,
            files = %list.pretty_indices(),
            next_file_index = next_index,
            "finished loading existing data files"
        );
        self.data_files.store(Arc::new(list));
        Ok(true)
    }

    fn metadata_file_path(dir: &Path, store_name: &str) -> PathBuf {
        dir.join(format!("{}{}{}", store_name, METADATA_FILE_SUFFIX, FILE_EXTENSION))
    }

    /// Write the valid key range sidecar into `dir`
    fn save_metadata(&self, dir: &Path) -> Result<()> {
        let range = self.valid_key_range();
        let mut body = Vec::with_capacity(24);
        if range.min_valid_key() != 0 {
            put_varint(&mut body, make_tag(FIELD_MIN_VALID_KEY, WireType::Varint));
            put_varint(&mut body, range.min_valid_key());
        }
        if range.max_valid_key() != 0 {
            put_varint(&mut body, make_tag(FIELD_MAX_VALID_KEY, WireType::Varint));
            put_varint(&mut body, range.max_valid_key());
        }

        let path = Self::metadata_file_path(dir, &self.store_name);
        let mut out = BufWriter::new(File::create(&path)?);
        out.write_all(&body)?;
        out.flush()?;
        out.get_ref().sync_all()?;
        trace!(store = %self.store_name, path = %path.display(), range = %range, "saved metadata");
        Ok(())
    }

    /// Load the valid key range from the sidecar. A legacy sidecar is only read
    /// when the primary one is absent, and is deleted afterwards.
    fn load_metadata(&mut self) -> Result<bool> {
        let mut path = Self::metadata_file_path(&self.store_dir, &self.store_name);
        let mut is_legacy = false;
        if !path.exists() {
            match &self.legacy_store_name {
                Some(legacy) => {
                    path = Self::metadata_file_path(&self.store_dir, legacy);
                    is_legacy = true;
                }
                None => return Ok(false),
            }
        }
        if !path.exists() {
            return Ok(false);
        }

        let body = fs::read(&path)?;
        let mut buf = body.as_slice();
        let mut min_valid_key = 0;
        let mut max_valid_key = 0;
        while buf.has_remaining() {
            let (field, _) = split_tag(get_varint(&mut buf)?)?;
            match field {
                f if f == FIELD_MIN_VALID_KEY as u64 => min_valid_key = get_varint(&mut buf)?,
                f if f == FIELD_MAX_VALID_KEY as u64 => max_valid_key = get_varint(&mut buf)?,
                other => {
                    return Err(DataFileError::UnknownField {
                        context: "file collection metadata",
                        field: other,
                    })
                }
            }
        }
        self.valid_key_range
            .store(Arc::new(KeyRange::new(min_valid_key, max_valid_key)));

        if is_legacy {
            fs::remove_file(&path)?;
            debug!(store = %self.store_name, path = %path.display(), "removed legacy metadata file");
        }
        Ok(true)
    }
}
