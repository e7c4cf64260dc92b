//! Data Files Module
//!
//! Append-only data files and the collection that manages them.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Metadata record (field 1, length-delimited)             │
//! │   index | creation secs | creation nanos |              │
//! │   items count (fixed64, patched on finish) | level      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Item record (field 11, length-delimited)                │
//! │   [Tag][Len][Payload]                                   │
//! │   ... repeated for each data item ...                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//! A file is written by one [`DataFileWriter`] during one write session, read
//! through its [`DataFileReader`] from the moment it is created, then marked
//! completed (immutable, eligible for compaction) and finally deleted by a
//! compactor once its live items have moved elsewhere.

mod buffer_pool;
mod collection;
mod iterator;
mod metadata;
mod reader;
mod reader_list;
mod writer;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

pub use collection::{DataFileCollection, FileSizeStatistics, LoadedDataCallback};
pub use iterator::DataFileIterator;
pub use metadata::DataFileMetadata;
pub use reader::DataFileReader;
pub use writer::DataFileWriter;

// =============================================================================
// Shared Constants (used by writer, reader, iterator, collection)
// =============================================================================

/// Extension of every data file and sidecar
pub const FILE_EXTENSION: &str = ".pbj";

/// Field number of the metadata record at the start of a data file
pub(crate) const FIELD_DATAFILE_METADATA: u32 = 1;

/// Field number of every data item record
pub(crate) const FIELD_DATAFILE_ITEMS: u32 = 11;

/// Compaction level of files written by a write session
pub const INITIAL_COMPACTION_LEVEL: u8 = 0;

/// Highest compaction level a file can record
pub const MAX_COMPACTION_LEVEL: u8 = 127;

/// Timestamp layout in data file names, always UTC
const FILE_NAME_DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%3f";

/// Width of the zero-padded file index in data file names
const FILE_INDEX_WIDTH: usize = 10;

// =============================================================================
// File Naming
// =============================================================================

/// Path of a data file:
/// `{store_name}_{yyyy-MM-dd_HH-mm-ss-SSS}_{index:010}.pbj`
pub fn create_data_file_path(
    store_dir: &Path,
    store_name: &str,
    index: u32,
    creation_date: DateTime<Utc>,
) -> PathBuf {
    store_dir.join(format!(
        "{}_{}_{:0width$}{}",
        store_name,
        creation_date.format(FILE_NAME_DATE_FORMAT),
        index,
        FILE_EXTENSION,
        width = FILE_INDEX_WIDTH
    ))
}

/// Parse the file index out of a data file name belonging to `store_name`.
///
/// "store_2024-03-01_10-20-30-123_0000000042.pbj" → Some(42). Sidecars and
/// files of other stores sharing the directory give `None`.
pub fn parse_data_file_index(store_name: &str, path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let rest = name
        .strip_prefix(store_name)?
        .strip_prefix('_')?
        .strip_suffix(FILE_EXTENSION)?;

    // date, time, index
    let mut parts = rest.split('_');
    let date = parts.next()?;
    let time = parts.next()?;
    let index = parts.next()?;
    if parts.next().is_some() || date.len() != 10 || time.len() != 12 {
        return None;
    }
    if index.len() != FILE_INDEX_WIDTH || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    index.parse().ok()
}

/// True if `path` is a data file of `store_name`
pub fn is_data_file(store_name: &str, path: &Path) -> bool {
    path.is_file() && parse_data_file_index(store_name, path).is_some()
}
