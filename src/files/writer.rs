//! Data File Writer
//!
//! Appends data items to a new data file through memory-mapped windows.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, trace};

use crate::codec::{put_record_header, record_header_len};
use crate::error::{DataFileError, Result};
use crate::location::{data_location, MAX_BYTE_OFFSET};

use super::{create_data_file_path, DataFileMetadata, FIELD_DATAFILE_ITEMS};

/// One mapped region of the file being written.
///
/// Unmapped when dropped, so replacing the window releases the previous one.
struct MappedWindow {
    mmap: MmapMut,
    /// File offset of the first mapped byte
    start: u64,
    /// Bytes of the window already used
    position: usize,
}

impl MappedWindow {
    fn map(file: &File, start: u64, len: usize) -> Result<Self> {
        let end = start + len as u64;
        if file.metadata()?.len() < end {
            file.set_len(end)?;
        }
        // SAFETY: the file is created and owned by a single writer for its whole
        // session and only this window maps it. Readers use positional reads
        // through their own handles and never touch bytes past a returned location.
        let mmap = unsafe { MmapOptions::new().offset(start).len(len).map_mut(file)? };
        Ok(Self {
            mmap,
            start,
            position: 0,
        })
    }

    fn remaining(&self) -> usize {
        self.mmap.len() - self.position
    }

    fn file_position(&self) -> u64 {
        self.start + self.position as u64
    }
}

/// Writer for one data file during one write session
///
/// Not shareable across threads while writing; the collection keeps it behind
/// its write-session lock. Readers of the same file go through a
/// [`DataFileReader`](super::DataFileReader).
pub struct DataFileWriter {
    /// Output file path
    path: PathBuf,
    /// File handle backing the mappings
    file: File,
    /// Metadata written at the start of the file
    metadata: DataFileMetadata,
    /// Size of each mapped window
    window_size: usize,
    /// Current mapped window
    window: MappedWindow,
    /// Number of items written
    items_written: u64,

    /// Makes the next `finish_writing` fail before touching the file
    #[cfg(test)]
    pub(crate) fail_finish: bool,
}

impl DataFileWriter {
    /// Create a new data file and write its metadata header
    ///
    /// The items count in the header is a placeholder until
    /// [`finish_writing`](Self::finish_writing) patches it.
    pub fn create(
        store_dir: &Path,
        store_name: &str,
        index: u32,
        creation_date: DateTime<Utc>,
        compaction_level: u8,
        window_size: usize,
    ) -> Result<Self> {
        let mut metadata = DataFileMetadata::new(index, creation_date, compaction_level)?;
        let path = create_data_file_path(store_dir, store_name, index, creation_date);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let header = metadata.encode_header();
        file.write_all(&header)?;

        let window = MappedWindow::map(&file, header.len() as u64, window_size)?;

        debug!(path = %path.display(), index, compaction_level, "created data file");

        Ok(Self {
            path,
            file,
            metadata,
            window_size,
            window,
            items_written: 0,
            #[cfg(test)]
            fail_finish: false,
        })
    }

    /// Append a data item, returning its data location
    pub fn store_data_item(&mut self, data: &[u8]) -> Result<u64> {
        self.store_data_item_with(data.len(), |buf| buf.copy_from_slice(data))
    }

    /// Append a data item of `size` bytes written in place by `write`.
    ///
    /// `write` receives exactly `size` bytes of the mapped window and must
    /// fill all of them.
    pub fn store_data_item_with<F>(&mut self, size: usize, write: F) -> Result<u64>
    where
        F: FnOnce(&mut [u8]),
    {
        let header_len = record_header_len(FIELD_DATAFILE_ITEMS, size);
        let encoded_len = header_len + size;
        if encoded_len > self.window_size {
            return Err(DataFileError::ItemTooLarge {
                size: encoded_len,
                limit: self.window_size,
            });
        }
        if self.window.remaining() < encoded_len {
            self.remap()?;
        }

        let start = self.window.file_position();
        if start > MAX_BYTE_OFFSET {
            return Err(DataFileError::FileFull {
                path: self.path.clone(),
            });
        }

        let pos = self.window.position;
        let record = &mut self.window.mmap[pos..pos + encoded_len];
        let mut header: &mut [u8] = &mut record[..header_len];
        put_record_header(&mut header, FIELD_DATAFILE_ITEMS, size);
        write(&mut record[header_len..]);

        self.window.position += encoded_len;
        self.items_written += 1;

        Ok(data_location(self.metadata.index(), start))
    }

    /// Seal the file: patch the items count, release the mapping and truncate
    /// the unused tail of the last window.
    ///
    /// Consumes the writer, so nothing can be appended afterwards. Returns the
    /// final metadata.
    pub fn finish_writing(self) -> Result<DataFileMetadata> {
        self.injected_finish_fault()?;
        let DataFileWriter {
            path,
            file,
            mut metadata,
            window,
            items_written,
            ..
        } = self;

        window.mmap.flush()?;
        let file_size = window.file_position();
        drop(window);

        file.set_len(file_size)?;
        file.write_all_at(&items_written.to_le_bytes(), metadata.items_count_offset())?;
        file.sync_all()?;
        metadata.set_items_count(items_written);

        debug!(
            path = %path.display(),
            items = items_written,
            bytes = file_size,
            "finished writing data file"
        );

        Ok(metadata)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata as written at creation (items count still zero)
    pub fn metadata(&self) -> &DataFileMetadata {
        &self.metadata
    }

    pub fn items_written(&self) -> u64 {
        self.items_written
    }

    /// Bytes of header and items written so far
    pub fn bytes_written(&self) -> u64 {
        self.window.file_position()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Map a fresh window starting where the current one is used up
    fn remap(&mut self) -> Result<()> {
        let next = self.window.file_position();
        self.window.mmap.flush_async()?;
        trace!(path = %self.path.display(), offset = next, "remapping write window");
        self.window = MappedWindow::map(&self.file, next, self.window_size)?;
        Ok(())
    }

    #[cfg(test)]
    fn injected_finish_fault(&self) -> Result<()> {
        if self.fail_finish {
            return Err(std::io::Error::other("injected finish failure").into());
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline(always)]
    fn injected_finish_fault(&self) -> Result<()> {
        Ok(())
    }
}
