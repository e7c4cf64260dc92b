//! Data File Reader
//!
//! Concurrent random-access reads of data items by location.
//!
//! ## Channel Pool
//! Reads use positional I/O (`pread`) on a pool of file handles. Each read
//! leases one handle. When the number of in-flight leases per open handle
//! exceeds `threads_per_file_channel`, another handle is opened, up to
//! `max_file_channels`. Handle slots are swapped atomically, so growing the
//! pool, reopening an interrupted handle and closing the file never block a
//! read in progress.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::codec::parse_record_header;
use crate::config::Config;
use crate::error::{DataFileError, Result};
use crate::location::{byte_offset, DisplayLocation};

use super::buffer_pool::BufferPool;
use super::{DataFileIterator, DataFileMetadata, FIELD_DATAFILE_ITEMS};

/// Reads retried after an interrupted handle is reopened, in total
const MAX_CHANNEL_REOPEN_ATTEMPTS: usize = 3;

/// A handle leased for one read; gives the lease back when dropped
struct ChannelLease<'a> {
    in_flight: &'a AtomicUsize,
    slot: usize,
    file: Arc<File>,
}

impl Drop for ChannelLease<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Reader for one data file, shared between threads behind an `Arc`
///
/// ## Lifecycle
/// - Open: created alongside a writer, or from an existing file at startup
/// - Completed: [`set_file_completed`](Self::set_file_completed) was called;
///   the file is immutable and may be compacted
/// - Closed: [`close`](Self::close) was called; reads return `None`
pub struct DataFileReader {
    /// Path of the data file
    path: PathBuf,
    /// Metadata read from the file or handed over by the writer
    metadata: DataFileMetadata,
    /// Items count, known once the writer finished
    items_count: AtomicU64,

    /// Handle slots; the first `open_channels` are populated while open
    channels: Box<[ArcSwapOption<File>]>,
    open_channels: AtomicUsize,
    /// Reads currently holding a lease
    in_flight: AtomicUsize,
    /// Round-robin cursor over open handles
    next_channel: AtomicUsize,
    threads_per_channel: usize,

    open: AtomicBool,
    completed: AtomicBool,
    /// File size cached when the file was completed
    final_size: AtomicU64,

    /// Probe buffers shared by concurrent reads
    buffers: BufferPool,

    /// Positional reads left to fail with `Interrupted`
    #[cfg(test)]
    injected_interrupts: AtomicUsize,
}

impl DataFileReader {
    /// Open a reader for an existing data file, reading its metadata from disk
    pub fn open(config: &Config, path: &Path) -> Result<Self> {
        let metadata = DataFileMetadata::read_from_path(path)?;
        Self::open_with_metadata(config, path, metadata)
    }

    /// Open a reader with already known metadata, e.g. for a file being written
    pub fn open_with_metadata(
        config: &Config,
        path: &Path,
        metadata: DataFileMetadata,
    ) -> Result<Self> {
        let first = File::open(path)?;
        let channels: Box<[ArcSwapOption<File>]> = (0..config.max_file_channels.max(1))
            .map(|_| ArcSwapOption::empty())
            .collect();
        channels[0].store(Some(Arc::new(first)));

        Ok(Self {
            path: path.to_path_buf(),
            items_count: AtomicU64::new(metadata.items_count()),
            metadata,
            channels,
            open_channels: AtomicUsize::new(1),
            in_flight: AtomicUsize::new(0),
            next_channel: AtomicUsize::new(0),
            threads_per_channel: config.threads_per_file_channel.max(1),
            open: AtomicBool::new(true),
            completed: AtomicBool::new(false),
            final_size: AtomicU64::new(0),
            buffers: BufferPool::new(config.read_buffer_pool_size.max(1), config.read_probe_size),
            #[cfg(test)]
            injected_interrupts: AtomicUsize::new(0),
        })
    }

    /// Read the data item stored at `data_location`.
    ///
    /// Returns `Ok(None)` if the file was closed, which happens when a
    /// compaction removed it; the caller should look the location up again.
    pub fn read_data_item(&self, data_location: u64) -> Result<Option<Bytes>> {
        let offset = byte_offset(data_location);
        let mut attempts = 0;
        loop {
            let Some(lease) = self.lease_channel() else {
                return Ok(None);
            };
            match self.read_at_offset(&lease.file, offset) {
                Err(DataFileError::Io(e)) if e.kind() == ErrorKind::Interrupted => {
                    attempts += 1;
                    if attempts >= MAX_CHANNEL_REOPEN_ATTEMPTS {
                        return Err(DataFileError::Io(io::Error::new(
                            ErrorKind::Interrupted,
                            format!(
                                "Read of {} from {} interrupted {} times",
                                DisplayLocation(data_location),
                                self.path.display(),
                                attempts
                            ),
                        )));
                    }
                    warn!(
                        file = %self.path.display(),
                        location = %DisplayLocation(data_location),
                        attempt = attempts,
                        "read interrupted, reopening file channel"
                    );
                    if !self.reopen_channel(lease.slot, &lease.file)? {
                        return Ok(None);
                    }
                }
                result => return result.map(Some),
            }
        }
    }

    /// Mark the file as fully written, immutable and ready for compaction.
    ///
    /// Must be called exactly once. Caches the file size.
    pub fn set_file_completed(&self) -> Result<()> {
        if self.completed.load(Ordering::Acquire) {
            return Err(self.already_completed());
        }
        let size = fs::metadata(&self.path)?.len();
        self.final_size.store(size, Ordering::Release);
        self.completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| self.already_completed())?;
        Ok(())
    }

    pub fn is_file_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// File size in bytes; cached once the file is completed
    pub fn size(&self) -> Result<u64> {
        if self.is_file_completed() {
            Ok(self.final_size.load(Ordering::Acquire))
        } else {
            Ok(fs::metadata(&self.path)?.len())
        }
    }

    /// Close every handle. Reads already holding a handle finish normally,
    /// later reads return `None`.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        for slot in self.channels.iter() {
            slot.store(None);
        }
        trace!(file = %self.path.display(), "closed data file reader");
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Iterate over every item of the file from disk
    pub fn create_iterator(&self) -> Result<DataFileIterator> {
        DataFileIterator::open(&self.path)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &DataFileMetadata {
        &self.metadata
    }

    pub fn index(&self) -> u32 {
        self.metadata.index()
    }

    /// Number of items; zero while the file is still being written
    pub fn items_count(&self) -> u64 {
        self.items_count.load(Ordering::Acquire)
    }

    /// Record the items count once the file's writer finished
    pub fn set_items_count(&self, items_count: u64) {
        self.items_count.store(items_count, Ordering::Release);
    }

    /// Number of file handles currently open
    pub fn open_channel_count(&self) -> usize {
        self.open_channels.load(Ordering::Acquire)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn lease_channel(&self) -> Option<ChannelLease<'_>> {
        if !self.is_open() {
            return None;
        }
        let in_flight = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;

        let open = self.open_channels.load(Ordering::Acquire);
        if in_flight > open * self.threads_per_channel && open < self.channels.len() {
            self.grow_channels(open);
        }

        let open = self.open_channels.load(Ordering::Acquire);
        let slot = self.next_channel.fetch_add(1, Ordering::Relaxed) % open;
        match self.channels[slot].load_full() {
            Some(file) => Some(ChannelLease {
                in_flight: &self.in_flight,
                slot,
                file,
            }),
            None => {
                // closed since the check above
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                None
            }
        }
    }

    /// Open one more handle into slot `open`; racing openers drop their extra handle
    fn grow_channels(&self, open: usize) {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) => {
                warn!(file = %self.path.display(), error = %e, "failed to open extra file channel");
                return;
            }
        };
        let prev = self.channels[open].compare_and_swap(&None::<Arc<File>>, Some(Arc::new(file)));
        if prev.is_none() {
            trace!(file = %self.path.display(), channels = open + 1, "opened file channel");
        }
        let _ = self.open_channels.compare_exchange(
            open,
            open + 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if !self.is_open() {
            self.channels[open].store(None);
        }
    }

    /// Replace the handle in `slot` if it is still `old`.
    ///
    /// Returns false if the reader was closed meanwhile.
    fn reopen_channel(&self, slot: usize, old: &Arc<File>) -> Result<bool> {
        if !self.is_open() {
            return Ok(false);
        }
        let file = Arc::new(File::open(&self.path)?);
        let current = Some(Arc::clone(old));
        let prev = self.channels[slot].compare_and_swap(&current, Some(file));
        if matches!(&*prev, Some(p) if Arc::ptr_eq(p, old)) {
            debug!(file = %self.path.display(), slot, "reopened file channel");
        }
        if !self.is_open() {
            self.channels[slot].store(None);
            return Ok(false);
        }
        Ok(true)
    }

    /// Probe-read the record at `offset`, then read the rest if it did not fit
    fn read_at_offset(&self, file: &File, offset: u64) -> Result<Bytes> {
        self.injected_read_fault()?;
        let mut buf = self.buffers.take();
        let read = read_up_to(file, &mut buf, offset)?;

        let header = parse_record_header(&buf[..read])?.ok_or_else(|| {
            DataFileError::Corruption(format!(
                "No data item at offset {} in {}",
                offset,
                self.path.display()
            ))
        })?;
        if header.field != FIELD_DATAFILE_ITEMS as u64 {
            return Err(DataFileError::Corruption(format!(
                "Unexpected field {} at offset {} in {}",
                header.field,
                offset,
                self.path.display()
            )));
        }

        let end = header.header_len.checked_add(header.payload_len);
        let item = if let Some(end) = end.filter(|&end| end <= read) {
            Bytes::copy_from_slice(&buf[header.header_len..end])
        } else {
            let file_size = self.size_of(file)?;
            match end.and_then(|end| offset.checked_add(end as u64)) {
                Some(item_end) if item_end <= file_size => {}
                _ => {
                    return Err(DataFileError::Corruption(format!(
                        "Data item of {} bytes at offset {} runs past the end of {} ({} bytes)",
                        header.payload_len,
                        offset,
                        self.path.display(),
                        file_size
                    )))
                }
            }
            let mut data = vec![0u8; header.payload_len];
            file.read_exact_at(&mut data, offset + header.header_len as u64)?;
            Bytes::from(data)
        };
        self.buffers.give_back(buf);
        Ok(item)
    }

    /// Size of the file behind `file`; the cached size once completed
    fn size_of(&self, file: &File) -> Result<u64> {
        if self.is_file_completed() {
            Ok(self.final_size.load(Ordering::Acquire))
        } else {
            Ok(file.metadata()?.len())
        }
    }

    #[cfg(test)]
    fn injected_read_fault(&self) -> io::Result<()> {
        let injected = self
            .injected_interrupts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(io::Error::from(ErrorKind::Interrupted)),
            Err(_) => Ok(()),
        }
    }

    #[cfg(not(test))]
    #[inline(always)]
    fn injected_read_fault(&self) -> io::Result<()> {
        Ok(())
    }

    fn already_completed(&self) -> DataFileError {
        DataFileError::InvalidState(format!(
            "Data file {} is already completed",
            self.path.display()
        ))
    }
}

/// Fill `buf` from `offset`, stopping early at end of file
fn read_up_to(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64)? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

// =============================================================================
// Ordering: (creation date, index), oldest first
// =============================================================================

impl Ord for DataFileReader {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.metadata
            .creation_date()
            .cmp(&other.metadata.creation_date())
            .then_with(|| self.index().cmp(&other.index()))
    }
}

impl PartialOrd for DataFileReader {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DataFileReader {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for DataFileReader {}

impl fmt::Debug for DataFileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFileReader")
            .field("index", &self.index())
            .field("path", &self.path)
            .field("completed", &self.is_file_completed())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::DataFileWriter;
    use chrono::Utc;
    use tempfile::TempDir;

    /// A completed one-item file and a reader over it
    fn reader_with_item(config: &Config) -> (TempDir, DataFileReader, u64) {
        let dir = TempDir::new().unwrap();
        let mut writer = DataFileWriter::create(dir.path(), "test", 0, Utc::now(), 0, 4096).unwrap();
        let location = writer.store_data_item(b"interrupted read").unwrap();
        let path = writer.path().to_path_buf();
        writer.finish_writing().unwrap();
        let reader = DataFileReader::open(config, &path).unwrap();
        (dir, reader, location)
    }

    fn single_channel() -> Config {
        Config::builder().max_file_channels(1).build()
    }

    #[test]
    fn interrupted_read_reopens_channel() {
        let (_dir, reader, location) = reader_with_item(&single_channel());
        let before = reader.channels[0].load_full().unwrap();

        reader.injected_interrupts.store(1, Ordering::Release);
        let data = reader.read_data_item(location).unwrap().unwrap();

        assert_eq!(data.as_ref(), b"interrupted read");
        let after = reader.channels[0].load_full().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(reader.open_channel_count(), 1);
    }

    #[test]
    fn two_interrupts_still_succeed() {
        let (_dir, reader, location) = reader_with_item(&single_channel());

        reader.injected_interrupts.store(2, Ordering::Release);

        assert!(reader.read_data_item(location).unwrap().is_some());
        assert_eq!(reader.injected_interrupts.load(Ordering::Acquire), 0);
    }

    #[test]
    fn third_interrupt_is_fatal() {
        let (_dir, reader, location) = reader_with_item(&single_channel());

        reader
            .injected_interrupts
            .store(MAX_CHANNEL_REOPEN_ATTEMPTS, Ordering::Release);
        match reader.read_data_item(location) {
            Err(DataFileError::Io(e)) => assert_eq!(e.kind(), ErrorKind::Interrupted),
            other => panic!("expected an interrupted I/O error, got {:?}", other),
        }

        // the reopened channel serves the next read
        assert!(reader.read_data_item(location).unwrap().is_some());
        assert_eq!(reader.in_flight.load(Ordering::Acquire), 0);
    }

    #[test]
    fn interrupt_after_close_returns_none() {
        let (_dir, reader, location) = reader_with_item(&single_channel());
        let lease = reader.lease_channel().unwrap();
        reader.close();

        assert!(!reader.reopen_channel(lease.slot, &lease.file).unwrap());
        drop(lease);
        assert!(reader.read_data_item(location).unwrap().is_none());
    }

    #[test]
    fn held_leases_grow_pool_up_to_limit() {
        let config = Config::builder()
            .max_file_channels(2)
            .threads_per_file_channel(1)
            .build();
        let (_dir, reader, _) = reader_with_item(&config);

        let first = reader.lease_channel().unwrap();
        assert_eq!(reader.open_channel_count(), 1);
        let second = reader.lease_channel().unwrap();
        assert_eq!(reader.open_channel_count(), 2);
        let third = reader.lease_channel().unwrap();
        assert_eq!(reader.open_channel_count(), 2);
        assert!(third.slot < 2);

        drop((first, second, third));
        assert_eq!(reader.in_flight.load(Ordering::Acquire), 0);
    }
}
