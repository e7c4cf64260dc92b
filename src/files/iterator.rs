//! Data File Iterator
//!
//! Sequential iteration over all data items in a data file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::warn;

use crate::codec::{read_varint, split_tag, varint_len, WireType};
use crate::error::{DataFileError, Result};
use crate::location::data_location;

use super::{DataFileMetadata, FIELD_DATAFILE_ITEMS};

/// Iterator over `(data_location, item_bytes)` in file order
pub struct DataFileIterator {
    reader: BufReader<File>,
    path: PathBuf,
    metadata: DataFileMetadata,
    /// Length of the file on disk
    file_size: u64,
    /// Current position in file
    position: u64,
    done: bool,
}

impl DataFileIterator {
    /// Open a data file and position after its metadata record
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let (metadata, header_len) = DataFileMetadata::read_header(&mut reader)?;
        Ok(Self {
            reader,
            path: path.to_path_buf(),
            metadata,
            file_size,
            position: header_len,
            done: false,
        })
    }

    /// Metadata of the file being iterated
    pub fn metadata(&self) -> &DataFileMetadata {
        &self.metadata
    }

    fn next_item(&mut self) -> Result<Option<(u64, Bytes)>> {
        let start = self.position;
        let Some(tag) = read_varint(&mut self.reader)? else {
            return Ok(None);
        };
        if tag == 0 {
            // Unused tail of a mapped window: the writer never finished this file
            warn!(
                file = %self.path.display(),
                offset = start,
                "data file ends in zero padding, stopping at last complete item"
            );
            return Ok(None);
        }

        let (field, wire_type) = split_tag(tag)?;
        if field != FIELD_DATAFILE_ITEMS as u64 || wire_type != WireType::Delimited {
            return Err(DataFileError::Corruption(format!(
                "Unexpected field {} ({:?}) at offset {} in {}",
                field,
                wire_type,
                start,
                self.path.display()
            )));
        }
        let len = read_varint(&mut self.reader)?.ok_or_else(|| {
            DataFileError::Corruption(format!(
                "Truncated data item header at offset {} in {}",
                start,
                self.path.display()
            ))
        })?;

        let payload_start = start + (varint_len(tag) + varint_len(len)) as u64;
        if payload_start.saturating_add(len) > self.file_size {
            return Err(DataFileError::Corruption(format!(
                "Data item of {} bytes at offset {} runs past end of {}",
                len,
                start,
                self.path.display()
            )));
        }

        let mut data = vec![0u8; len as usize];
        self.reader.read_exact(&mut data)?;
        self.position = payload_start + len;

        Ok(Some((data_location(self.metadata.index(), start), Bytes::from(data))))
    }
}

impl Iterator for DataFileIterator {
    /// (data location, item bytes)
    type Item = Result<(u64, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_item() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
