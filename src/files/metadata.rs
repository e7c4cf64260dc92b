//! Data File Metadata
//!
//! The record at the start of every data file.
//!
//! ## Body Fields
//! ```text
//! ┌────┬──────────────────────┬─────────┬───────────────────────────┐
//! │ #  │ field                │ type    │ written                   │
//! ├────┼──────────────────────┼─────────┼───────────────────────────┤
//! │ 1  │ index                │ varint  │ if non-zero               │
//! │ 2  │ creation seconds     │ varint  │ always                    │
//! │ 3  │ creation nanos       │ varint  │ always                    │
//! │ 4  │ items count          │ fixed64 │ always, patched on finish │
//! │ 5  │ item version         │ varint  │ never (legacy, skipped)   │
//! │ 6  │ compaction level     │ varint  │ if non-zero               │
//! └────┴──────────────────────┴─────────┴───────────────────────────┘
//! ```

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};

use crate::codec::{get_varint, make_tag, put_varint, read_varint, split_tag, varint_len, WireType};
use crate::error::{DataFileError, Result};

use super::{FIELD_DATAFILE_METADATA, MAX_COMPACTION_LEVEL};

const FIELD_INDEX: u32 = 1;
const FIELD_CREATION_SECONDS: u32 = 2;
const FIELD_CREATION_NANOS: u32 = 3;
const FIELD_ITEMS_COUNT: u32 = 4;
const FIELD_ITEM_VERSION: u32 = 5;
const FIELD_COMPACTION_LEVEL: u32 = 6;

/// Upper bound on the metadata body; anything larger is corruption
const MAX_METADATA_BODY_SIZE: u64 = 1024;

/// Metadata describing one data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFileMetadata {
    /// Index of the file within its collection
    index: u32,
    /// When the data in this file was created (older than the file for compactions)
    creation_date: DateTime<Utc>,
    /// Number of data items; zero until the writer finishes
    items_count: u64,
    /// How many times this file's items have been merged
    compaction_level: u8,
    /// Absolute file offset of the fixed64 items count
    items_count_offset: u64,
}

impl DataFileMetadata {
    /// Metadata for a new, empty file
    pub fn new(index: u32, creation_date: DateTime<Utc>, compaction_level: u8) -> Result<Self> {
        if compaction_level > MAX_COMPACTION_LEVEL {
            return Err(DataFileError::InvalidState(format!(
                "Compaction level {} exceeds maximum {}",
                compaction_level, MAX_COMPACTION_LEVEL
            )));
        }
        Ok(Self {
            index,
            creation_date,
            items_count: 0,
            compaction_level,
            items_count_offset: 0,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    pub fn items_count(&self) -> u64 {
        self.items_count
    }

    pub fn compaction_level(&self) -> u8 {
        self.compaction_level
    }

    pub(crate) fn items_count_offset(&self) -> u64 {
        self.items_count_offset
    }

    pub(crate) fn set_items_count(&mut self, items_count: u64) {
        self.items_count = items_count;
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Encode the full metadata record (tag + length + body) written at offset 0
    /// of a data file, remembering where the items count lands.
    pub fn encode_header(&mut self) -> Vec<u8> {
        let mut body = Vec::with_capacity(48);

        if self.index != 0 {
            put_varint(&mut body, make_tag(FIELD_INDEX, WireType::Varint));
            put_varint(&mut body, self.index as u64);
        }
        put_varint(&mut body, make_tag(FIELD_CREATION_SECONDS, WireType::Varint));
        put_varint(&mut body, self.creation_date.timestamp() as u64);
        put_varint(&mut body, make_tag(FIELD_CREATION_NANOS, WireType::Varint));
        put_varint(&mut body, self.creation_date.timestamp_subsec_nanos() as u64);

        // Fixed width so it can be overwritten in place once the file is sealed
        put_varint(&mut body, make_tag(FIELD_ITEMS_COUNT, WireType::Fixed64));
        let count_offset_in_body = body.len();
        body.put_u64_le(self.items_count);

        if self.compaction_level != 0 {
            put_varint(&mut body, make_tag(FIELD_COMPACTION_LEVEL, WireType::Varint));
            put_varint(&mut body, self.compaction_level as u64);
        }

        let tag = make_tag(FIELD_DATAFILE_METADATA, WireType::Delimited);
        let prefix_len = varint_len(tag) + varint_len(body.len() as u64);

        let mut header = Vec::with_capacity(prefix_len + body.len());
        put_varint(&mut header, tag);
        put_varint(&mut header, body.len() as u64);
        header.extend_from_slice(&body);

        self.items_count_offset = (prefix_len + count_offset_in_body) as u64;
        header
    }

    /// Read the metadata record at the start of a data file
    pub fn read_from_path(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let (metadata, _) = Self::read_header(&mut reader)?;
        Ok(metadata)
    }

    /// Read the metadata record from the start of a stream.
    ///
    /// Returns the metadata and the number of bytes the record took, which is
    /// where the first data item starts.
    pub fn read_header<R: Read>(reader: &mut R) -> Result<(Self, u64)> {
        let tag = read_varint(reader)?.ok_or_else(|| {
            DataFileError::Corruption("Data file is empty, no metadata record".to_string())
        })?;
        let (field, wire_type) = split_tag(tag)?;
        if field != FIELD_DATAFILE_METADATA as u64 || wire_type != WireType::Delimited {
            return Err(DataFileError::Corruption(format!(
                "Data file must start with metadata, found field {}",
                field
            )));
        }
        let body_len = read_varint(reader)?.ok_or_else(|| {
            DataFileError::Corruption("Truncated data file metadata".to_string())
        })?;
        if body_len > MAX_METADATA_BODY_SIZE {
            return Err(DataFileError::Corruption(format!(
                "Data file metadata of {} bytes exceeds limit of {}",
                body_len, MAX_METADATA_BODY_SIZE
            )));
        }

        let mut body = vec![0u8; body_len as usize];
        reader.read_exact(&mut body)?;

        let prefix_len = (varint_len(tag) + varint_len(body_len)) as u64;
        let metadata = Self::parse_body(&body, prefix_len)?;
        Ok((metadata, prefix_len + body_len))
    }

    /// Parse the metadata body; `body_offset` is where the body starts in the file
    fn parse_body(body: &[u8], body_offset: u64) -> Result<Self> {
        let mut buf = body;
        let mut index = 0u64;
        let mut seconds = 0u64;
        let mut nanos = 0u64;
        let mut items_count = 0u64;
        let mut items_count_offset = None;
        let mut compaction_level = 0u64;

        while buf.has_remaining() {
            let (field, wire_type) = split_tag(get_varint(&mut buf)?)?;
            let expected = if field == FIELD_ITEMS_COUNT as u64 {
                WireType::Fixed64
            } else {
                WireType::Varint
            };

            match field {
                f if f == FIELD_INDEX as u64 => index = get_varint(&mut buf)?,
                f if f == FIELD_CREATION_SECONDS as u64 => seconds = get_varint(&mut buf)?,
                f if f == FIELD_CREATION_NANOS as u64 => nanos = get_varint(&mut buf)?,
                f if f == FIELD_ITEMS_COUNT as u64 => {
                    if wire_type != expected || buf.remaining() < 8 {
                        return Err(DataFileError::Corruption(
                            "Malformed items count in data file metadata".to_string(),
                        ));
                    }
                    items_count_offset = Some(body_offset + (body.len() - buf.remaining()) as u64);
                    items_count = buf.get_u64_le();
                    continue;
                }
                f if f == FIELD_ITEM_VERSION as u64 => {
                    // Written by old files only
                    get_varint(&mut buf)?;
                }
                f if f == FIELD_COMPACTION_LEVEL as u64 => compaction_level = get_varint(&mut buf)?,
                other => {
                    return Err(DataFileError::UnknownField {
                        context: "data file metadata",
                        field: other,
                    })
                }
            }
            if wire_type != expected {
                return Err(DataFileError::Corruption(format!(
                    "Data file metadata field {} has wire type {:?}",
                    field, wire_type
                )));
            }
        }

        let index = u32::try_from(index).map_err(|_| {
            DataFileError::Corruption(format!("Data file index {} out of range", index))
        })?;
        if compaction_level > MAX_COMPACTION_LEVEL as u64 {
            return Err(DataFileError::Corruption(format!(
                "Compaction level {} exceeds maximum {}",
                compaction_level, MAX_COMPACTION_LEVEL
            )));
        }
        let creation_date = u32::try_from(nanos)
            .ok()
            .and_then(|nanos| DateTime::from_timestamp(seconds as i64, nanos))
            .ok_or_else(|| {
                DataFileError::Corruption(format!(
                    "Invalid creation date {}s {}ns in data file metadata",
                    seconds, nanos
                ))
            })?;
        let items_count_offset = items_count_offset.ok_or_else(|| {
            DataFileError::Corruption("Data file metadata has no items count".to_string())
        })?;

        Ok(Self {
            index,
            creation_date,
            items_count,
            compaction_level: compaction_level as u8,
            items_count_offset,
        })
    }
}
