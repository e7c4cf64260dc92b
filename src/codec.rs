//! Wire codec
//!
//! Protobuf-compatible primitives shared by data files and sidecar metadata.
//!
//! ## Record Framing
//! ```text
//! ┌──────────────┬───────────────┬─────────────────────────────┐
//! │ Tag (varint) │ Len (varint)  │         Payload             │
//! └──────────────┴───────────────┴─────────────────────────────┘
//! ```
//!
//! Tag = `(field_number << 3) | wire_type`. Varints are little-endian base-128,
//! at most 10 bytes for a `u64`.

use std::io::{ErrorKind, Read};

use bytes::{Buf, BufMut};

use crate::error::{DataFileError, Result};

/// Longest varint encoding of a `u64`
pub const MAX_VARINT_LEN: usize = 10;

/// Longest possible record header: tag varint + length varint
pub const MAX_RECORD_HEADER_LEN: usize = 2 * MAX_VARINT_LEN;

/// Number of low tag bits holding the wire type
const TAG_TYPE_BITS: u32 = 3;

/// Protobuf wire types used by the data file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    Delimited = 2,
}

impl TryFrom<u64> for WireType {
    type Error = DataFileError;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::Delimited),
            other => Err(DataFileError::Corruption(format!(
                "Unsupported wire type: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Build a field tag
#[inline]
pub fn make_tag(field: u32, wire_type: WireType) -> u64 {
    ((field as u64) << TAG_TYPE_BITS) | wire_type as u64
}

/// Split a tag into its field number and wire type
pub fn split_tag(tag: u64) -> Result<(u64, WireType)> {
    let wire_type = WireType::try_from(tag & ((1 << TAG_TYPE_BITS) - 1))?;
    Ok((tag >> TAG_TYPE_BITS, wire_type))
}

// =============================================================================
// Varints
// =============================================================================

/// Number of bytes `value` takes as a varint
#[inline]
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Append a varint. Works on `Vec<u8>` as well as `&mut [u8]` cursors.
pub fn put_varint<B: BufMut>(buf: &mut B, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Consume a varint from a buffer, failing if the buffer ends mid-value
pub fn get_varint<B: Buf>(buf: &mut B) -> Result<u64> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        if !buf.has_remaining() {
            return Err(DataFileError::Corruption(
                "Truncated varint".to_string(),
            ));
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(DataFileError::Corruption("Varint longer than 10 bytes".to_string()))
}

/// Decode a varint from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` ends before the varint does, otherwise the
/// value and the number of bytes it used.
pub fn decode_varint(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        return Err(DataFileError::Corruption(
            "Varint longer than 10 bytes".to_string(),
        ));
    }
    Ok(None)
}

/// Read a varint from a stream.
///
/// Returns `Ok(None)` on a clean end of stream before the first byte.
pub fn read_varint<R: Read>(reader: &mut R) -> Result<Option<u64>> {
    let mut value = 0u64;
    let mut byte = [0u8; 1];
    for i in 0..MAX_VARINT_LEN {
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof && i == 0 => return Ok(None),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(DataFileError::Corruption(
                    "Truncated varint at end of file".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        }
        value |= ((byte[0] & 0x7f) as u64) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(DataFileError::Corruption("Varint longer than 10 bytes".to_string()))
}

// =============================================================================
// Length-Delimited Records
// =============================================================================

/// Parsed tag + length prefix of a length-delimited record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Field number from the tag
    pub field: u64,
    /// Bytes taken by tag and length
    pub header_len: usize,
    /// Bytes of payload following the header
    pub payload_len: usize,
}

/// Bytes taken by the header of a record with the given payload size
#[inline]
pub fn record_header_len(field: u32, payload_len: usize) -> usize {
    varint_len(make_tag(field, WireType::Delimited)) + varint_len(payload_len as u64)
}

/// Write a record header (tag + length)
pub fn put_record_header<B: BufMut>(buf: &mut B, field: u32, payload_len: usize) {
    put_varint(buf, make_tag(field, WireType::Delimited));
    put_varint(buf, payload_len as u64);
}

/// Parse a record header from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` is too short to hold the whole header.
pub fn parse_record_header(buf: &[u8]) -> Result<Option<RecordHeader>> {
    let Some((tag, tag_len)) = decode_varint(buf)? else {
        return Ok(None);
    };
    let (field, wire_type) = split_tag(tag)?;
    if wire_type != WireType::Delimited {
        return Err(DataFileError::Corruption(format!(
            "Expected length-delimited record for field {}, got {:?}",
            field, wire_type
        )));
    }
    let Some((len, len_len)) = decode_varint(&buf[tag_len..])? else {
        return Ok(None);
    };
    let payload_len = usize::try_from(len).map_err(|_| {
        DataFileError::Corruption(format!("Record length {} does not fit in memory", len))
    })?;
    Ok(Some(RecordHeader {
        field,
        header_len: tag_len + len_len,
        payload_len,
    }))
}
