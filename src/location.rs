//! Data Location Codec
//!
//! A data location packs a file index and a byte offset into one `u64`:
//!
//! ```text
//! ┌────────────────────────┬──────────────────────────────────────────┐
//! │ fileIndex + 1 (24 bit) │           byte offset (40 bit)           │
//! └────────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! The `+ 1` keeps every packed value non-zero, so `0` is free to mean
//! "no location" in an index.

use std::fmt;

/// Location value meaning "nothing stored"
pub const NON_EXISTENT_DATA_LOCATION: u64 = 0;

/// Bits used for the byte offset
pub const BYTE_OFFSET_BITS: u32 = 40;

/// Mask selecting the byte offset bits
pub const BYTE_OFFSET_MASK: u64 = (1 << BYTE_OFFSET_BITS) - 1;

/// Largest byte offset a location can hold
pub const MAX_BYTE_OFFSET: u64 = BYTE_OFFSET_MASK;

/// Largest file index a location can hold (2^24 - 2, because of the `+ 1`)
pub const MAX_FILE_INDEX: u32 = (1 << (64 - BYTE_OFFSET_BITS)) - 2;

/// Pack a file index and byte offset into a data location.
///
/// `byte_offset` must be at most [`MAX_BYTE_OFFSET`] and `file_index` at most
/// [`MAX_FILE_INDEX`]; callers enforce both before writing.
#[inline]
pub fn data_location(file_index: u32, byte_offset: u64) -> u64 {
    debug_assert!(file_index <= MAX_FILE_INDEX, "file index {file_index} out of range");
    debug_assert!(byte_offset <= MAX_BYTE_OFFSET, "byte offset {byte_offset} out of range");
    ((file_index as u64 + 1) << BYTE_OFFSET_BITS) | (byte_offset & BYTE_OFFSET_MASK)
}

/// File index part of a data location
#[inline]
pub fn file_index(data_location: u64) -> u32 {
    ((data_location >> BYTE_OFFSET_BITS) as u32).wrapping_sub(1)
}

/// Byte offset part of a data location
#[inline]
pub fn byte_offset(data_location: u64) -> u64 {
    data_location & BYTE_OFFSET_MASK
}

/// Display adapter printing a location as `fileIndex:offset`
pub struct DisplayLocation(pub u64);

impl fmt::Display for DisplayLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == NON_EXISTENT_DATA_LOCATION {
            write!(f, "NON_EXISTENT")
        } else {
            write!(f, "{}:{}", file_index(self.0), byte_offset(self.0))
        }
    }
}
