//! Tests for the data location codec
//!
//! These tests verify:
//! - Packing and unpacking round-trips over the whole valid domain
//! - No valid (file index, offset) pair packs to the non-existent location
//! - Display formatting used in logs

use merkle_datafiles::location::{
    byte_offset, data_location, file_index, MAX_BYTE_OFFSET, MAX_FILE_INDEX,
    NON_EXISTENT_DATA_LOCATION,
};
use merkle_datafiles::DisplayLocation;
use proptest::prelude::*;

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #[test]
    fn test_pack_unpack_round_trip(index in 0..=MAX_FILE_INDEX, offset in 0..=MAX_BYTE_OFFSET) {
        let location = data_location(index, offset);
        prop_assert_eq!(file_index(location), index);
        prop_assert_eq!(byte_offset(location), offset);
        prop_assert_ne!(location, NON_EXISTENT_DATA_LOCATION);
    }

    #[test]
    fn test_locations_order_by_file_then_offset(
        a in (0..=MAX_FILE_INDEX, 0..=MAX_BYTE_OFFSET),
        b in (0..=MAX_FILE_INDEX, 0..=MAX_BYTE_OFFSET),
    ) {
        prop_assert_eq!(data_location(a.0, a.1).cmp(&data_location(b.0, b.1)), a.cmp(&b));
    }
}

// =============================================================================
// Boundary Tests
// =============================================================================

#[test]
fn test_first_location_is_not_sentinel() {
    let location = data_location(0, 0);
    assert_eq!(location, 1 << 40);
    assert_eq!(file_index(location), 0);
    assert_eq!(byte_offset(location), 0);
}

#[test]
fn test_extreme_location() {
    let location = data_location(MAX_FILE_INDEX, MAX_BYTE_OFFSET);
    assert_eq!(location, u64::MAX);
    assert_eq!(file_index(location), MAX_FILE_INDEX);
    assert_eq!(byte_offset(location), MAX_BYTE_OFFSET);
}

// =============================================================================
// Display Tests
// =============================================================================

#[test]
fn test_display_location() {
    assert_eq!(DisplayLocation(data_location(3, 1234)).to_string(), "3:1234");
    assert_eq!(
        DisplayLocation(NON_EXISTENT_DATA_LOCATION).to_string(),
        "NON_EXISTENT"
    );
}
