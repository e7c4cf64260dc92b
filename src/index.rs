//! Key → data location index
//!
//! The index is owned outside the data file layer. The collection only reads
//! it; a key/value store writes it after each put, and a compactor rewrites
//! entries it moved. [`AtomicLocationIndex`] is a dense in-memory
//! implementation for contiguous numeric keys.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DataFileError, Result};
use crate::location::NON_EXISTENT_DATA_LOCATION;

/// Index mapping numeric keys to data locations.
///
/// One writer, many concurrent readers. A location stored by `put` must be
/// visible to any `get` that starts after `put` returned.
pub trait LocationIndex: Send + Sync {
    /// Location for `key`, or [`NON_EXISTENT_DATA_LOCATION`] if there is none
    fn get(&self, key: u64) -> u64;

    /// Store the location for `key`
    fn put(&self, key: u64, data_location: u64) -> Result<()>;

    /// Store `new_location` only if `key` still maps to `old_location`.
    /// Returns whether the entry was replaced.
    fn put_if_equal(&self, key: u64, old_location: u64, new_location: u64) -> Result<bool>;

    /// Called when the valid key range changes; entries outside it may be dropped
    fn update_valid_range(&self, _min_valid_key: u64, _max_valid_key: u64) {}
}

/// Dense, fixed-capacity index backed by one atomic slot per key
pub struct AtomicLocationIndex {
    locations: Box<[AtomicU64]>,
}

impl AtomicLocationIndex {
    /// Index for keys `0..capacity`
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            locations: (0..capacity)
                .map(|_| AtomicU64::new(NON_EXISTENT_DATA_LOCATION))
                .collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.locations.len()
    }

    fn slot(&self, key: u64) -> Result<&AtomicU64> {
        usize::try_from(key)
            .ok()
            .and_then(|k| self.locations.get(k))
            .ok_or_else(|| {
                DataFileError::Index(format!(
                    "Key {} is beyond index capacity {}",
                    key,
                    self.locations.len()
                ))
            })
    }
}

impl LocationIndex for AtomicLocationIndex {
    fn get(&self, key: u64) -> u64 {
        self.slot(key)
            .map(|slot| slot.load(Ordering::Acquire))
            .unwrap_or(NON_EXISTENT_DATA_LOCATION)
    }

    fn put(&self, key: u64, data_location: u64) -> Result<()> {
        self.slot(key)?.store(data_location, Ordering::Release);
        Ok(())
    }

    fn put_if_equal(&self, key: u64, old_location: u64, new_location: u64) -> Result<bool> {
        Ok(self
            .slot(key)?
            .compare_exchange(old_location, new_location, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    /// Clears every slot outside `[min_valid_key, max_valid_key]`
    fn update_valid_range(&self, min_valid_key: u64, max_valid_key: u64) {
        for (key, slot) in self.locations.iter().enumerate() {
            let key = key as u64;
            if key < min_valid_key || key > max_valid_key {
                slot.store(NON_EXISTENT_DATA_LOCATION, Ordering::Release);
            }
        }
    }
}
