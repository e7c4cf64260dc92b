//! Valid key range
//!
//! Keys outside the range are logically deleted. Nothing is removed from disk
//! until the next compaction drops them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Inclusive `[min_valid_key, max_valid_key]` bounds.
/// A range with `min > max` contains no keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    min_valid_key: u64,
    max_valid_key: u64,
}

impl KeyRange {
    /// The range every new collection starts with; contains no keys
    pub const INVALID: KeyRange = KeyRange {
        min_valid_key: 1,
        max_valid_key: 0,
    };

    pub const fn new(min_valid_key: u64, max_valid_key: u64) -> Self {
        Self {
            min_valid_key,
            max_valid_key,
        }
    }

    pub fn min_valid_key(&self) -> u64 {
        self.min_valid_key
    }

    pub fn max_valid_key(&self) -> u64 {
        self.max_valid_key
    }

    /// True if `key` is within the inclusive bounds
    pub fn within_range(&self, key: u64) -> bool {
        key >= self.min_valid_key && key <= self.max_valid_key
    }

    pub fn is_empty(&self) -> bool {
        self.min_valid_key > self.max_valid_key
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..={}]", self.min_valid_key, self.max_valid_key)
    }
}
