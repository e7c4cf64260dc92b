//! # merkle-datafiles
//!
//! Append-only, file-backed key/value storage for a hash-tree state store:
//! - Compact 64-bit data locations (file index + byte offset)
//! - Sequential bulk writes through memory-mapped windows
//! - Highly concurrent random reads, safe against a running compaction
//! - Zero-copy snapshots by hard-linking sealed files
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              MemoryIndexDiskKeyValueStore                    │
//! │          (dense numeric keys, valid key range)               │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!        ┌───────────────┐            ┌───────────────────┐
//!        │ LocationIndex │            │ DataFileCollection│
//!        │ (key → loc)   │            │ (ArcSwap readers) │
//!        └───────────────┘            └─────────┬─────────┘
//!                                               │
//!                              ┌────────────────┼────────────────┐
//!                              ▼                ▼                ▼
//!                      ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//!                      │DataFileWriter│ │DataFileReader│ │  Iterator    │
//!                      │ (mmap, 1 thr)│ │ (pread pool) │ │ (replay)     │
//!                      └──────────────┘ └──────────────┘ └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod location;
pub mod key_range;
pub mod files;
pub mod index;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DataFileError, Result};
pub use config::Config;
pub use files::{
    DataFileCollection, DataFileIterator, DataFileMetadata, DataFileReader, DataFileWriter,
    FileSizeStatistics, LoadedDataCallback,
};
pub use index::{AtomicLocationIndex, LocationIndex};
pub use key_range::KeyRange;
pub use location::{DisplayLocation, NON_EXISTENT_DATA_LOCATION};
pub use store::MemoryIndexDiskKeyValueStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of merkle-datafiles
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
