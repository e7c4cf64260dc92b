//! Immutable list of data file readers, keyed by file index.
//!
//! Never modified in place: additions and deletions build a new list which the
//! collection swaps in atomically. Anyone iterating holds their own `Arc` to
//! the list they started with.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;

use super::DataFileReader;

#[derive(Default)]
pub(crate) struct ReaderList {
    readers: BTreeMap<u32, Arc<DataFileReader>>,
}

impl ReaderList {
    pub(crate) fn from_readers<I>(readers: I) -> Self
    where
        I: IntoIterator<Item = Arc<DataFileReader>>,
    {
        Self {
            readers: readers.into_iter().map(|r| (r.index(), r)).collect(),
        }
    }

    /// Copy of this list with `reader` added
    pub(crate) fn with_added(&self, reader: Arc<DataFileReader>) -> Self {
        let mut readers = self.readers.clone();
        readers.insert(reader.index(), reader);
        Self { readers }
    }

    /// Copy of this list without the given file indices
    pub(crate) fn with_deleted(&self, indices: &HashSet<u32>) -> Self {
        Self {
            readers: self
                .readers
                .iter()
                .filter(|(index, _)| !indices.contains(index))
                .map(|(index, reader)| (*index, Arc::clone(reader)))
                .collect(),
        }
    }

    pub(crate) fn get(&self, index: u32) -> Option<&Arc<DataFileReader>> {
        self.readers.get(&index)
    }

    /// Readers in file index order
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<DataFileReader>> {
        self.readers.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.readers.len()
    }

    /// File indices as compact ranges, e.g. "0-3,5,7-8"
    pub(crate) fn pretty_indices(&self) -> String {
        let mut out = String::new();
        let mut indices = self.readers.keys().copied().peekable();
        while let Some(start) = indices.next() {
            let mut end = start;
            while indices.peek() == Some(&(end + 1)) {
                end += 1;
                indices.next();
            }
            if !out.is_empty() {
                out.push(',');
            }
            if start == end {
                let _ = write!(out, "{}", start);
            } else {
                let _ = write!(out, "{}-{}", start, end);
            }
        }
        out
    }
}
