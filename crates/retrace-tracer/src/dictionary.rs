//! Value ↔ index compaction dictionaries.
//!
//! A dictionary assigns each distinct domain value (contract address,
//! storage key, storage value) the next free integer index, so the trace
//! carries small indices instead of 20/32-byte values. The on-disk form is
//! the entries in insertion order, raw fixed-width bytes, no header —
//! reading the file back reconstructs the exact same mapping.

use alloy_primitives::{Address, B256};
use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::io;
use std::path::Path;

/// Errors from dictionary operations.
#[derive(Debug, thiserror::Error)]
pub enum DictionaryError {
    /// Every index of the dictionary's width is taken.
    #[error("dictionary exhausted, cannot assign a new index")]
    Exhausted,

    /// A decode asked for an index that was never assigned.
    #[error("index {index} out of range, dictionary holds {len} entries")]
    OutOfRange { index: u64, len: u64 },

    /// The on-disk file violates the fixed-width layout.
    #[error("dictionary file corrupted: {0}")]
    Corrupted(String),

    #[error("dictionary file i/o: {0}")]
    Io(#[from] io::Error),
}

/// A fixed-width value that can be stored in a dictionary file.
pub trait DictValue: Copy + Eq + Hash {
    /// Entry width in bytes on disk.
    const WIDTH: usize;

    fn write_to(&self, out: &mut Vec<u8>);
    fn from_slice(bytes: &[u8]) -> Self;
}

impl DictValue for Address {
    const WIDTH: usize = 20;

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_slice());
    }

    fn from_slice(bytes: &[u8]) -> Self {
        Address::from_slice(bytes)
    }
}

impl DictValue for B256 {
    const WIDTH: usize = 32;

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_slice());
    }

    fn from_slice(bytes: &[u8]) -> Self {
        B256::from_slice(bytes)
    }
}

/// An unsigned integer type serving as dictionary index.
pub trait DictIndex: Copy {
    /// Number of assignable indices; `encode` fails once this is reached.
    const CAPACITY: u64;

    fn from_ordinal(ordinal: u64) -> Self;
    fn ordinal(self) -> u64;
}

impl DictIndex for u32 {
    // The all-ones index stays unassigned, capping entries at 2^32 − 1.
    const CAPACITY: u64 = u32::MAX as u64;

    fn from_ordinal(ordinal: u64) -> Self {
        ordinal as u32
    }

    fn ordinal(self) -> u64 {
        self as u64
    }
}

impl DictIndex for u64 {
    const CAPACITY: u64 = u64::MAX;

    fn from_ordinal(ordinal: u64) -> Self {
        ordinal
    }

    fn ordinal(self) -> u64 {
        self
    }
}

/// Compacts contract addresses to `u32` indices.
pub type ContractDictionary = Dictionary<Address, u32>;
/// Compacts storage keys to `u32` indices.
pub type StorageDictionary = Dictionary<B256, u32>;
/// Compacts storage values to `u64` indices.
pub type ValueDictionary = Dictionary<B256, u64>;

/// Insertion-ordered bijection between values and `[0, n)` indices.
#[derive(Debug, Default)]
pub struct Dictionary<V, I> {
    value_to_index: HashMap<V, I>,
    index_to_value: Vec<V>,
}

impl<V: DictValue, I: DictIndex> Dictionary<V, I> {
    pub fn new() -> Self {
        Self {
            value_to_index: HashMap::new(),
            index_to_value: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index_to_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_to_value.is_empty()
    }

    /// Returns the index of `value`, assigning the next free one on first
    /// sight. Fails with `Exhausted` (leaving the dictionary unchanged)
    /// once the index width is used up.
    pub fn encode(&mut self, value: V) -> Result<I, DictionaryError> {
        if let Some(index) = self.value_to_index.get(&value) {
            return Ok(*index);
        }
        let ordinal = self.index_to_value.len() as u64;
        if ordinal >= I::CAPACITY {
            return Err(DictionaryError::Exhausted);
        }
        let index = I::from_ordinal(ordinal);
        self.value_to_index.insert(value, index);
        self.index_to_value.push(value);
        Ok(index)
    }

    /// Returns the value stored at `index`.
    pub fn decode(&self, index: I) -> Result<V, DictionaryError> {
        self.index_to_value
            .get(index.ordinal() as usize)
            .copied()
            .ok_or(DictionaryError::OutOfRange {
                index: index.ordinal(),
                len: self.index_to_value.len() as u64,
            })
    }

    /// Writes every entry in insertion order, truncating any existing file.
    pub fn write(&self, path: &Path) -> Result<(), DictionaryError> {
        let mut buf = Vec::with_capacity(self.index_to_value.len() * V::WIDTH);
        for value in &self.index_to_value {
            value.write_to(&mut buf);
        }
        fs::write(path, buf)?;
        Ok(())
    }

    /// Reads a dictionary back from disk. A missing file is an empty
    /// dictionary; a trailing partial entry or an entry count beyond the
    /// index width is `Corrupted`.
    pub fn read(path: &Path) -> Result<Self, DictionaryError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        if data.len() % V::WIDTH != 0 {
            return Err(DictionaryError::Corrupted(format!(
                "file length {} is not a multiple of the {}-byte entry width",
                data.len(),
                V::WIDTH,
            )));
        }
        let count = (data.len() / V::WIDTH) as u64;
        if count > I::CAPACITY {
            return Err(DictionaryError::Corrupted(format!(
                "{count} entries exceed the index width",
            )));
        }

        let mut dictionary = Self::new();
        for chunk in data.chunks_exact(V::WIDTH) {
            let value = V::from_slice(chunk);
            let index = I::from_ordinal(dictionary.index_to_value.len() as u64);
            // A duplicate entry keeps its first index, mirroring encode.
            dictionary.value_to_index.entry(value).or_insert(index);
            dictionary.index_to_value.push(value);
        }
        Ok(dictionary)
    }
}
