//! Block-aligned indexes into the trace.
//!
//! The trace file itself carries no block markers; the writer records, per
//! block, the byte offset and the ordinal of its first operation. Replay
//! seeks with the byte offsets and uses the ordinals to attach sequence
//! numbers to what it reads.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::ops::Bound;
use std::path::Path;
use std::sync::Mutex;

pub const BLOCK_INDEX_FILE: &str = "block-index.dat";
pub const OPERATION_INDEX_FILE: &str = "operation-index.dat";

/// Errors from index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("block {0} already indexed")]
    Duplicate(u64),

    #[error("block {0} not indexed")]
    Missing(u64),

    #[error("index file corrupted: {0}")]
    Corrupted(String),

    #[error("index file i/o: {0}")]
    Io(#[from] io::Error),
}

/// Maps a block number to the byte offset of its first operation in the
/// trace file.
#[derive(Debug, Default)]
pub struct BlockIndex {
    entries: BTreeMap<u64, u64>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binds `block` to `offset`. A block already bound keeps its first
    /// offset and the call fails with `Duplicate`.
    pub fn add(&mut self, block: u64, offset: u64) -> Result<(), IndexError> {
        if self.entries.contains_key(&block) {
            return Err(IndexError::Duplicate(block));
        }
        self.entries.insert(block, offset);
        Ok(())
    }

    pub fn get(&self, block: u64) -> Result<u64, IndexError> {
        self.entries
            .get(&block)
            .copied()
            .ok_or(IndexError::Missing(block))
    }

    /// The greatest indexed block ≤ `block`, with its offset.
    pub fn seek(&self, block: u64) -> Option<(u64, u64)> {
        self.entries
            .range(..=block)
            .next_back()
            .map(|(b, o)| (*b, *o))
    }

    /// Offset of the first indexed block strictly greater than `block`.
    pub fn next_offset_after(&self, block: u64) -> Option<u64> {
        self.entries
            .range((Bound::Excluded(block), Bound::Unbounded))
            .next()
            .map(|(_, o)| *o)
    }

    pub fn write(&self, path: &Path) -> Result<(), IndexError> {
        write_records(&self.entries, path)
    }

    pub fn read(path: &Path) -> Result<Self, IndexError> {
        let mut index = Self::new();
        for (block, offset) in read_records(path)? {
            index
                .add(block, offset)
                .map_err(|_| IndexError::Corrupted(format!("block {block} appears twice")))?;
        }
        Ok(index)
    }
}

/// Maps a block number to the ordinal of its first operation in the trace.
#[derive(Debug, Default)]
pub struct OperationIndex {
    entries: BTreeMap<u64, u64>,
}

impl OperationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add(&mut self, block: u64, ordinal: u64) -> Result<(), IndexError> {
        if self.entries.contains_key(&block) {
            return Err(IndexError::Duplicate(block));
        }
        self.entries.insert(block, ordinal);
        Ok(())
    }

    pub fn get(&self, block: u64) -> Result<u64, IndexError> {
        self.entries
            .get(&block)
            .copied()
            .ok_or(IndexError::Missing(block))
    }

    /// Ordinal of the first operation of the greatest indexed block ≤
    /// `block`; zero when nothing is indexed that low.
    pub fn first_ordinal_at(&self, block: u64) -> u64 {
        self.entries
            .range(..=block)
            .next_back()
            .map(|(_, ordinal)| *ordinal)
            .unwrap_or(0)
    }

    pub fn write(&self, path: &Path) -> Result<(), IndexError> {
        write_records(&self.entries, path)
    }

    pub fn read(path: &Path) -> Result<Self, IndexError> {
        let mut index = Self::new();
        for (block, ordinal) in read_records(path)? {
            index
                .add(block, ordinal)
                .map_err(|_| IndexError::Corrupted(format!("block {block} appears twice")))?;
        }
        Ok(index)
    }
}

/// Record layout shared by both indexes: `(u64 LE, u64 LE)` pairs, no
/// header.
fn write_records(entries: &BTreeMap<u64, u64>, path: &Path) -> Result<(), IndexError> {
    let mut buf = Vec::with_capacity(entries.len() * 16);
    for (block, value) in entries {
        buf.extend_from_slice(&block.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }
    fs::write(path, buf)?;
    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<(u64, u64)>, IndexError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err.into()),
    };
    if data.len() % 16 != 0 {
        return Err(IndexError::Corrupted(format!(
            "file length {} is not a multiple of the 16-byte record",
            data.len(),
        )));
    }
    Ok(data
        .chunks_exact(16)
        .map(|chunk| {
            (
                u64::from_le_bytes(chunk[..8].try_into().unwrap()),
                u64::from_le_bytes(chunk[8..].try_into().unwrap()),
            )
        })
        .collect())
}

/// Both trace indexes behind one shared handle; the writer populates them,
/// the driver flushes them.
#[derive(Debug, Default)]
pub struct IndexContext {
    pub blocks: Mutex<BlockIndex>,
    pub operations: Mutex<OperationIndex>,
}

impl IndexContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_all(dir: &Path) -> Result<Self, IndexError> {
        Ok(Self {
            blocks: Mutex::new(BlockIndex::read(&dir.join(BLOCK_INDEX_FILE))?),
            operations: Mutex::new(OperationIndex::read(&dir.join(OPERATION_INDEX_FILE))?),
        })
    }

    pub fn write_all(&self, dir: &Path) -> Result<(), IndexError> {
        self.blocks
            .lock()
            .unwrap()
            .write(&dir.join(BLOCK_INDEX_FILE))?;
        self.operations
            .lock()
            .unwrap()
            .write(&dir.join(OPERATION_INDEX_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("retrace-index-{name}-{}", std::process::id()))
    }

    #[test]
    fn test_add_then_get() {
        let mut index = BlockIndex::new();
        index.add(7, 1234).unwrap();
        assert_eq!(index.get(7).unwrap(), 1234);
    }

    #[test]
    fn test_duplicate_add_keeps_first_binding() {
        let mut index = BlockIndex::new();
        index.add(7, 100).unwrap();

        let err = index.add(7, 200).unwrap_err();
        assert!(matches!(err, IndexError::Duplicate(7)));
        assert_eq!(index.get(7).unwrap(), 100);
    }

    #[test]
    fn test_get_missing_block() {
        let index = BlockIndex::new();
        assert!(matches!(index.get(1), Err(IndexError::Missing(1))));
    }

    #[test]
    fn test_seek_finds_nearest_block_below() {
        let mut index = BlockIndex::new();
        index.add(10, 0).unwrap();
        index.add(20, 500).unwrap();

        assert_eq!(index.seek(10), Some((10, 0)));
        assert_eq!(index.seek(15), Some((10, 0)));
        assert_eq!(index.seek(25), Some((20, 500)));
        assert_eq!(index.seek(9), None);
    }

    #[test]
    fn test_next_offset_after() {
        let mut index = BlockIndex::new();
        index.add(10, 0).unwrap();
        index.add(20, 500).unwrap();

        assert_eq!(index.next_offset_after(10), Some(500));
        assert_eq!(index.next_offset_after(20), None);
        assert_eq!(index.next_offset_after(u64::MAX), None);
    }

    #[test]
    fn test_write_read_preserves_entries() {
        let path = temp_path("roundtrip");
        let mut index = BlockIndex::new();
        index.add(1, 0).unwrap();
        index.add(2, 17).unwrap();
        index.add(900, 12_345).unwrap();
        index.write(&path).unwrap();

        let restored = BlockIndex::read(&path).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.get(1).unwrap(), 0);
        assert_eq!(restored.get(2).unwrap(), 17);
        assert_eq!(restored.get(900).unwrap(), 12_345);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let path = temp_path("missing");
        let _ = fs::remove_file(&path);

        assert!(BlockIndex::read(&path).unwrap().is_empty());
        assert!(OperationIndex::read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_read_partial_record_is_corrupted() {
        let path = temp_path("partial");
        fs::write(&path, [0u8; 21]).unwrap();

        assert!(matches!(
            BlockIndex::read(&path),
            Err(IndexError::Corrupted(_))
        ));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_duplicate_record_is_corrupted() {
        let path = temp_path("duplicate");
        let mut data = Vec::new();
        for offset in [0u64, 99] {
            data.extend_from_slice(&5u64.to_le_bytes());
            data.extend_from_slice(&offset.to_le_bytes());
        }
        fs::write(&path, data).unwrap();

        assert!(matches!(
            BlockIndex::read(&path),
            Err(IndexError::Corrupted(_))
        ));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_operation_index_first_ordinal() {
        let mut index = OperationIndex::new();
        index.add(10, 0).unwrap();
        index.add(11, 2).unwrap();

        assert_eq!(index.first_ordinal_at(10), 0);
        assert_eq!(index.first_ordinal_at(11), 2);
        assert_eq!(index.first_ordinal_at(12), 2);
        assert_eq!(index.first_ordinal_at(9), 0);
    }

    #[test]
    fn test_index_context_roundtrip() {
        let dir = std::env::temp_dir().join(format!("retrace-ictx-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let ctx = IndexContext::new();
        ctx.blocks.lock().unwrap().add(3, 42).unwrap();
        ctx.operations.lock().unwrap().add(3, 7).unwrap();
        ctx.write_all(&dir).unwrap();

        let restored = IndexContext::read_all(&dir).unwrap();
        assert_eq!(restored.blocks.lock().unwrap().get(3).unwrap(), 42);
        assert_eq!(restored.operations.lock().unwrap().get(3).unwrap(), 7);

        fs::remove_dir_all(&dir).unwrap();
    }
}
