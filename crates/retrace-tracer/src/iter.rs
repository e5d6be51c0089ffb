//! Reading a recorded trace back in order.
//!
//! The iterator serves a block range `[first, last]`: it seeks to the
//! indexed offset of `first` and stops before the first operation of any
//! block past `last` (that boundary offset is captured from the block
//! index when the iterator opens). Within the range, transaction framing
//! is up to the caller via the EndTransaction markers in the stream.

use crate::index::{BlockIndex, IndexError};
use crate::operation::{Operation, TraceError};
use crate::writer::TRACE_FILE;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Errors opening or driving a trace iterator.
#[derive(Debug, thiserror::Error)]
pub enum IteratorError {
    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Sequential reader over the writable operations of a trace.
pub struct TraceIterator {
    input: BufReader<File>,
    /// Byte offset of the next operation.
    offset: u64,
    /// Offset of the first operation past the block range, if any block
    /// beyond it is indexed.
    end: Option<u64>,
    current: Option<Operation>,
}

impl TraceIterator {
    /// Opens `trace.dat` in `trace_dir` positioned at the first operation
    /// of `first` (or of the nearest indexed block below it). Fails with
    /// `Missing` when the index knows no block at or below `first`.
    pub fn open(
        trace_dir: &Path,
        blocks: &BlockIndex,
        first: u64,
        last: u64,
    ) -> Result<Self, IteratorError> {
        let file = File::open(trace_dir.join(TRACE_FILE)).map_err(TraceError::from)?;
        let (seek_block, offset) = blocks.seek(first).ok_or(IndexError::Missing(first))?;
        let end = blocks.next_offset_after(last);

        let mut input = BufReader::new(file);
        input
            .seek(SeekFrom::Start(offset))
            .map_err(TraceError::from)?;

        debug!(
            target: "retrace::replay",
            first,
            last,
            seek_block,
            offset,
            end = end.unwrap_or(u64::MAX),
            "trace opened"
        );
        Ok(Self {
            input,
            offset,
            end,
            current: None,
        })
    }

    /// Next operation of the range, `None` once the range or the file is
    /// exhausted.
    pub fn next_op(&mut self) -> Result<Option<Operation>, TraceError> {
        if let Some(end) = self.end {
            if self.offset >= end {
                self.current = None;
                return Ok(None);
            }
        }
        match Operation::read(&mut self.input)? {
            Some(op) => {
                self.offset += op.encoded_len();
                self.current = Some(op.clone());
                Ok(Some(op))
            }
            None => {
                self.current = None;
                Ok(None)
            }
        }
    }

    /// The most recently read operation.
    pub fn current(&self) -> Option<&Operation> {
        self.current.as_ref()
    }

    /// Byte offset of the next operation; useful in failure reports.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Iterator for TraceIterator {
    type Item = Result<Operation, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_op().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("retrace-iter-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Writes one `GetState{block, block}` + EndTransaction pair per block
    /// and returns the matching index.
    fn write_blocks(dir: &std::path::Path, blocks: &[u64]) -> BlockIndex {
        let mut index = BlockIndex::new();
        let mut data = Vec::new();
        for block in blocks {
            index.add(*block, data.len() as u64).unwrap();
            let op = Operation::GetState {
                contract: *block as u32,
                key: *block as u32,
            };
            op.write(&mut data).unwrap();
            Operation::EndTransaction.write(&mut data).unwrap();
        }
        fs::write(dir.join(TRACE_FILE), data).unwrap();
        index
    }

    #[test]
    fn test_iterates_whole_range() {
        let dir = temp_dir("whole");
        let index = write_blocks(&dir, &[1, 2, 3]);

        let mut iter = TraceIterator::open(&dir, &index, 1, 3).unwrap();
        let mut get_states = 0;
        while let Some(op) = iter.next_op().unwrap() {
            if matches!(op, Operation::GetState { .. }) {
                get_states += 1;
            }
        }
        assert_eq!(get_states, 3);
        assert!(iter.current().is_none());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_seek_starts_mid_trace() {
        let dir = temp_dir("seek");
        let index = write_blocks(&dir, &[10, 11, 12]);

        let mut iter = TraceIterator::open(&dir, &index, 11, 12).unwrap();
        let first = iter.next_op().unwrap().unwrap();
        assert_eq!(first, Operation::GetState { contract: 11, key: 11 });

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_stops_before_block_past_last() {
        let dir = temp_dir("bounded");
        let index = write_blocks(&dir, &[1, 2, 3]);

        let mut iter = TraceIterator::open(&dir, &index, 1, 2).unwrap();
        let mut ops = Vec::new();
        while let Some(op) = iter.next_op().unwrap() {
            ops.push(op);
        }
        // Two blocks, two operations each; block 3 is never yielded.
        assert_eq!(ops.len(), 4);
        assert!(!ops.contains(&Operation::GetState { contract: 3, key: 3 }));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_open_unindexed_block_is_missing() {
        let dir = temp_dir("missing");
        let index = write_blocks(&dir, &[5]);

        assert!(matches!(
            TraceIterator::open(&dir, &index, 4, 10),
            Err(IteratorError::Index(IndexError::Missing(4)))
        ));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_current_tracks_last_operation() {
        let dir = temp_dir("current");
        let index = write_blocks(&dir, &[1]);

        let mut iter = TraceIterator::open(&dir, &index, 1, 1).unwrap();
        assert!(iter.current().is_none());
        iter.next_op().unwrap();
        assert_eq!(
            iter.current(),
            Some(&Operation::GetState { contract: 1, key: 1 })
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_truncated_trace_is_an_error_not_eof() {
        let dir = temp_dir("truncated");
        let index = write_blocks(&dir, &[1]);
        // Chop into the middle of the GetState payload.
        let data = fs::read(dir.join(TRACE_FILE)).unwrap();
        fs::write(dir.join(TRACE_FILE), &data[..5]).unwrap();

        let mut iter = TraceIterator::open(&dir, &index, 1, 1).unwrap();
        assert!(matches!(
            iter.next_op(),
            Err(TraceError::Truncated("GetState"))
        ));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_iterator_adapter() {
        let dir = temp_dir("adapter");
        let index = write_blocks(&dir, &[1, 2]);

        let iter = TraceIterator::open(&dir, &index, 1, 2).unwrap();
        let ops: Result<Vec<_>, _> = iter.collect();
        assert_eq!(ops.unwrap().len(), 4);

        fs::remove_dir_all(&dir).unwrap();
    }
}
