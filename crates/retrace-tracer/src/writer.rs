//! The trace writer: sole consumer of the operation channel.
//!
//! Producers enqueue operations; one dedicated thread dequeues them in
//! FIFO order and appends their serialized form to `trace.dat`. Block
//! framing never reaches the file — a BeginBlock records the current byte
//! offset and operation ordinal into the indexes and is dropped, an
//! EndBlock is dropped outright. Dropping every sender is the shutdown
//! signal: the channel drains, the file is flushed and closed.

use crate::index::{IndexContext, IndexError};
use crate::operation::{Operation, TraceError};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::debug;

/// Fixed name of the trace file inside the trace directory.
pub const TRACE_FILE: &str = "trace.dat";

/// Default bound of the operation channel between producers and the
/// writer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Errors that end a recording run.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("trace file i/o: {0}")]
    Io(#[from] io::Error),
}

/// Totals reported by the writer after it drains.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterReport {
    /// Writable operations appended to the trace.
    pub operations: u64,
    /// Bytes written.
    pub bytes: u64,
    /// Blocks opened via BeginBlock.
    pub blocks: u64,
}

/// Handle to the running writer thread.
pub struct TraceWriter {
    handle: thread::JoinHandle<Result<WriterReport, WriterError>>,
}

impl TraceWriter {
    /// Creates `trace.dat` in `trace_dir` (truncating any previous trace)
    /// and spawns the consumer thread over `ops`.
    pub fn spawn(
        trace_dir: &Path,
        ops: mpsc::Receiver<Operation>,
        indexes: Arc<IndexContext>,
    ) -> Result<Self, WriterError> {
        let file = File::create(trace_dir.join(TRACE_FILE))?;
        let handle = thread::Builder::new()
            .name("trace-writer".into())
            .spawn(move || run(file, ops, indexes))?;
        Ok(Self { handle })
    }

    /// Waits for the writer to drain and close the file. Call after every
    /// sender is dropped, otherwise this blocks forever.
    pub fn join(self) -> Result<WriterReport, WriterError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

fn run(
    file: File,
    mut ops: mpsc::Receiver<Operation>,
    indexes: Arc<IndexContext>,
) -> Result<WriterReport, WriterError> {
    let mut out = BufWriter::new(file);
    let mut report = WriterReport::default();
    let mut buf = Vec::with_capacity(32);

    while let Some(op) = ops.blocking_recv() {
        match op {
            Operation::BeginBlock { block } => {
                debug!(
                    target: "retrace::writer",
                    block,
                    offset = report.bytes,
                    ordinal = report.operations,
                    "begin block"
                );
                indexes.blocks.lock().unwrap().add(block, report.bytes)?;
                indexes
                    .operations
                    .lock()
                    .unwrap()
                    .add(block, report.operations)?;
                report.blocks += 1;
            }
            Operation::EndBlock { block } => {
                debug!(target: "retrace::writer", block, "end block");
            }
            op => {
                buf.clear();
                op.write(&mut buf)?;
                out.write_all(&buf)?;
                report.bytes += buf.len() as u64;
                report.operations += 1;
            }
        }
    }

    out.flush()?;
    Ok(report)
}
