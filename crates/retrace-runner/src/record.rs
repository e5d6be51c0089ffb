//! The recording driver.
//!
//! Orchestrates one recording session: a fresh dictionary and index
//! context, the bounded operation channel, the writer thread, and the
//! block/transaction framing around each executed substate. Whatever
//! happens mid-run, the dictionaries and indexes collected so far are
//! flushed before the driver returns.

use crate::executor::{ExecutionError, TransactionExecutor};
use crate::substate::SubstateSource;
use retrace_state::{InMemoryStateDb, StateDb};
use retrace_tracer::{
    DictionaryContext, DictionaryError, IndexContext, IndexError, Operation, RecordingStateDb,
    TraceWriter, WriterError, DEFAULT_QUEUE_CAPACITY,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::{fs, io};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Parameters of a recording run over blocks `[first, last]`.
#[derive(Debug, Clone)]
pub struct RecordConfig {
    pub trace_dir: PathBuf,
    pub first: u64,
    pub last: u64,
    /// Bound of the operation channel between the execution context and
    /// the writer.
    pub queue_capacity: usize,
}

impl RecordConfig {
    pub fn new(trace_dir: impl Into<PathBuf>, first: u64, last: u64) -> Self {
        Self {
            trace_dir: trace_dir.into(),
            first,
            last,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Errors that abort a recording run.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("first block {first} is past last block {last}")]
    InvalidRange { first: u64, last: u64 },

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error(transparent)]
    Dictionary(#[from] DictionaryError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("trace directory: {0}")]
    Io(#[from] io::Error),
}

/// Totals of a completed recording run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordSummary {
    pub blocks: u64,
    pub transactions: u64,
    /// Writable operations in the trace.
    pub operations: u64,
    /// Size of the trace file in bytes.
    pub bytes: u64,
    /// Transactions whose executed post-state diverged from the recorded
    /// output allocation.
    pub mismatched_transactions: u64,
}

/// Records the substates of `[first, last]` into `trace_dir`.
///
/// Each transaction runs through `executor` against an in-memory DB primed
/// with its input allocation and wrapped by the recording proxy; the
/// executed post-state is cross-checked against the recorded output
/// allocation as it was in the original run.
pub fn record<S, E>(
    config: &RecordConfig,
    source: &S,
    executor: &E,
) -> Result<RecordSummary, RecordError>
where
    S: SubstateSource,
    E: TransactionExecutor,
{
    if config.first > config.last {
        return Err(RecordError::InvalidRange {
            first: config.first,
            last: config.last,
        });
    }
    fs::create_dir_all(&config.trace_dir)?;

    let dicts = Arc::new(DictionaryContext::new());
    let indexes = Arc::new(IndexContext::new());
    let (ops, rx) = mpsc::channel(config.queue_capacity.max(1));
    let writer = TraceWriter::spawn(&config.trace_dir, rx, indexes.clone())?;

    info!(
        target: "retrace::record",
        first = config.first,
        last = config.last,
        trace_dir = %config.trace_dir.display(),
        "recording started"
    );

    let mut summary = RecordSummary::default();
    let mut current_block: Option<u64> = None;
    let mut failure: Option<RecordError> = None;

    // A failed send means the writer stopped early; its join result below
    // carries the actual cause.
    'records: for substate in source.iter_from(config.first) {
        if current_block != Some(substate.block) {
            if let Some(previous) = current_block {
                if ops
                    .blocking_send(Operation::EndBlock { block: previous })
                    .is_err()
                {
                    break 'records;
                }
            }
            if substate.block > config.last {
                current_block = None;
                break;
            }
            debug!(target: "retrace::record", block = substate.block, "block opened");
            if ops
                .blocking_send(Operation::BeginBlock {
                    block: substate.block,
                })
                .is_err()
            {
                current_block = None;
                break;
            }
            current_block = Some(substate.block);
            summary.blocks += 1;
        }

        let inner = InMemoryStateDb::from_alloc(&substate.input);
        let mut proxy = RecordingStateDb::new(inner, dicts.clone(), ops.clone());
        if let Err(err) = executor.execute(substate, &mut proxy) {
            failure = Some(err.into());
            break;
        }

        let divergences = substate.output.diff(&proxy.get_substate_post_alloc());
        if !divergences.is_empty() {
            summary.mismatched_transactions += 1;
            warn!(
                target: "retrace::record",
                block = substate.block,
                tx_index = substate.tx_index,
                divergences = divergences.len(),
                "executed state diverges from recorded output"
            );
        }
        drop(proxy);

        if ops.blocking_send(Operation::EndTransaction).is_err() {
            break;
        }
        summary.transactions += 1;
    }
    if let Some(previous) = current_block {
        let _ = ops.blocking_send(Operation::EndBlock { block: previous });
    }
    drop(ops);

    let writer_result = writer.join();

    // Flush what was collected even when the run failed; a truncated trace
    // with intact dictionaries is still inspectable.
    let flush_result = dicts
        .write_all(&config.trace_dir)
        .map_err(RecordError::from)
        .and_then(|_| {
            indexes
                .write_all(&config.trace_dir)
                .map_err(RecordError::from)
        });

    let report = match writer_result {
        Ok(report) => report,
        Err(err) => {
            if let Err(flush_err) = flush_result {
                warn!(target: "retrace::record", error = %flush_err, "flush after writer failure");
            }
            return Err(err.into());
        }
    };
    if let Some(err) = failure {
        if let Err(flush_err) = flush_result {
            warn!(target: "retrace::record", error = %flush_err, "flush after execution failure");
        }
        return Err(err);
    }
    flush_result?;

    summary.operations = report.operations;
    summary.bytes = report.bytes;
    let (contracts, storage_keys, values) = dicts.entry_counts();
    info!(
        target: "retrace::record",
        blocks = summary.blocks,
        transactions = summary.transactions,
        operations = summary.operations,
        bytes = summary.bytes,
        contracts,
        storage_keys,
        values,
        "recording finished"
    );
    Ok(summary)
}
