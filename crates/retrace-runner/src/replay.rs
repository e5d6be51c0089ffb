//! The replay driver.
//!
//! Loads the dictionaries and indexes written by a recording run, seeks
//! the trace iterator to the first requested block, and drives a fresh
//! in-memory DB per transaction: operations execute until the
//! EndTransaction marker, then the post-state storage is checked against
//! the recorded output allocation. Balances and nonces are not part of
//! the trace and are not compared.

use crate::substate::SubstateSource;
use retrace_state::{InMemoryStateDb, StateDb};
use retrace_tracer::{
    DictionaryContext, DictionaryError, IndexContext, IndexError, IteratorError, Operation,
    TraceError, TraceIterator,
};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Parameters of a replay run over blocks `[first, last]`.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub trace_dir: PathBuf,
    pub first: u64,
    pub last: u64,
}

impl ReplayConfig {
    pub fn new(trace_dir: impl Into<PathBuf>, first: u64, last: u64) -> Self {
        Self {
            trace_dir: trace_dir.into(),
            first,
            last,
        }
    }
}

/// Errors that abort a replay run. A corrupt trace or mismatched
/// dictionary has no recovery path.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("first block {first} is past last block {last}")]
    InvalidRange { first: u64, last: u64 },

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Dictionary(#[from] DictionaryError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Iterator(#[from] IteratorError),
}

/// Totals of a completed replay run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaySummary {
    pub transactions: u64,
    pub operations: u64,
    /// Storage divergences against the recorded output allocations.
    pub divergences: u64,
}

/// Replays the trace in `trace_dir` against the substates of
/// `[first, last]`.
pub fn replay<S: SubstateSource>(
    config: &ReplayConfig,
    source: &S,
) -> Result<ReplaySummary, ReplayError> {
    if config.first > config.last {
        return Err(ReplayError::InvalidRange {
            first: config.first,
            last: config.last,
        });
    }

    let dicts = DictionaryContext::read_all(&config.trace_dir)?;
    let indexes = IndexContext::read_all(&config.trace_dir)?;
    let mut iter = {
        let blocks = indexes.blocks.lock().unwrap();
        TraceIterator::open(&config.trace_dir, &blocks, config.first, config.last)?
    };
    let mut sequence = indexes
        .operations
        .lock()
        .unwrap()
        .first_ordinal_at(config.first);

    info!(
        target: "retrace::replay",
        first = config.first,
        last = config.last,
        trace_dir = %config.trace_dir.display(),
        "replay started"
    );

    let mut summary = ReplaySummary::default();
    let mut trace_done = false;

    for substate in source.iter_from(config.first) {
        if substate.block > config.last {
            break;
        }
        if trace_done {
            warn!(
                target: "retrace::replay",
                block = substate.block,
                tx_index = substate.tx_index,
                "trace exhausted before the substate range"
            );
            break;
        }

        let mut db = InMemoryStateDb::from_alloc(&substate.input);
        loop {
            let op = match iter.next_op() {
                Ok(Some(op)) => op,
                Ok(None) => {
                    trace_done = true;
                    break;
                }
                Err(err) => {
                    error!(
                        target: "retrace::replay",
                        offset = iter.offset(),
                        error = %err,
                        "trace read failed"
                    );
                    return Err(err.into());
                }
            };
            op.debug(&dicts, sequence);
            sequence += 1;
            summary.operations += 1;

            let end_of_transaction = matches!(op, Operation::EndTransaction);
            if let Err(err) = op.execute(&mut db, &dicts) {
                error!(
                    target: "retrace::replay",
                    tag = op.tag(),
                    offset = iter.offset(),
                    error = %err,
                    "operation failed"
                );
                return Err(err.into());
            }
            if end_of_transaction {
                break;
            }
        }

        db.finalise(true);
        let divergences = substate.output.diff_storage(&db.get_substate_post_alloc());
        for divergence in &divergences {
            warn!(
                target: "retrace::replay",
                block = substate.block,
                tx_index = substate.tx_index,
                %divergence,
                "state divergence"
            );
        }
        summary.divergences += divergences.len() as u64;
        summary.transactions += 1;
    }

    info!(
        target: "retrace::replay",
        transactions = summary.transactions,
        operations = summary.operations,
        divergences = summary.divergences,
        "replay finished"
    );
    Ok(summary)
}
