//! Drivers that tie the tracer to a substate source: `record` runs
//! transactions through the recording proxy and produces a trace,
//! `replay` reads the trace back and validates the reconstructed state.

pub mod executor;
pub mod record;
pub mod replay;
pub mod substate;

pub use executor::{AllocWalkExecutor, ExecutionError, TransactionExecutor};
pub use record::{record, RecordConfig, RecordError, RecordSummary};
pub use replay::{replay, ReplayConfig, ReplayError, ReplaySummary};
pub use substate::{
    JsonSubstateFile, SubstateEnv, SubstateError, SubstateMessage, SubstateRecord, SubstateResult,
    SubstateSource,
};
