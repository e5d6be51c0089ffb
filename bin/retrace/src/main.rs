use clap::{Parser, Subcommand};
use retrace_runner::{
    record, replay, AllocWalkExecutor, JsonSubstateFile, RecordConfig, ReplayConfig,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retrace", about = "State-operation trace recorder and replayer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Executes the substates of a block range and records the resulting
    /// state-DB operations into a trace.
    Trace {
        /// First block of the inclusive range.
        block_num_first: u64,
        /// Last block of the inclusive range.
        block_num_last: u64,
        /// Directory for the trace, dictionary and index files.
        #[arg(long, default_value = "./")]
        trace_dir: PathBuf,
        /// Substate fixture file (JSON array of per-transaction records).
        #[arg(long)]
        substates: PathBuf,
        /// Chain the substates belong to; recorded in the run log.
        #[arg(long, default_value_t = 250)]
        chain_id: u64,
    },
    /// Replays a recorded trace against fresh state and validates it.
    TraceReplay {
        /// First block of the inclusive range.
        block_num_first: u64,
        /// Last block of the inclusive range.
        block_num_last: u64,
        /// Directory holding the trace, dictionary and index files.
        #[arg(long, default_value = "./")]
        trace_dir: PathBuf,
        /// Substate fixture file (JSON array of per-transaction records).
        #[arg(long)]
        substates: PathBuf,
    },
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Trace {
            block_num_first,
            block_num_last,
            trace_dir,
            substates,
            chain_id,
        } => {
            let source = JsonSubstateFile::load(&substates)?;
            info!(
                target: "retrace::cli",
                chain_id,
                substates = source.len(),
                "substate fixture loaded"
            );

            let config = RecordConfig::new(trace_dir, block_num_first, block_num_last);
            let summary = record(&config, &source, &AllocWalkExecutor::new())?;
            if summary.mismatched_transactions > 0 {
                eyre::bail!(
                    "{} of {} transactions diverged from their recorded output",
                    summary.mismatched_transactions,
                    summary.transactions
                );
            }
        }
        Command::TraceReplay {
            block_num_first,
            block_num_last,
            trace_dir,
            substates,
        } => {
            let source = JsonSubstateFile::load(&substates)?;
            let config = ReplayConfig::new(trace_dir, block_num_first, block_num_last);
            let summary = replay(&config, &source)?;
            if summary.divergences > 0 {
                eyre::bail!(
                    "replay diverged in {} place(s) across {} transactions",
                    summary.divergences,
                    summary.transactions
                );
            }
        }
    }
    Ok(())
}
