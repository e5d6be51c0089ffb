//! Transaction executors: the state-DB clients driven during recording.
//!
//! The VM interpreter is an external collaborator; `TransactionExecutor`
//! is the seam it plugs into. `AllocWalkExecutor` is the bundled stand-in:
//! instead of interpreting bytecode it walks a substate's input→output
//! transition and issues the state-DB calls that transition implies, which
//! is enough to produce faithful, replayable traces.

use crate::substate::SubstateRecord;
use alloy_primitives::{B256, U256};
use retrace_state::StateDb;

/// A transaction execution failure, fatal to the recording run.
#[derive(Debug, thiserror::Error)]
#[error("transaction execution failed: {0}")]
pub struct ExecutionError(pub String);

/// Executes one transaction against a state DB.
pub trait TransactionExecutor {
    fn execute(&self, record: &SubstateRecord, db: &mut dyn StateDb) -> Result<(), ExecutionError>;
}

/// Deterministic stand-in for the VM.
///
/// Per transaction it takes a snapshot, touches the sender and callee the
/// way an interpreter would, applies every account and storage change the
/// output allocation calls for, reverts if the recorded result is a
/// failure, and finalises. Iteration follows the allocation's BTreeMap
/// order, so the produced trace is stable for a given substate.
#[derive(Debug, Default)]
pub struct AllocWalkExecutor;

impl AllocWalkExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl TransactionExecutor for AllocWalkExecutor {
    fn execute(&self, record: &SubstateRecord, db: &mut dyn StateDb) -> Result<(), ExecutionError> {
        db.prepare(B256::with_last_byte(0x02), record.tx_index as usize);
        let snapshot = db.snapshot();

        let sender = record.message.from;
        db.exist(sender);
        db.get_balance(sender);
        if let Some(to) = record.message.to {
            db.get_code_hash(to);
        }

        for (address, target) in &record.output.accounts {
            let existing = record.input.get(address);
            if existing.is_none() && !db.exist(*address) {
                db.create_account(*address);
            }

            let balance = db.get_balance(*address);
            if balance < target.balance {
                db.add_balance(*address, target.balance - balance);
            } else if balance > target.balance {
                db.sub_balance(*address, balance - target.balance);
            }
            if db.get_nonce(*address) != target.nonce {
                db.set_nonce(*address, target.nonce);
            }
            if db.get_code(*address) != target.code {
                db.set_code(*address, target.code.clone());
            }

            for (key, value) in &target.storage {
                if db.get_state(*address, *key) != *value {
                    db.set_state(*address, *key, *value);
                }
            }
            // Slots present on input but absent from the output were
            // cleared by the transaction.
            if let Some(before) = existing {
                for key in before.storage.keys() {
                    if !target.storage.contains_key(key) {
                        db.set_state(*address, *key, B256::ZERO);
                    }
                }
            }
        }

        for address in record.input.accounts.keys() {
            if record.output.get(address).is_none() {
                db.suicide(*address);
            }
        }

        if !record.result.success {
            db.revert_to_snapshot(snapshot);
        }
        db.finalise(true);
        Ok(())
    }
}
