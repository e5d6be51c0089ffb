//! Per-transaction substate records.
//!
//! A substate captures everything one transaction needs from and leaves in
//! the state: the touched accounts before execution (input allocation),
//! the transaction envelope, and the touched accounts afterwards (output
//! allocation). The drivers only consume these through `SubstateSource`;
//! `JsonSubstateFile` is the bundled file-backed implementation.

use alloy_primitives::{Address, Bytes, U256};
use retrace_state::StateAlloc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::{fs, io};

/// Errors loading a substate fixture file.
#[derive(Debug, thiserror::Error)]
pub enum SubstateError {
    #[error("substate file i/o: {0}")]
    Io(#[from] io::Error),

    #[error("substate file parse: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("substate records out of order at block {block} tx {tx_index}")]
    OutOfOrder { block: u64, tx_index: u32 },
}

/// Block environment of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstateEnv {
    pub coinbase: Address,
    pub number: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
}

/// The transaction message itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstateMessage {
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    pub gas: u64,
}

/// Expected execution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstateResult {
    pub success: bool,
    #[serde(default)]
    pub gas_used: u64,
}

impl Default for SubstateResult {
    fn default() -> Self {
        Self {
            success: true,
            gas_used: 0,
        }
    }
}

/// One transaction's worth of substate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubstateRecord {
    pub block: u64,
    pub tx_index: u32,
    pub input: StateAlloc,
    #[serde(default)]
    pub env: SubstateEnv,
    #[serde(default)]
    pub message: SubstateMessage,
    pub output: StateAlloc,
    #[serde(default)]
    pub result: SubstateResult,
}

/// Yields substate records in `(block, tx_index)` order.
pub trait SubstateSource {
    /// Records with block ≥ `first`, in order.
    fn iter_from(&self, first: u64) -> Box<dyn Iterator<Item = &SubstateRecord> + '_>;
}

/// All records of one JSON fixture file, held in memory.
#[derive(Debug, Default)]
pub struct JsonSubstateFile {
    records: Vec<SubstateRecord>,
}

impl JsonSubstateFile {
    /// Parses the file, which holds a JSON array of records, and validates
    /// their ordering.
    pub fn load(path: &Path) -> Result<Self, SubstateError> {
        let data = fs::read(path)?;
        let records: Vec<SubstateRecord> = serde_json::from_slice(&data)?;
        Self::from_records(records)
    }

    pub fn from_records(records: Vec<SubstateRecord>) -> Result<Self, SubstateError> {
        for pair in records.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if (next.block, next.tx_index) <= (prev.block, prev.tx_index) {
                return Err(SubstateError::OutOfOrder {
                    block: next.block,
                    tx_index: next.tx_index,
                });
            }
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SubstateSource for JsonSubstateFile {
    fn iter_from(&self, first: u64) -> Box<dyn Iterator<Item = &SubstateRecord> + '_> {
        Box::new(self.records.iter().filter(move |r| r.block >= first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(block: u64, tx_index: u32) -> SubstateRecord {
        SubstateRecord {
            block,
            tx_index,
            ..Default::default()
        }
    }

    #[test]
    fn test_iter_from_skips_earlier_blocks() {
        let file =
            JsonSubstateFile::from_records(vec![record(1, 0), record(2, 0), record(2, 1), record(3, 0)])
                .unwrap();

        let blocks: Vec<u64> = file.iter_from(2).map(|r| r.block).collect();
        assert_eq!(blocks, vec![2, 2, 3]);
    }

    #[test]
    fn test_out_of_order_records_rejected() {
        let result = JsonSubstateFile::from_records(vec![record(2, 0), record(1, 0)]);
        assert!(matches!(
            result,
            Err(SubstateError::OutOfOrder { block: 1, tx_index: 0 })
        ));

        let result = JsonSubstateFile::from_records(vec![record(1, 1), record(1, 1)]);
        assert!(matches!(result, Err(SubstateError::OutOfOrder { .. })));
    }

    #[test]
    fn test_load_json_file() {
        let path = std::env::temp_dir().join(format!("retrace-substates-{}.json", std::process::id()));
        let records = vec![record(5, 0), record(5, 1)];
        fs::write(&path, serde_json::to_vec(&records).unwrap()).unwrap();

        let file = JsonSubstateFile::load(&path).unwrap();
        assert_eq!(file.len(), 2);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let path = std::env::temp_dir().join(format!("retrace-substates-bad-{}.json", std::process::id()));
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            JsonSubstateFile::load(&path),
            Err(SubstateError::Parse(_))
        ));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_result_defaults_to_success() {
        let record: SubstateRecord = serde_json::from_str(
            r#"{"block":1,"tx_index":0,"input":{},"output":{}}"#,
        )
        .unwrap();
        assert!(record.result.success);
    }
}
