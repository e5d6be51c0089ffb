//! The three dictionaries a recording session shares.
//!
//! The proxy encodes through this context from the execution thread while
//! the driver keeps a handle for the final flush, so each dictionary sits
//! behind its own mutex. Replay only decodes and never contends.

use crate::dictionary::{
    ContractDictionary, DictionaryError, StorageDictionary, ValueDictionary,
};
use alloy_primitives::{Address, B256};
use std::path::Path;
use std::sync::Mutex;

pub const CONTRACT_DICTIONARY_FILE: &str = "contract-dictionary.dat";
pub const STORAGE_DICTIONARY_FILE: &str = "storage-dictionary.dat";
pub const VALUE_DICTIONARY_FILE: &str = "value-dictionary.dat";

/// Contract, storage-key and storage-value dictionaries as one unit.
#[derive(Debug, Default)]
pub struct DictionaryContext {
    contracts: Mutex<ContractDictionary>,
    storage_keys: Mutex<StorageDictionary>,
    values: Mutex<ValueDictionary>,
}

impl DictionaryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads all three dictionaries from `dir`. Missing files load as
    /// empty dictionaries.
    pub fn read_all(dir: &Path) -> Result<Self, DictionaryError> {
        Ok(Self {
            contracts: Mutex::new(ContractDictionary::read(
                &dir.join(CONTRACT_DICTIONARY_FILE),
            )?),
            storage_keys: Mutex::new(StorageDictionary::read(
                &dir.join(STORAGE_DICTIONARY_FILE),
            )?),
            values: Mutex::new(ValueDictionary::read(&dir.join(VALUE_DICTIONARY_FILE))?),
        })
    }

    /// Writes all three dictionaries into `dir`.
    pub fn write_all(&self, dir: &Path) -> Result<(), DictionaryError> {
        self.contracts
            .lock()
            .unwrap()
            .write(&dir.join(CONTRACT_DICTIONARY_FILE))?;
        self.storage_keys
            .lock()
            .unwrap()
            .write(&dir.join(STORAGE_DICTIONARY_FILE))?;
        self.values
            .lock()
            .unwrap()
            .write(&dir.join(VALUE_DICTIONARY_FILE))?;
        Ok(())
    }

    pub fn encode_contract(&self, address: Address) -> Result<u32, DictionaryError> {
        self.contracts.lock().unwrap().encode(address)
    }

    pub fn encode_storage(&self, key: B256) -> Result<u32, DictionaryError> {
        self.storage_keys.lock().unwrap().encode(key)
    }

    pub fn encode_value(&self, value: B256) -> Result<u64, DictionaryError> {
        self.values.lock().unwrap().encode(value)
    }

    pub fn contract(&self, index: u32) -> Result<Address, DictionaryError> {
        self.contracts.lock().unwrap().decode(index)
    }

    pub fn storage(&self, index: u32) -> Result<B256, DictionaryError> {
        self.storage_keys.lock().unwrap().decode(index)
    }

    pub fn value(&self, index: u64) -> Result<B256, DictionaryError> {
        self.values.lock().unwrap().decode(index)
    }

    /// Entry counts as `(contracts, storage keys, values)`.
    pub fn entry_counts(&self) -> (usize, usize, usize) {
        (
            self.contracts.lock().unwrap().len(),
            self.storage_keys.lock().unwrap().len(),
            self.values.lock().unwrap().len(),
        )
    }
}
