//! Account allocations: flat snapshots of account and storage state.
//!
//! A `StateAlloc` describes the accounts a transaction touches, either as
//! its input (the state primed before execution) or its output (the state
//! expected afterwards). Replay compares the post-state of the target DB
//! against the recorded output allocation; `diff` produces the divergences.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One account's state within an allocation. Storage holds non-zero slots
/// only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAlloc {
    pub nonce: u64,
    pub balance: U256,
    #[serde(default)]
    pub code: Bytes,
    #[serde(default)]
    pub storage: BTreeMap<B256, B256>,
}

impl AccountAlloc {
    /// Empty in the state-rent sense: no nonce, no balance, no code.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code.is_empty()
    }
}

/// A set of accounts keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateAlloc {
    pub accounts: BTreeMap<Address, AccountAlloc>,
}

/// A single difference between an expected and an actual allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocDivergence {
    /// The account is expected but absent.
    MissingAccount { address: Address },
    /// The account is present but not expected.
    UnexpectedAccount { address: Address },
    Balance {
        address: Address,
        want: U256,
        have: U256,
    },
    Nonce {
        address: Address,
        want: u64,
        have: u64,
    },
    Code { address: Address },
    Storage {
        address: Address,
        key: B256,
        want: B256,
        have: B256,
    },
}

impl fmt::Display for AllocDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAccount { address } => {
                write!(f, "account {address} missing")
            }
            Self::UnexpectedAccount { address } => {
                write!(f, "unexpected account {address}")
            }
            Self::Balance { address, want, have } => {
                write!(f, "account {address} balance: want {want}, have {have}")
            }
            Self::Nonce { address, want, have } => {
                write!(f, "account {address} nonce: want {want}, have {have}")
            }
            Self::Code { address } => write!(f, "account {address} code differs"),
            Self::Storage { address, key, want, have } => {
                write!(f, "account {address} slot {key}: want {want}, have {have}")
            }
        }
    }
}

impl StateAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<&AccountAlloc> {
        self.accounts.get(address)
    }

    pub fn insert(&mut self, address: Address, account: AccountAlloc) {
        self.accounts.insert(address, account);
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Compares `self` (the expected allocation) against `actual` and
    /// returns every divergence found. Zero-valued storage slots are
    /// treated as absent on both sides.
    pub fn diff(&self, actual: &StateAlloc) -> Vec<AllocDivergence> {
        let mut out = Vec::new();

        for (address, want) in &self.accounts {
            let Some(have) = actual.accounts.get(address) else {
                out.push(AllocDivergence::MissingAccount { address: *address });
                continue;
            };
            if want.balance != have.balance {
                out.push(AllocDivergence::Balance {
                    address: *address,
                    want: want.balance,
                    have: have.balance,
                });
            }
            if want.nonce != have.nonce {
                out.push(AllocDivergence::Nonce {
                    address: *address,
                    want: want.nonce,
                    have: have.nonce,
                });
            }
            if want.code != have.code {
                out.push(AllocDivergence::Code { address: *address });
            }
            for (key, want_value) in &want.storage {
                let have_value = have.storage.get(key).copied().unwrap_or(B256::ZERO);
                if *want_value != have_value {
                    out.push(AllocDivergence::Storage {
                        address: *address,
                        key: *key,
                        want: *want_value,
                        have: have_value,
                    });
                }
            }
            for (key, have_value) in &have.storage {
                if !want.storage.contains_key(key) && !have_value.is_zero() {
                    out.push(AllocDivergence::Storage {
                        address: *address,
                        key: *key,
                        want: B256::ZERO,
                        have: *have_value,
                    });
                }
            }
        }

        for address in actual.accounts.keys() {
            if !self.accounts.contains_key(address) {
                out.push(AllocDivergence::UnexpectedAccount { address: *address });
            }
        }

        out
    }

    /// Like [`diff`](Self::diff) but restricted to what a replayed trace
    /// can reproduce: the expected accounts must exist and their recorded
    /// storage slots must match. Balances, nonces, code and extra accounts
    /// are not compared.
    pub fn diff_storage(&self, actual: &StateAlloc) -> Vec<AllocDivergence> {
        let mut out = Vec::new();

        for (address, want) in &self.accounts {
            let Some(have) = actual.accounts.get(address) else {
                out.push(AllocDivergence::MissingAccount { address: *address });
                continue;
            };
            for (key, want_value) in &want.storage {
                let have_value = have.storage.get(key).copied().unwrap_or(B256::ZERO);
                if *want_value != have_value {
                    out.push(AllocDivergence::Storage {
                        address: *address,
                        key: *key,
                        want: *want_value,
                        have: have_value,
                    });
                }
            }
        }

        out
    }
}
