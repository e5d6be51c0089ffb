//! The state-database capability that transaction execution runs against.
//!
//! `StateDb` is the seam of the whole system: the recorder wraps any
//! implementation of it to observe calls, and replay drives a fresh
//! implementation with the recorded calls. The method set mirrors the
//! account/storage interface an EVM-style interpreter expects.

use crate::alloc::StateAlloc;
use alloy_eips::eip2930::AccessList;
use alloy_primitives::{Address, Bytes, Log, B256, U256};

/// Account and storage state as seen by an executing transaction.
///
/// The trait is object safe so drivers can work with `&mut dyn StateDb`
/// without caring about the concrete store behind it.
///
/// Snapshot identifiers are whatever `snapshot()` hands out; passing an
/// identifier that was never handed out (or was invalidated by an earlier
/// revert) is a caller bug and implementations may panic on it.
pub trait StateDb {
    /// Creates `address` as a fresh account. An existing account is reset
    /// but keeps its balance.
    fn create_account(&mut self, address: Address);

    fn sub_balance(&mut self, address: Address, amount: U256);
    fn add_balance(&mut self, address: Address, amount: U256);
    fn get_balance(&self, address: Address) -> U256;

    fn get_nonce(&self, address: Address) -> u64;
    fn set_nonce(&mut self, address: Address, nonce: u64);

    /// Hash of the account's code; zero for a non-existent account.
    fn get_code_hash(&self, address: Address) -> B256;
    fn get_code(&self, address: Address) -> Bytes;
    fn set_code(&mut self, address: Address, code: Bytes);
    fn get_code_size(&self, address: Address) -> usize;

    fn add_refund(&mut self, gas: u64);
    fn sub_refund(&mut self, gas: u64);
    fn get_refund(&self) -> u64;

    /// Value of the slot as of the start of the transaction, unaffected by
    /// writes made since.
    fn get_committed_state(&self, address: Address, key: B256) -> B256;
    fn get_state(&self, address: Address, key: B256) -> B256;
    fn set_state(&mut self, address: Address, key: B256, value: B256);

    /// Marks the account for destruction and zeroes its balance. Returns
    /// whether the account existed.
    fn suicide(&mut self, address: Address) -> bool;
    fn has_suicided(&self, address: Address) -> bool;

    fn exist(&self, address: Address) -> bool;
    /// Existing but empty (zero nonce, zero balance, no code) or missing.
    fn empty(&self, address: Address) -> bool;

    fn prepare_access_list(
        &mut self,
        sender: Address,
        dest: Option<Address>,
        precompiles: &[Address],
        tx_accesses: &AccessList,
    );
    fn address_in_access_list(&self, address: Address) -> bool;
    /// Returns `(address present, slot present)`.
    fn slot_in_access_list(&self, address: Address, slot: B256) -> (bool, bool);
    fn add_address_to_access_list(&mut self, address: Address);
    fn add_slot_to_access_list(&mut self, address: Address, slot: B256);

    fn snapshot(&mut self) -> i32;
    fn revert_to_snapshot(&mut self, id: i32);

    fn add_log(&mut self, log: Log);
    fn add_preimage(&mut self, hash: B256, preimage: Bytes);

    /// Visits every storage slot of `address`; the visitor returns `false`
    /// to stop early.
    fn for_each_storage(&self, address: Address, visit: &mut dyn FnMut(B256, B256) -> bool);

    /// Announces the transaction about to execute.
    fn prepare(&mut self, tx_hash: B256, tx_index: usize);

    /// Settles the transaction: destructed accounts are removed, and with
    /// `delete_empty_objects` accounts left empty by the transaction are
    /// removed as well.
    fn finalise(&mut self, delete_empty_objects: bool);

    /// Finalises and returns the current state root.
    fn intermediate_root(&mut self, delete_empty_objects: bool) -> B256;

    fn get_logs(&self) -> Vec<Log>;

    /// Exports the post-transaction state as an allocation for comparison
    /// against recorded output.
    fn get_substate_post_alloc(&self) -> StateAlloc;
}
