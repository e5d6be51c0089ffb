//! Recording proxy around a `StateDb`.
//!
//! `RecordingStateDb` presents the full capability set to the executor
//! while transparently recording the replayable subset: the call's
//! identifiers are encoded through the shared dictionaries, the matching
//! operation is enqueued for the writer, and the call is forwarded to the
//! wrapped DB unchanged. Everything else is forwarded silently.

use crate::dictionary_context::DictionaryContext;
use crate::operation::Operation;
use alloy_eips::eip2930::AccessList;
use alloy_primitives::{Address, Bytes, Log, B256, U256};
use retrace_state::{StateAlloc, StateDb};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wraps an inner state DB and records calls into the operation channel.
///
/// Dictionary exhaustion or a vanished writer leave the recording session
/// unrecoverable, so both panic rather than surface through the state-DB
/// interface.
pub struct RecordingStateDb<DB> {
    inner: DB,
    dicts: Arc<DictionaryContext>,
    ops: mpsc::Sender<Operation>,
}

impl<DB> RecordingStateDb<DB> {
    pub fn new(inner: DB, dicts: Arc<DictionaryContext>, ops: mpsc::Sender<Operation>) -> Self {
        Self { inner, dicts, ops }
    }

    fn record(&self, op: Operation) {
        self.ops
            .blocking_send(op)
            .expect("trace writer channel closed");
    }

    fn contract_index(&self, address: Address) -> u32 {
        self.dicts
            .encode_contract(address)
            .expect("contract dictionary exhausted")
    }

    fn storage_index(&self, key: B256) -> u32 {
        self.dicts
            .encode_storage(key)
            .expect("storage dictionary exhausted")
    }

    fn value_index(&self, value: B256) -> u64 {
        self.dicts
            .encode_value(value)
            .expect("value dictionary exhausted")
    }
}

impl<DB: StateDb> StateDb for RecordingStateDb<DB> {
    fn create_account(&mut self, address: Address) {
        let contract = self.contract_index(address);
        self.record(Operation::CreateAccount { contract });
        self.inner.create_account(address);
    }

    fn sub_balance(&mut self, address: Address, amount: U256) {
        self.inner.sub_balance(address, amount);
    }

    fn add_balance(&mut self, address: Address, amount: U256) {
        self.inner.add_balance(address, amount);
    }

    fn get_balance(&self, address: Address) -> U256 {
        let contract = self.contract_index(address);
        self.record(Operation::GetBalance { contract });
        self.inner.get_balance(address)
    }

    fn get_nonce(&self, address: Address) -> u64 {
        self.inner.get_nonce(address)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.inner.set_nonce(address, nonce);
    }

    fn get_code_hash(&self, address: Address) -> B256 {
        let contract = self.contract_index(address);
        self.record(Operation::GetCodeHash { contract });
        self.inner.get_code_hash(address)
    }

    fn get_code(&self, address: Address) -> Bytes {
        self.inner.get_code(address)
    }

    fn set_code(&mut self, address: Address, code: Bytes) {
        self.inner.set_code(address, code);
    }

    fn get_code_size(&self, address: Address) -> usize {
        self.inner.get_code_size(address)
    }

    fn add_refund(&mut self, gas: u64) {
        self.inner.add_refund(gas);
    }

    fn sub_refund(&mut self, gas: u64) {
        self.inner.sub_refund(gas);
    }

    fn get_refund(&self) -> u64 {
        self.inner.get_refund()
    }

    fn get_committed_state(&self, address: Address, key: B256) -> B256 {
        let contract = self.contract_index(address);
        let key_index = self.storage_index(key);
        self.record(Operation::GetCommittedState {
            contract,
            key: key_index,
        });
        self.inner.get_committed_state(address, key)
    }

    fn get_state(&self, address: Address, key: B256) -> B256 {
        let contract = self.contract_index(address);
        let key_index = self.storage_index(key);
        self.record(Operation::GetState {
            contract,
            key: key_index,
        });
        self.inner.get_state(address, key)
    }

    fn set_state(&mut self, address: Address, key: B256, value: B256) {
        let contract = self.contract_index(address);
        let key_index = self.storage_index(key);
        let value_index = self.value_index(value);
        self.record(Operation::SetState {
            contract,
            key: key_index,
            value: value_index,
        });
        self.inner.set_state(address, key, value);
    }

    fn suicide(&mut self, address: Address) -> bool {
        let contract = self.contract_index(address);
        self.record(Operation::Suicide { contract });
        self.inner.suicide(address)
    }

    fn has_suicided(&self, address: Address) -> bool {
        self.inner.has_suicided(address)
    }

    fn exist(&self, address: Address) -> bool {
        let contract = self.contract_index(address);
        self.record(Operation::Exist { contract });
        self.inner.exist(address)
    }

    fn empty(&self, address: Address) -> bool {
        self.inner.empty(address)
    }

    fn prepare_access_list(
        &mut self,
        sender: Address,
        dest: Option<Address>,
        precompiles: &[Address],
        tx_accesses: &AccessList,
    ) {
        self.inner
            .prepare_access_list(sender, dest, precompiles, tx_accesses);
    }

    fn address_in_access_list(&self, address: Address) -> bool {
        self.inner.address_in_access_list(address)
    }

    fn slot_in_access_list(&self, address: Address, slot: B256) -> (bool, bool) {
        self.inner.slot_in_access_list(address, slot)
    }

    fn add_address_to_access_list(&mut self, address: Address) {
        self.inner.add_address_to_access_list(address);
    }

    fn add_slot_to_access_list(&mut self, address: Address, slot: B256) {
        self.inner.add_slot_to_access_list(address, slot);
    }

    fn snapshot(&mut self) -> i32 {
        self.record(Operation::Snapshot);
        self.inner.snapshot()
    }

    fn revert_to_snapshot(&mut self, id: i32) {
        self.record(Operation::RevertToSnapshot { snapshot: id });
        self.inner.revert_to_snapshot(id);
    }

    fn add_log(&mut self, log: Log) {
        self.inner.add_log(log);
    }

    fn add_preimage(&mut self, hash: B256, preimage: Bytes) {
        self.inner.add_preimage(hash, preimage);
    }

    fn for_each_storage(&self, address: Address, visit: &mut dyn FnMut(B256, B256) -> bool) {
        self.inner.for_each_storage(address, visit);
    }

    fn prepare(&mut self, tx_hash: B256, tx_index: usize) {
        self.inner.prepare(tx_hash, tx_index);
    }

    fn finalise(&mut self, delete_empty_objects: bool) {
        self.record(Operation::Finalise {
            delete_empty_objects,
        });
        self.inner.finalise(delete_empty_objects);
    }

    fn intermediate_root(&mut self, delete_empty_objects: bool) -> B256 {
        self.inner.intermediate_root(delete_empty_objects)
    }

    fn get_logs(&self) -> Vec<Log> {
        self.inner.get_logs()
    }

    fn get_substate_post_alloc(&self) -> StateAlloc {
        self.inner.get_substate_post_alloc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_state::InMemoryStateDb;

    fn recorded_ops(capacity: usize) -> (RecordingStateDb<InMemoryStateDb>, mpsc::Receiver<Operation>) {
        let (tx, rx) = mpsc::channel(capacity);
        let proxy = RecordingStateDb::new(InMemoryStateDb::new(), Arc::new(DictionaryContext::new()), tx);
        (proxy, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Operation>) -> Vec<Operation> {
        let mut ops = Vec::new();
        while let Ok(op) = rx.try_recv() {
            ops.push(op);
        }
        ops
    }

    #[test]
    fn test_recorded_calls_enqueue_operations() {
        let (mut proxy, mut rx) = recorded_ops(64);
        let address = Address::repeat_byte(0xA1);
        let key = B256::repeat_byte(0x01);
        let value = B256::repeat_byte(0x02);

        let snap = proxy.snapshot();
        proxy.set_state(address, key, value);
        proxy.get_state(address, key);
        proxy.revert_to_snapshot(snap);
        proxy.finalise(true);
        drop(proxy);

        let ops = drain(&mut rx);
        assert_eq!(
            ops,
            vec![
                Operation::Snapshot,
                Operation::SetState { contract: 0, key: 0, value: 0 },
                Operation::GetState { contract: 0, key: 0 },
                Operation::RevertToSnapshot { snapshot: 0 },
                Operation::Finalise { delete_empty_objects: true },
            ]
        );
    }

    #[test]
    fn test_unrecorded_calls_forward_silently() {
        let (mut proxy, mut rx) = recorded_ops(64);
        let address = Address::repeat_byte(0xB2);

        proxy.add_balance(address, U256::from(10));
        proxy.set_nonce(address, 3);
        assert_eq!(proxy.get_nonce(address), 3);
        assert!(!proxy.empty(address));
        proxy.add_refund(7);
        assert_eq!(proxy.get_refund(), 7);
        drop(proxy);

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_reencoding_is_stable_across_operations() {
        let (mut proxy, mut rx) = recorded_ops(64);
        let address = Address::repeat_byte(0xC3);
        let key1 = B256::repeat_byte(0x01);
        let key2 = B256::repeat_byte(0x02);
        let value = B256::repeat_byte(0x0F);

        proxy.set_state(address, key1, value);
        proxy.set_state(address, key2, value);
        drop(proxy);

        let ops = drain(&mut rx);
        assert_eq!(
            ops,
            vec![
                Operation::SetState { contract: 0, key: 0, value: 0 },
                Operation::SetState { contract: 0, key: 1, value: 0 },
            ]
        );
    }

    #[test]
    fn test_results_pass_through_from_inner_db() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut inner = InMemoryStateDb::new();
        let address = Address::repeat_byte(0xD4);
        let key = B256::repeat_byte(0x03);
        let value = B256::repeat_byte(0x04);
        inner.set_state(address, key, value);
        inner.add_balance(address, U256::from(99));

        let proxy = RecordingStateDb::new(inner, Arc::new(DictionaryContext::new()), tx);
        assert_eq!(proxy.get_state(address, key), value);
        assert_eq!(proxy.get_balance(address), U256::from(99));
        assert!(proxy.exist(address));
        drop(proxy);

        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[test]
    fn test_dictionaries_grow_through_the_proxy() {
        let (tx, _rx) = mpsc::channel(64);
        let dicts = Arc::new(DictionaryContext::new());
        let mut proxy = RecordingStateDb::new(InMemoryStateDb::new(), dicts.clone(), tx);

        proxy.set_state(
            Address::repeat_byte(1),
            B256::repeat_byte(2),
            B256::repeat_byte(3),
        );
        proxy.get_balance(Address::repeat_byte(4));

        assert_eq!(dicts.entry_counts(), (2, 1, 1));
        assert_eq!(dicts.contract(0).unwrap(), Address::repeat_byte(1));
        assert_eq!(dicts.contract(1).unwrap(), Address::repeat_byte(4));
    }
}
