//! A self-contained, map-backed `StateDb`.
//!
//! Used as the replay target and as the inner DB in tests. There is no
//! trie behind it: state lives in flat maps, and snapshots are a stack of
//! full-state clones, which is correct (and cheap enough) at the state
//! sizes a single transaction touches.

use crate::alloc::{AccountAlloc, StateAlloc};
use crate::state_db::StateDb;
use alloy_eips::eip2930::AccessList;
use alloy_primitives::{keccak256, Address, Bytes, Log, B256, U256};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Default)]
struct Account {
    nonce: u64,
    balance: U256,
    code: Bytes,
    storage: HashMap<B256, B256>,
    suicided: bool,
}

impl Account {
    /// Unlike the state-rent definition, live storage counts: a replayed
    /// trace carries no balance or nonce changes, and deleting an account
    /// that still holds recorded slots would discard them.
    fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance.is_zero()
            && self.code.is_empty()
            && self.storage.values().all(|v| v.is_zero())
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    accounts: HashMap<Address, Account>,
    dirty: HashSet<Address>,
    refund: u64,
}

/// In-memory account/storage store with geth-style snapshot semantics.
#[derive(Debug, Default)]
pub struct InMemoryStateDb {
    accounts: HashMap<Address, Account>,
    /// Storage as primed at construction; `get_committed_state` reads this.
    committed: HashMap<Address, HashMap<B256, B256>>,
    /// Accounts modified since the last finalise; only these are eligible
    /// for empty-account deletion.
    dirty: HashSet<Address>,
    snapshots: Vec<Snapshot>,
    refund: u64,
    access_addresses: HashSet<Address>,
    access_slots: HashSet<(Address, B256)>,
    logs: Vec<Log>,
    preimages: HashMap<B256, Bytes>,
    tx_hash: B256,
    tx_index: usize,
}

impl InMemoryStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a state primed from an input allocation.
    pub fn from_alloc(alloc: &StateAlloc) -> Self {
        let mut db = Self::new();
        for (address, account) in &alloc.accounts {
            db.accounts.insert(
                *address,
                Account {
                    nonce: account.nonce,
                    balance: account.balance,
                    code: account.code.clone(),
                    storage: account.storage.iter().map(|(k, v)| (*k, *v)).collect(),
                    suicided: false,
                },
            );
            db.committed.insert(
                *address,
                account.storage.iter().map(|(k, v)| (*k, *v)).collect(),
            );
        }
        db
    }

    pub fn preimage(&self, hash: &B256) -> Option<&Bytes> {
        self.preimages.get(hash)
    }

    /// Transaction position as announced by the latest `prepare` call.
    pub fn tx_context(&self) -> (B256, usize) {
        (self.tx_hash, self.tx_index)
    }
}

impl StateDb for InMemoryStateDb {
    fn create_account(&mut self, address: Address) {
        // A re-created account keeps its balance, everything else resets.
        let balance = self
            .accounts
            .get(&address)
            .map(|a| a.balance)
            .unwrap_or_default();
        self.accounts.insert(
            address,
            Account {
                balance,
                ..Default::default()
            },
        );
        self.dirty.insert(address);
    }

    fn sub_balance(&mut self, address: Address, amount: U256) {
        let account = self.accounts.entry(address).or_default();
        account.balance = account.balance.saturating_sub(amount);
        self.dirty.insert(address);
    }

    fn add_balance(&mut self, address: Address, amount: U256) {
        let account = self.accounts.entry(address).or_default();
        account.balance = account.balance.saturating_add(amount);
        self.dirty.insert(address);
    }

    fn get_balance(&self, address: Address) -> U256 {
        self.accounts
            .get(&address)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    fn get_nonce(&self, address: Address) -> u64 {
        self.accounts.get(&address).map(|a| a.nonce).unwrap_or(0)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.accounts.entry(address).or_default().nonce = nonce;
        self.dirty.insert(address);
    }

    fn get_code_hash(&self, address: Address) -> B256 {
        match self.accounts.get(&address) {
            Some(account) => keccak256(&account.code),
            None => B256::ZERO,
        }
    }

    fn get_code(&self, address: Address) -> Bytes {
        self.accounts
            .get(&address)
            .map(|a| a.code.clone())
            .unwrap_or_default()
    }

    fn set_code(&mut self, address: Address, code: Bytes) {
        self.accounts.entry(address).or_default().code = code;
        self.dirty.insert(address);
    }

    fn get_code_size(&self, address: Address) -> usize {
        self.accounts.get(&address).map(|a| a.code.len()).unwrap_or(0)
    }

    fn add_refund(&mut self, gas: u64) {
        self.refund += gas;
    }

    fn sub_refund(&mut self, gas: u64) {
        self.refund = self.refund.saturating_sub(gas);
    }

    fn get_refund(&self) -> u64 {
        self.refund
    }

    fn get_committed_state(&self, address: Address, key: B256) -> B256 {
        self.committed
            .get(&address)
            .and_then(|storage| storage.get(&key))
            .copied()
            .unwrap_or(B256::ZERO)
    }

    fn get_state(&self, address: Address, key: B256) -> B256 {
        self.accounts
            .get(&address)
            .and_then(|account| account.storage.get(&key))
            .copied()
            .unwrap_or(B256::ZERO)
    }

    fn set_state(&mut self, address: Address, key: B256, value: B256) {
        self.accounts
            .entry(address)
            .or_default()
            .storage
            .insert(key, value);
        self.dirty.insert(address);
    }

    fn suicide(&mut self, address: Address) -> bool {
        match self.accounts.get_mut(&address) {
            Some(account) => {
                account.suicided = true;
                account.balance = U256::ZERO;
                self.dirty.insert(address);
                true
            }
            None => false,
        }
    }

    fn has_suicided(&self, address: Address) -> bool {
        self.accounts
            .get(&address)
            .map(|a| a.suicided)
            .unwrap_or(false)
    }

    fn exist(&self, address: Address) -> bool {
        self.accounts.contains_key(&address)
    }

    fn empty(&self, address: Address) -> bool {
        self.accounts
            .get(&address)
            .map(|a| a.is_empty())
            .unwrap_or(true)
    }

    fn prepare_access_list(
        &mut self,
        sender: Address,
        dest: Option<Address>,
        precompiles: &[Address],
        tx_accesses: &AccessList,
    ) {
        self.access_addresses.insert(sender);
        if let Some(dest) = dest {
            self.access_addresses.insert(dest);
        }
        self.access_addresses.extend(precompiles.iter().copied());
        for item in &tx_accesses.0 {
            self.access_addresses.insert(item.address);
            for key in &item.storage_keys {
                self.access_slots.insert((item.address, *key));
            }
        }
    }

    fn address_in_access_list(&self, address: Address) -> bool {
        self.access_addresses.contains(&address)
    }

    fn slot_in_access_list(&self, address: Address, slot: B256) -> (bool, bool) {
        (
            self.access_addresses.contains(&address),
            self.access_slots.contains(&(address, slot)),
        )
    }

    fn add_address_to_access_list(&mut self, address: Address) {
        self.access_addresses.insert(address);
    }

    fn add_slot_to_access_list(&mut self, address: Address, slot: B256) {
        self.access_addresses.insert(address);
        self.access_slots.insert((address, slot));
    }

    fn snapshot(&mut self) -> i32 {
        self.snapshots.push(Snapshot {
            accounts: self.accounts.clone(),
            dirty: self.dirty.clone(),
            refund: self.refund,
        });
        (self.snapshots.len() - 1) as i32
    }

    fn revert_to_snapshot(&mut self, id: i32) {
        let index = usize::try_from(id).ok().filter(|i| *i < self.snapshots.len());
        let Some(index) = index else {
            panic!("revert to unknown snapshot id {id}");
        };
        self.snapshots.truncate(index + 1);
        let snapshot = self.snapshots.pop().expect("snapshot stack non-empty");
        self.accounts = snapshot.accounts;
        self.dirty = snapshot.dirty;
        self.refund = snapshot.refund;
    }

    fn add_log(&mut self, log: Log) {
        self.logs.push(log);
    }

    fn add_preimage(&mut self, hash: B256, preimage: Bytes) {
        self.preimages.entry(hash).or_insert(preimage);
    }

    fn for_each_storage(&self, address: Address, visit: &mut dyn FnMut(B256, B256) -> bool) {
        if let Some(account) = self.accounts.get(&address) {
            for (key, value) in &account.storage {
                if !visit(*key, *value) {
                    break;
                }
            }
        }
    }

    fn prepare(&mut self, tx_hash: B256, tx_index: usize) {
        self.tx_hash = tx_hash;
        self.tx_index = tx_index;
        self.logs.clear();
    }

    fn finalise(&mut self, delete_empty_objects: bool) {
        let dirty = std::mem::take(&mut self.dirty);
        self.accounts.retain(|address, account| {
            !account.suicided
                && !(delete_empty_objects && dirty.contains(address) && account.is_empty())
        });
        self.snapshots.clear();
    }

    fn intermediate_root(&mut self, delete_empty_objects: bool) -> B256 {
        // There is no trie behind this store; finalise and report a zero
        // root.
        self.finalise(delete_empty_objects);
        B256::ZERO
    }

    fn get_logs(&self) -> Vec<Log> {
        self.logs.clone()
    }

    fn get_substate_post_alloc(&self) -> StateAlloc {
        let mut alloc = StateAlloc::new();
        for (address, account) in &self.accounts {
            let storage: BTreeMap<B256, B256> = account
                .storage
                .iter()
                .filter(|(_, value)| !value.is_zero())
                .map(|(k, v)| (*k, *v))
                .collect();
            alloc.insert(
                *address,
                AccountAlloc {
                    nonce: account.nonce,
                    balance: account.balance,
                    code: account.code.clone(),
                    storage,
                },
            );
        }
        alloc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: Address = Address::with_last_byte(0x11);
    const KEY: B256 = B256::with_last_byte(0x01);
    const VALUE: B256 = B256::with_last_byte(0xAA);

    #[test]
    fn test_missing_account_defaults() {
        let db = InMemoryStateDb::new();
        assert!(!db.exist(ADDR));
        assert!(db.empty(ADDR));
        assert_eq!(db.get_balance(ADDR), U256::ZERO);
        assert_eq!(db.get_nonce(ADDR), 0);
        assert_eq!(db.get_state(ADDR, KEY), B256::ZERO);
        assert_eq!(db.get_code_hash(ADDR), B256::ZERO);
    }

    #[test]
    fn test_set_and_get_state() {
        let mut db = InMemoryStateDb::new();
        db.set_state(ADDR, KEY, VALUE);
        assert_eq!(db.get_state(ADDR, KEY), VALUE);
        // Writing creates the account implicitly.
        assert!(db.exist(ADDR));
    }

    #[test]
    fn test_committed_state_unaffected_by_writes() {
        let mut alloc = StateAlloc::new();
        let mut account = AccountAlloc::default();
        account.storage.insert(KEY, VALUE);
        alloc.insert(ADDR, account);

        let mut db = InMemoryStateDb::from_alloc(&alloc);
        db.set_state(ADDR, KEY, B256::with_last_byte(0xBB));

        assert_eq!(db.get_state(ADDR, KEY), B256::with_last_byte(0xBB));
        assert_eq!(db.get_committed_state(ADDR, KEY), VALUE);
    }

    #[test]
    fn test_snapshot_revert_restores_state() {
        let mut db = InMemoryStateDb::new();
        db.set_state(ADDR, KEY, VALUE);

        let snap = db.snapshot();
        db.set_state(ADDR, KEY, B256::with_last_byte(0xBB));
        db.add_balance(ADDR, U256::from(100));
        db.revert_to_snapshot(snap);

        assert_eq!(db.get_state(ADDR, KEY), VALUE);
        assert_eq!(db.get_balance(ADDR), U256::ZERO);
    }

    #[test]
    fn test_nested_snapshots() {
        let mut db = InMemoryStateDb::new();
        db.set_state(ADDR, KEY, B256::with_last_byte(1));
        let outer = db.snapshot();
        db.set_state(ADDR, KEY, B256::with_last_byte(2));
        let inner = db.snapshot();
        db.set_state(ADDR, KEY, B256::with_last_byte(3));

        db.revert_to_snapshot(inner);
        assert_eq!(db.get_state(ADDR, KEY), B256::with_last_byte(2));
        db.revert_to_snapshot(outer);
        assert_eq!(db.get_state(ADDR, KEY), B256::with_last_byte(1));
    }

    #[test]
    #[should_panic(expected = "unknown snapshot id")]
    fn test_revert_unknown_snapshot_panics() {
        let mut db = InMemoryStateDb::new();
        db.revert_to_snapshot(3);
    }

    #[test]
    fn test_suicide_and_finalise() {
        let mut db = InMemoryStateDb::new();
        db.add_balance(ADDR, U256::from(500));
        db.set_nonce(ADDR, 1);

        assert!(db.suicide(ADDR));
        assert!(db.has_suicided(ADDR));
        assert_eq!(db.get_balance(ADDR), U256::ZERO);
        // Still visible until finalise.
        assert!(db.exist(ADDR));

        db.finalise(false);
        assert!(!db.exist(ADDR));
    }

    #[test]
    fn test_suicide_missing_account_returns_false() {
        let mut db = InMemoryStateDb::new();
        assert!(!db.suicide(ADDR));
    }

    #[test]
    fn test_finalise_deletes_empty_objects() {
        let mut db = InMemoryStateDb::new();
        db.create_account(ADDR);
        let other = Address::with_last_byte(0x22);
        db.set_nonce(other, 1);

        db.finalise(true);
        assert!(!db.exist(ADDR));
        assert!(db.exist(other));
    }

    #[test]
    fn test_finalise_keeps_untouched_empty_accounts() {
        // A primed storage-only account was never modified, so it must
        // survive empty-account deletion.
        let mut alloc = StateAlloc::new();
        let mut primed = AccountAlloc::default();
        primed.storage.insert(KEY, VALUE);
        alloc.insert(ADDR, primed);

        let mut db = InMemoryStateDb::from_alloc(&alloc);
        db.finalise(true);
        assert!(db.exist(ADDR));
        assert_eq!(db.get_state(ADDR, KEY), VALUE);
    }

    #[test]
    fn test_revert_restores_touched_set() {
        let mut alloc = StateAlloc::new();
        let mut primed = AccountAlloc::default();
        primed.storage.insert(KEY, VALUE);
        alloc.insert(ADDR, primed);

        let mut db = InMemoryStateDb::from_alloc(&alloc);
        let snap = db.snapshot();
        db.set_state(ADDR, KEY, B256::with_last_byte(0xFF));
        db.revert_to_snapshot(snap);

        // The touch was reverted with the write, so the empty account is
        // not up for deletion.
        db.finalise(true);
        assert!(db.exist(ADDR));
        assert_eq!(db.get_state(ADDR, KEY), VALUE);
    }

    #[test]
    fn test_create_account_keeps_balance() {
        let mut db = InMemoryStateDb::new();
        db.add_balance(ADDR, U256::from(42));
        db.set_nonce(ADDR, 9);
        db.set_state(ADDR, KEY, VALUE);

        db.create_account(ADDR);
        assert_eq!(db.get_balance(ADDR), U256::from(42));
        assert_eq!(db.get_nonce(ADDR), 0);
        assert_eq!(db.get_state(ADDR, KEY), B256::ZERO);
    }

    #[test]
    fn test_access_list() {
        let mut db = InMemoryStateDb::new();
        let slot = B256::with_last_byte(7);

        assert!(!db.address_in_access_list(ADDR));
        db.add_slot_to_access_list(ADDR, slot);
        assert!(db.address_in_access_list(ADDR));
        assert_eq!(db.slot_in_access_list(ADDR, slot), (true, true));
        assert_eq!(db.slot_in_access_list(ADDR, KEY), (true, false));
    }

    #[test]
    fn test_post_alloc_skips_zero_slots() {
        let mut db = InMemoryStateDb::new();
        db.set_nonce(ADDR, 1);
        db.set_state(ADDR, KEY, VALUE);
        db.set_state(ADDR, B256::with_last_byte(2), B256::ZERO);

        let alloc = db.get_substate_post_alloc();
        let account = alloc.get(&ADDR).expect("account present");
        assert_eq!(account.storage.len(), 1);
        assert_eq!(account.storage.get(&KEY), Some(&VALUE));
    }

    #[test]
    fn test_refund_counter() {
        let mut db = InMemoryStateDb::new();
        db.add_refund(100);
        db.sub_refund(40);
        assert_eq!(db.get_refund(), 60);
    }

    #[test]
    fn test_for_each_storage_early_stop() {
        let mut db = InMemoryStateDb::new();
        for i in 1..=10u8 {
            db.set_state(ADDR, B256::with_last_byte(i), VALUE);
        }

        let mut seen = 0;
        db.for_each_storage(ADDR, &mut |_, _| {
            seen += 1;
            seen < 3
        });
        assert_eq!(seen, 3);
    }
}
