//! The wallet handle, its single state lock, loading and record persistence.
//!
//! Every operation that reads or changes ledger state is a method on [`WalletGuard`], which
//! can only be obtained through [`Wallet::lock`]. Holding a guard is the proof that the
//! wallet lock is held; nested engine calls pass the guard along instead of locking again.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::Receiver;
use yupost_consensus::{chain_params, ChainParams, Hash256};
use yupost_primitives::{Destination, OutPoint};
use yupost_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::address_book::{
    dest_data_key, split_dest_data_key, AddressBook, AddressBookEntry, ContractBook,
    ContractBookEntry,
};
use crate::chain::{Chain, ChainEvent};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::events::{ChangeType, EventBus, WalletEvent};
use crate::ledger::Ledger;
use crate::records::{DelegationRecord, SuperStakerRecord, TokenInfo, TokenTx};
use crate::rescan::ScanState;
use crate::signing::{IsMine, SigningProvider};
use crate::stake::DelegationCache;
use crate::tx::{TxStatus, WalletTx};

pub const WALLET_VERSION: i32 = 1;

pub const META_VERSION: &[u8] = b"version";
pub const META_ORDER_POS_NEXT: &[u8] = b"orderposnext";
pub const META_BEST_BLOCK: &[u8] = b"bestblock";

const LOAD_RETRIES: usize = 3;
const LOAD_RETRY_DELAY: Duration = Duration::from_millis(50);

pub(crate) fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Everything read back from a wallet store, before any chain resolution.
#[derive(Default)]
pub struct LoadedRecords {
    pub version: Option<i32>,
    pub txs: Vec<WalletTx>,
    pub order_pos_next: i64,
    pub best_block: Option<(i32, Hash256)>,
    pub address_book: AddressBook,
    pub contract_book: ContractBook,
    pub delegations: BTreeMap<Hash256, DelegationRecord>,
    pub super_stakers: BTreeMap<Hash256, SuperStakerRecord>,
    pub tokens: BTreeMap<Hash256, TokenInfo>,
    pub token_txs: BTreeMap<Hash256, TokenTx>,
}

fn read_i64(bytes: &[u8]) -> Result<i64, WalletError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| WalletError::InvalidData("invalid integer record"))?;
    Ok(i64::from_le_bytes(raw))
}

fn encode_best_block(height: i32, hash: &Hash256) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(hash);
    out
}

fn decode_best_block(bytes: &[u8]) -> Result<(i32, Hash256), WalletError> {
    if bytes.len() != 36 {
        return Err(WalletError::InvalidData("invalid best block record"));
    }
    let mut height = [0u8; 4];
    height.copy_from_slice(&bytes[..4]);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes[4..]);
    Ok((i32::from_le_bytes(height), hash))
}

/// Reads every wallet record column. Used by [`Wallet::load`] and by the offline tool.
pub fn load_records(
    store: &dyn KeyValueStore,
    params: &ChainParams,
) -> Result<LoadedRecords, WalletError> {
    let mut records = LoadedRecords::default();

    if let Some(bytes) = store.get(Column::Meta, META_VERSION)? {
        let raw: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::InvalidData("invalid wallet version record"))?;
        records.version = Some(i32::from_le_bytes(raw));
    }
    if let Some(bytes) = store.get(Column::Meta, META_ORDER_POS_NEXT)? {
        records.order_pos_next = read_i64(&bytes)?;
    }
    if let Some(bytes) = store.get(Column::Meta, META_BEST_BLOCK)? {
        records.best_block = Some(decode_best_block(&bytes)?);
    }

    for (_, value) in store.scan_prefix(Column::Tx, &[])? {
        records.txs.push(WalletTx::decode(&value)?);
    }
    records.txs.sort_by_key(|wtx| wtx.order_pos);

    for (key, value) in store.scan_prefix(Column::AddressBook, &[])? {
        let address = std::str::from_utf8(&key)
            .map_err(|_| WalletError::InvalidData("invalid address book key"))?;
        let destination = Destination::decode(address, params)
            .map_err(|_| WalletError::InvalidAddress(address.to_string()))?;
        let mut entry = AddressBookEntry::decode(&value)?;
        if let Some(existing) = records.address_book.get(&destination) {
            entry.dest_data = existing.dest_data.clone();
        }
        records.address_book.insert_entry(destination, entry);
    }
    for (key, value) in store.scan_prefix(Column::DestData, &[])? {
        let (address, data_key) = split_dest_data_key(&key)
            .ok_or(WalletError::InvalidData("invalid destination data key"))?;
        let destination = Destination::decode(address, params)
            .map_err(|_| WalletError::InvalidAddress(address.to_string()))?;
        let value = String::from_utf8(value)
            .map_err(|_| WalletError::InvalidData("invalid destination data value"))?;
        records
            .address_book
            .set_dest_data(destination, data_key, &value);
    }
    for (key, value) in store.scan_prefix(Column::ContractBook, &[])? {
        let address = String::from_utf8(key)
            .map_err(|_| WalletError::InvalidData("invalid contract book key"))?;
        records
            .contract_book
            .set(&address, ContractBookEntry::decode(&value)?);
    }
    for (_, value) in store.scan_prefix(Column::Delegation, &[])? {
        let record = DelegationRecord::decode(&value)?;
        records.delegations.insert(record.id(), record);
    }
    for (_, value) in store.scan_prefix(Column::SuperStaker, &[])? {
        let record = SuperStakerRecord::decode(&value)?;
        records.super_stakers.insert(record.id(), record);
    }
    for (_, value) in store.scan_prefix(Column::Token, &[])? {
        let record = TokenInfo::decode(&value)?;
        records.tokens.insert(record.id(), record);
    }
    for (_, value) in store.scan_prefix(Column::TokenTx, &[])? {
        let record = TokenTx::decode(&value)?;
        records.token_txs.insert(record.id(), record);
    }
    Ok(records)
}

/// Retries store and chain reads that fail while the wallet is starting.
fn with_load_retries<T>(
    what: &str,
    mut op: impl FnMut() -> Result<T, WalletError>,
) -> Result<T, WalletError> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err @ (WalletError::Store(_) | WalletError::Chain(_))) if attempt < LOAD_RETRIES => {
                yupost_log::log_warn!("{what} failed (attempt {attempt}/{LOAD_RETRIES}): {err}");
                attempt += 1;
                thread::sleep(LOAD_RETRY_DELAY);
            }
            Err(err) => return Err(err),
        }
    }
}

/// State guarded by the wallet lock.
pub struct WalletState {
    pub(crate) ledger: Ledger,
    pub(crate) address_book: AddressBook,
    pub(crate) contract_book: ContractBook,
    pub(crate) delegations: BTreeMap<Hash256, DelegationRecord>,
    pub(crate) super_stakers: BTreeMap<Hash256, SuperStakerRecord>,
    pub(crate) tokens: BTreeMap<Hash256, TokenInfo>,
    pub(crate) token_txs: BTreeMap<Hash256, TokenTx>,
    /// Coins excluded from automatic selection. Not persisted.
    pub(crate) locked_coins: BTreeSet<OutPoint>,
    pub(crate) events: EventBus,
    /// Last block applied through notifications, the reference for depth.
    pub(crate) tip: Option<(i32, Hash256)>,
    pub(crate) delegation_cache: DelegationCache,
    /// Delegation records deleted by a removal transaction, keyed by that transaction.
    pub(crate) removed_delegations: BTreeMap<Hash256, Vec<DelegationRecord>>,
}

impl WalletState {
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    pub fn contract_book(&self) -> &ContractBook {
        &self.contract_book
    }

    pub fn delegations(&self) -> &BTreeMap<Hash256, DelegationRecord> {
        &self.delegations
    }

    pub fn super_stakers(&self) -> &BTreeMap<Hash256, SuperStakerRecord> {
        &self.super_stakers
    }

    pub fn tokens(&self) -> &BTreeMap<Hash256, TokenInfo> {
        &self.tokens
    }

    pub fn token_txs(&self) -> &BTreeMap<Hash256, TokenTx> {
        &self.token_txs
    }

    pub fn tip(&self) -> Option<(i32, Hash256)> {
        self.tip
    }

    pub fn tip_height(&self) -> Option<i32> {
        self.tip.map(|(height, _)| height)
    }
}

pub struct Wallet {
    state: Mutex<WalletState>,
    store: Arc<dyn KeyValueStore>,
    chain: Arc<dyn Chain>,
    signer: Arc<dyn SigningProvider>,
    config: WalletConfig,
    params: ChainParams,
    pub(crate) scan: ScanState,
}

impl Wallet {
    /// Opens the wallet held in `store`, resolving stored block hashes against `chain`.
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        chain: Arc<dyn Chain>,
        signer: Arc<dyn SigningProvider>,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        let params = chain_params(config.network);
        let records = with_load_retries("wallet record load", || {
            load_records(store.as_ref(), &params)
        })?;
        let tip = with_load_retries("chain tip query", || Ok(chain.tip()?))?;

        if records.version.is_none() {
            store.put(Column::Meta, META_VERSION, &WALLET_VERSION.to_le_bytes())?;
        }

        let mut ledger = Ledger::new();
        ledger.set_order_pos_next(records.order_pos_next);
        let mut unresolved = 0usize;
        for mut wtx in records.txs {
            if matches!(wtx.status(), TxStatus::Confirmed | TxStatus::Conflicted) {
                let block_hash = wtx.confirmation.block_hash;
                match with_load_retries("block height query", || {
                    Ok(chain.block_height(&block_hash)?)
                })? {
                    Some(height) => wtx.confirmation.block_height = height,
                    None => {
                        unresolved += 1;
                        wtx.confirmation = crate::tx::Confirmation::unconfirmed();
                    }
                }
            }
            ledger.insert(wtx);
        }

        yupost_log::log_info!(
            "wallet loaded: {} transactions, {} address book entries, tip {:?}",
            ledger.len(),
            records.address_book.len(),
            tip.map(|(height, _)| height)
        );
        if unresolved > 0 {
            yupost_log::log_info!(
                "{unresolved} wallet transactions reference blocks off the active chain; marked unconfirmed"
            );
        }

        let delegation_cache =
            DelegationCache::new(config.staker_cache_size, config.stake_cache_staleness);
        let state = WalletState {
            ledger,
            address_book: records.address_book,
            contract_book: records.contract_book,
            delegations: records.delegations,
            super_stakers: records.super_stakers,
            tokens: records.tokens,
            token_txs: records.token_txs,
            locked_coins: BTreeSet::new(),
            events: EventBus::new(),
            tip,
            delegation_cache,
            removed_delegations: BTreeMap::new(),
        };
        Ok(Self {
            state: Mutex::new(state),
            store,
            chain,
            signer,
            config,
            params,
            scan: ScanState::default(),
        })
    }

    /// Acquires the wallet lock. A poisoned lock means a writer panicked mid-transition,
    /// so the state can no longer be trusted.
    pub fn lock(&self) -> WalletGuard<'_> {
        WalletGuard {
            wallet: self,
            state: self.state.lock().expect("wallet state lock"),
        }
    }

    pub fn subscribe(&self) -> Receiver<WalletEvent> {
        self.lock().events.subscribe()
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn chain(&self) -> &dyn Chain {
        self.chain.as_ref()
    }

    pub fn signer(&self) -> &dyn SigningProvider {
        self.signer.as_ref()
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Applies one chain notification under the wallet lock.
    pub fn handle_chain_event(&self, event: ChainEvent) {
        let mut guard = self.lock();
        match event {
            ChainEvent::TransactionAddedToMempool { tx } => guard.transaction_added_to_mempool(tx),
            ChainEvent::TransactionRemovedFromMempool { tx, reason } => {
                guard.transaction_removed_from_mempool(&tx, reason)
            }
            ChainEvent::BlockConnected { block, height } => guard.block_connected(&block, height),
            ChainEvent::BlockDisconnected { block, height } => {
                guard.block_disconnected(&block, height)
            }
            ChainEvent::ChainStateFlushed { height, hash } => {
                guard.chain_state_flushed(height, hash)
            }
        }
    }
}

/// Proof that the wallet lock is held; dereferences to the guarded [`WalletState`].
pub struct WalletGuard<'a> {
    wallet: &'a Wallet,
    state: MutexGuard<'a, WalletState>,
}

impl Deref for WalletGuard<'_> {
    type Target = WalletState;

    fn deref(&self) -> &WalletState {
        &self.state
    }
}

impl DerefMut for WalletGuard<'_> {
    fn deref_mut(&mut self) -> &mut WalletState {
        &mut self.state
    }
}

impl<'a> WalletGuard<'a> {
    pub fn wallet(&self) -> &'a Wallet {
        self.wallet
    }

    pub(crate) fn emit(&mut self, event: WalletEvent) {
        self.state.events.emit(event);
    }

    pub(crate) fn write(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.wallet.store.write_batch(batch)
    }

    /// Writes from notification paths, where there is no caller to hand the error to.
    pub(crate) fn write_or_log(&self, batch: &WriteBatch, what: &str) {
        if let Err(err) = self.write(batch) {
            yupost_log::log_error!("failed to persist {what}: {err}");
        }
    }

    pub(crate) fn put_tx(&self, batch: &mut WriteBatch, wtx: &WalletTx) {
        batch.put(Column::Tx, wtx.txid, wtx.encode());
    }

    pub(crate) fn put_order_pos_next(&self, batch: &mut WriteBatch) {
        batch.put(
            Column::Meta,
            META_ORDER_POS_NEXT,
            self.ledger.order_pos_next().to_le_bytes(),
        );
    }

    pub(crate) fn chain_state_flushed(&mut self, height: i32, hash: Hash256) {
        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, META_BEST_BLOCK, encode_best_block(height, &hash));
        self.write_or_log(&batch, "best block");
        if let Err(err) = self.wallet.store.flush() {
            yupost_log::log_error!("wallet store flush failed: {err}");
        }
    }

    pub fn is_mine_script(&self, script_pubkey: &[u8]) -> IsMine {
        self.wallet.signer.is_mine(script_pubkey)
    }

    /// Watches `script_pubkey`. Earlier payments to it only appear after a rescan.
    pub fn add_watch_only(&mut self, script_pubkey: &[u8]) -> bool {
        if !self.wallet.signer.add_watch_only(script_pubkey) {
            return false;
        }
        self.ledger.mark_all_dirty();
        self.emit(WalletEvent::WatchOnlyChanged(true));
        self.emit(WalletEvent::BalanceChanged);
        true
    }

    fn address_string(&self, destination: &Destination) -> String {
        destination.encode(&self.wallet.params)
    }

    fn emit_address_book(&mut self, destination: &Destination, change: ChangeType) {
        let address = self.address_string(destination);
        let is_mine = self.is_mine_script(&destination.script_pubkey()) != IsMine::No;
        let (label, purpose) = self
            .address_book
            .get(destination)
            .map(|entry| (entry.label_str().to_string(), entry.purpose.clone()))
            .unwrap_or_default();
        self.emit(WalletEvent::AddressBookChanged {
            destination: address,
            label,
            is_mine,
            purpose,
            change,
        });
    }

    /// Names `destination`. An empty `purpose` keeps the stored one.
    pub fn set_address_book(
        &mut self,
        destination: Destination,
        label: &str,
        purpose: &str,
    ) -> Result<(), WalletError> {
        let mut entry = self.address_book.get(&destination).cloned().unwrap_or_default();
        let change = if self.address_book.get(&destination).is_some() {
            ChangeType::Updated
        } else {
            ChangeType::New
        };
        entry.label = Some(label.to_string());
        if !purpose.is_empty() {
            entry.purpose = purpose.to_string();
        }
        let address = self.address_string(&destination);
        let mut batch = WriteBatch::new();
        batch.put(Column::AddressBook, address.into_bytes(), entry.encode());
        self.write(&batch)?;

        self.address_book.set(destination, label, purpose);
        self.emit_address_book(&destination, change);
        Ok(())
    }

    /// Deletes the entry for `destination` and all of its destination data.
    pub fn del_address_book(&mut self, destination: &Destination) -> Result<bool, WalletError> {
        let Some(entry) = self.address_book.get(destination).cloned() else {
            return Ok(false);
        };
        let address = self.address_string(destination);
        let mut batch = WriteBatch::new();
        for key in entry.dest_data.keys() {
            batch.delete(Column::DestData, dest_data_key(&address, key));
        }
        batch.delete(Column::AddressBook, address.into_bytes());
        self.write(&batch)?;

        self.emit_address_book(destination, ChangeType::Deleted);
        self.address_book.remove(destination);
        Ok(true)
    }

    pub fn set_dest_data(
        &mut self,
        destination: Destination,
        key: &str,
        value: &str,
    ) -> Result<(), WalletError> {
        let address = self.address_string(&destination);
        let mut batch = WriteBatch::new();
        batch.put(
            Column::DestData,
            dest_data_key(&address, key),
            value.as_bytes().to_vec(),
        );
        self.write(&batch)?;
        self.address_book.set_dest_data(destination, key, value);
        Ok(())
    }

    pub fn erase_dest_data(
        &mut self,
        destination: &Destination,
        key: &str,
    ) -> Result<bool, WalletError> {
        if self.address_book.dest_data(destination, key).is_none() {
            return Ok(false);
        }
        let address = self.address_string(destination);
        let mut batch = WriteBatch::new();
        batch.delete(Column::DestData, dest_data_key(&address, key));
        self.write(&batch)?;
        Ok(self.address_book.erase_dest_data(destination, key))
    }

    pub fn set_contract_book(
        &mut self,
        address: &str,
        name: &str,
        abi: &str,
    ) -> Result<(), WalletError> {
        let entry = ContractBookEntry {
            name: name.to_string(),
            abi: abi.to_string(),
        };
        let mut batch = WriteBatch::new();
        batch.put(Column::ContractBook, address.as_bytes().to_vec(), entry.encode());
        self.write(&batch)?;
        let change = self.contract_book.set(address, entry);
        self.emit(WalletEvent::ContractBookChanged {
            address: address.to_string(),
            label: name.to_string(),
            abi: abi.to_string(),
            change,
        });
        Ok(())
    }

    pub fn del_contract_book(&mut self, address: &str) -> Result<bool, WalletError> {
        if self.contract_book.get(address).is_none() {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        batch.delete(Column::ContractBook, address.as_bytes().to_vec());
        self.write(&batch)?;
        let removed = self.contract_book.remove(address).unwrap_or_default();
        self.emit(WalletEvent::ContractBookChanged {
            address: address.to_string(),
            label: removed.name,
            abi: removed.abi,
            change: ChangeType::Deleted,
        });
        Ok(true)
    }

    /// Stores `record`, replacing any record with the same id.
    pub fn add_delegation(&mut self, record: DelegationRecord) -> Result<Hash256, WalletError> {
        let id = record.id();
        let mut batch = WriteBatch::new();
        batch.put(Column::Delegation, id, record.encode());
        self.write(&batch)?;
        let change = match self.delegations.insert(id, record) {
            Some(_) => ChangeType::Updated,
            None => ChangeType::New,
        };
        self.emit(WalletEvent::DelegationChanged { id, change });
        Ok(id)
    }

    pub fn remove_delegation(&mut self, id: &Hash256) -> Result<bool, WalletError> {
        if !self.delegations.contains_key(id) {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        batch.delete(Column::Delegation, *id);
        self.write(&batch)?;
        self.delegations.remove(id);
        self.emit(WalletEvent::DelegationChanged {
            id: *id,
            change: ChangeType::Deleted,
        });
        Ok(true)
    }

    pub fn add_super_staker(&mut self, record: SuperStakerRecord) -> Result<Hash256, WalletError> {
        let id = record.id();
        let mut batch = WriteBatch::new();
        batch.put(Column::SuperStaker, id, record.encode());
        self.write(&batch)?;
        let change = match self.super_stakers.insert(id, record) {
            Some(_) => ChangeType::Updated,
            None => ChangeType::New,
        };
        // Staking policy changed; cached delegation weights may no longer apply.
        self.delegation_cache.invalidate_all();
        self.emit(WalletEvent::SuperStakerChanged { id, change });
        Ok(id)
    }

    pub fn remove_super_staker(&mut self, id: &Hash256) -> Result<bool, WalletError> {
        if !self.super_stakers.contains_key(id) {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        batch.delete(Column::SuperStaker, *id);
        self.write(&batch)?;
        self.super_stakers.remove(id);
        self.delegation_cache.invalidate_all();
        self.emit(WalletEvent::SuperStakerChanged {
            id: *id,
            change: ChangeType::Deleted,
        });
        Ok(true)
    }

    pub fn add_token(&mut self, token: TokenInfo) -> Result<Hash256, WalletError> {
        let id = token.id();
        let mut batch = WriteBatch::new();
        batch.put(Column::Token, id, token.encode());
        self.write(&batch)?;
        let change = match self.tokens.insert(id, token) {
            Some(_) => ChangeType::Updated,
            None => ChangeType::New,
        };
        self.emit(WalletEvent::TokenChanged { id, change });
        Ok(id)
    }

    pub fn remove_token(&mut self, id: &Hash256) -> Result<bool, WalletError> {
        if !self.tokens.contains_key(id) {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        batch.delete(Column::Token, *id);
        self.write(&batch)?;
        self.tokens.remove(id);
        self.emit(WalletEvent::TokenChanged {
            id: *id,
            change: ChangeType::Deleted,
        });
        Ok(true)
    }

    pub fn add_token_tx(&mut self, token_tx: TokenTx) -> Result<Hash256, WalletError> {
        let id = token_tx.id();
        let mut batch = WriteBatch::new();
        batch.put(Column::TokenTx, id, token_tx.encode());
        self.write(&batch)?;
        let change = match self.token_txs.insert(id, token_tx) {
            Some(_) => ChangeType::Updated,
            None => ChangeType::New,
        };
        self.emit(WalletEvent::TokenTxChanged { id, change });
        Ok(id)
    }

    pub fn remove_token_tx(&mut self, id: &Hash256) -> Result<bool, WalletError> {
        if !self.token_txs.contains_key(id) {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        batch.delete(Column::TokenTx, *id);
        self.write(&batch)?;
        self.token_txs.remove(id);
        self.emit(WalletEvent::TokenTxChanged {
            id: *id,
            change: ChangeType::Deleted,
        });
        Ok(true)
    }

    pub fn lock_coin(&mut self, outpoint: OutPoint) -> bool {
        self.locked_coins.insert(outpoint)
    }

    pub fn unlock_coin(&mut self, outpoint: &OutPoint) -> bool {
        self.locked_coins.remove(outpoint)
    }

    pub fn unlock_all_coins(&mut self) {
        self.locked_coins.clear();
    }

    pub fn is_locked_coin(&self, outpoint: &OutPoint) -> bool {
        self.locked_coins.contains(outpoint)
    }

    pub fn list_locked_coins(&self) -> Vec<OutPoint> {
        self.locked_coins.iter().copied().collect()
    }
}
