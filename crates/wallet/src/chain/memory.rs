//! In-memory chain with an active block list, a mempool and fault injection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use yupost_consensus::money::{Amount, COIN};
use yupost_consensus::{Hash160, Hash256};
use yupost_primitives::block::CURRENT_VERSION;
use yupost_primitives::hash::sha256d;
use yupost_primitives::{Block, BlockHeader, Destination, OutPoint, Transaction, TxIn, TxOut};
use yupost_script::delegation::DelegationPayload;
use yupost_script::message::verify_proof_of_delegation;
use yupost_script::standard::extract_destination;

use super::{
    Chain, ChainCoin, ChainDelegation, ChainError, ChainEvent, RemovalReason, StakeContext,
    StakeSolution,
};
use crate::fees::FeeRate;

pub const GENESIS_TIME: u32 = 1_700_000_000;
pub const BLOCK_SPACING_SECS: u32 = 32;
pub const DEFAULT_STAKE_BITS: u32 = 0x207f_ffff;
pub const DEFAULT_STAKE_REWARD: Amount = 4 * COIN;

/// Called with the height of every block handed out by `read_block`.
pub type ReadHook = Arc<dyn Fn(i32) + Send + Sync>;

#[derive(Default)]
struct MemoryChainState {
    active: Vec<Arc<Block>>,
    heights: HashMap<Hash256, i32>,
    known: HashMap<Hash256, Arc<Block>>,
    mempool: BTreeMap<Hash256, Arc<Transaction>>,
    broadcasts: Vec<Transaction>,
    stakes: Vec<StakeSolution>,
    unreadable: HashSet<Hash256>,
    fee_estimate: Option<FeeRate>,
    stake_bits: Option<u32>,
    stake_reward: Option<Amount>,
}

#[derive(Default)]
pub struct MemoryChain {
    inner: Mutex<MemoryChainState>,
    unavailable: AtomicBool,
    failing_queries: AtomicUsize,
    reject_broadcast: AtomicBool,
    read_hook: Mutex<Option<ReadHook>>,
}

/// A coinbase whose script commits to `height`, so every block's coinbase has a distinct id.
pub fn coinbase_transaction(height: i32, outputs: Vec<TxOut>) -> Transaction {
    let mut tx = Transaction::new(2);
    let mut input = TxIn::new(OutPoint::null(), u32::MAX);
    input.script_sig = height.to_le_bytes().to_vec();
    tx.vin.push(input);
    tx.vout = outputs;
    tx
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryChainState> {
        self.inner.lock().expect("memory chain lock")
    }

    fn check_available(&self) -> Result<(), ChainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("memory chain offline".to_string()));
        }
        let failed = self
            .failing_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ChainError::Unavailable("memory chain busy".to_string()));
        }
        Ok(())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` queries fail with `Unavailable`.
    pub fn fail_next_queries(&self, count: usize) {
        self.failing_queries.store(count, Ordering::SeqCst);
    }

    pub fn set_reject_broadcast(&self, reject: bool) {
        self.reject_broadcast.store(reject, Ordering::SeqCst);
    }

    pub fn set_unreadable(&self, hash: Hash256, unreadable: bool) {
        let mut state = self.state();
        if unreadable {
            state.unreadable.insert(hash);
        } else {
            state.unreadable.remove(&hash);
        }
    }

    /// Installs a callback run after each successful block read, outside the chain lock.
    pub fn set_read_hook(&self, hook: Option<ReadHook>) {
        *self.read_hook.lock().expect("memory chain lock") = hook;
    }

    pub fn set_fee_estimate(&self, rate: Option<FeeRate>) {
        self.state().fee_estimate = rate;
    }

    pub fn set_stake_params(&self, bits: u32, reward: Amount) {
        let mut state = self.state();
        state.stake_bits = Some(bits);
        state.stake_reward = Some(reward);
    }

    /// Height of the tip, or -1 for an empty chain.
    pub fn height(&self) -> i32 {
        self.state().active.len() as i32 - 1
    }

    pub fn block_at(&self, height: i32) -> Option<Arc<Block>> {
        let state = self.state();
        usize::try_from(height)
            .ok()
            .and_then(|idx| state.active.get(idx).cloned())
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state().broadcasts.clone()
    }

    pub fn stakes(&self) -> Vec<StakeSolution> {
        self.state().stakes.clone()
    }

    pub fn mempool_contains(&self, txid: &Hash256) -> bool {
        self.state().mempool.contains_key(txid)
    }

    /// Appends a block holding `transactions`, prefixed with a coinbase when none is given.
    pub fn connect_block(&self, mut transactions: Vec<Transaction>) -> ChainEvent {
        let mut state = self.state();
        let height = state.active.len() as i32;
        if !transactions.first().is_some_and(Transaction::is_coinbase) {
            transactions.insert(0, coinbase_transaction(height, Vec::new()));
        }
        let prev_block = state
            .active
            .last()
            .map(|block| block.hash())
            .unwrap_or([0u8; 32]);
        let mut block = Block {
            header: BlockHeader {
                version: CURRENT_VERSION,
                prev_block,
                merkle_root: [0u8; 32],
                time: block_time(height),
                bits: state.stake_bits.unwrap_or(DEFAULT_STAKE_BITS),
                nonce: height as u32,
                prevout_stake: OutPoint::null(),
                block_sig: Vec::new(),
                proof_of_delegation: Vec::new(),
            },
            transactions,
        };
        block.header.merkle_root = block.compute_merkle_root();
        let block = Arc::new(block);
        let hash = block.hash();
        for tx in &block.transactions {
            state.mempool.remove(&tx.txid());
        }
        state.heights.insert(hash, height);
        state.known.insert(hash, Arc::clone(&block));
        state.active.push(Arc::clone(&block));
        ChainEvent::BlockConnected { block, height }
    }

    pub fn disconnect_tip(&self) -> Option<ChainEvent> {
        let mut state = self.state();
        let block = state.active.pop()?;
        let height = state.active.len() as i32;
        state.heights.remove(&block.hash());
        Some(ChainEvent::BlockDisconnected { block, height })
    }

    pub fn add_to_mempool(&self, tx: Transaction) -> ChainEvent {
        let tx = Arc::new(tx);
        self.state().mempool.insert(tx.txid(), Arc::clone(&tx));
        ChainEvent::TransactionAddedToMempool { tx }
    }

    pub fn remove_from_mempool(&self, txid: &Hash256, reason: RemovalReason) -> Option<ChainEvent> {
        let tx = self.state().mempool.remove(txid)?;
        Some(ChainEvent::TransactionRemovedFromMempool { tx, reason })
    }

    pub fn flush_event(&self) -> Option<ChainEvent> {
        let state = self.state();
        let block = state.active.last()?;
        Some(ChainEvent::ChainStateFlushed {
            height: state.active.len() as i32 - 1,
            hash: block.hash(),
        })
    }

    fn utxos(state: &MemoryChainState) -> BTreeMap<OutPoint, ChainCoin> {
        let mut coins = BTreeMap::new();
        for (height, block) in state.active.iter().enumerate() {
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    for input in &tx.vin {
                        coins.remove(&input.prevout);
                    }
                }
                let txid = tx.txid();
                for (index, txout) in tx.vout.iter().enumerate() {
                    if txout.is_empty() {
                        continue;
                    }
                    coins.insert(
                        OutPoint::new(txid, index as u32),
                        ChainCoin {
                            outpoint: OutPoint::new(txid, index as u32),
                            txout: txout.clone(),
                            height: height as i32,
                            block_time: block.header.time,
                            is_coinstake: tx.is_coinstake(),
                        },
                    );
                }
            }
        }
        coins
    }

    fn active_delegations(state: &MemoryChainState) -> BTreeMap<Hash160, ChainDelegation> {
        let mut outputs: HashMap<OutPoint, TxOut> = HashMap::new();
        let mut delegations = BTreeMap::new();
        for (height, block) in state.active.iter().enumerate() {
            for tx in &block.transactions {
                let sender = crate::stake::delegation_sender(tx, |prevout| {
                    outputs.get(prevout).cloned()
                });
                if let Some(delegator) = sender {
                    for payload in tx
                        .vout
                        .iter()
                        .filter_map(|out| DelegationPayload::from_script_pubkey(&out.script_pubkey))
                    {
                        match payload {
                            DelegationPayload::Add {
                                staker,
                                fee,
                                proof_of_delegation,
                            } => {
                                if verify_proof_of_delegation(
                                    &staker,
                                    &delegator,
                                    &proof_of_delegation,
                                ) {
                                    delegations.insert(
                                        delegator,
                                        ChainDelegation {
                                            delegator,
                                            staker,
                                            fee,
                                            block_height: height as i32,
                                            proof_of_delegation,
                                        },
                                    );
                                }
                            }
                            DelegationPayload::Remove { staker } => {
                                if delegations
                                    .get(&delegator)
                                    .is_some_and(|entry: &ChainDelegation| entry.staker == staker)
                                {
                                    delegations.remove(&delegator);
                                }
                            }
                        }
                    }
                }
                let txid = tx.txid();
                for (index, txout) in tx.vout.iter().enumerate() {
                    outputs.insert(OutPoint::new(txid, index as u32), txout.clone());
                }
            }
        }
        delegations
    }
}

fn block_time(height: i32) -> u32 {
    GENESIS_TIME.saturating_add((height.max(0) as u32).saturating_mul(BLOCK_SPACING_SECS))
}

impl Chain for MemoryChain {
    fn tip(&self) -> Result<Option<(i32, Hash256)>, ChainError> {
        self.check_available()?;
        let state = self.state();
        Ok(state
            .active
            .last()
            .map(|block| (state.active.len() as i32 - 1, block.hash())))
    }

    fn block_hash(&self, height: i32) -> Result<Option<Hash256>, ChainError> {
        self.check_available()?;
        let state = self.state();
        Ok(usize::try_from(height)
            .ok()
            .and_then(|idx| state.active.get(idx))
            .map(|block| block.hash()))
    }

    fn block_height(&self, hash: &Hash256) -> Result<Option<i32>, ChainError> {
        self.check_available()?;
        Ok(self.state().heights.get(hash).copied())
    }

    fn read_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        self.check_available()?;
        let (block, height) = {
            let state = self.state();
            if state.unreadable.contains(hash) {
                return Err(ChainError::Unavailable("block data unreadable".to_string()));
            }
            (
                state.known.get(hash).map(|block| Block::clone(block)),
                state.heights.get(hash).copied(),
            )
        };
        let hook = self.read_hook.lock().expect("memory chain lock").clone();
        if let (Some(hook), Some(_), Some(height)) = (hook, &block, height) {
            hook(height);
        }
        Ok(block)
    }

    fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), ChainError> {
        self.check_available()?;
        if self.reject_broadcast.load(Ordering::SeqCst) {
            return Err(ChainError::Rejected("broadcast refused".to_string()));
        }
        let mut state = self.state();
        state.broadcasts.push(tx.clone());
        state.mempool.insert(tx.txid(), Arc::new(tx.clone()));
        Ok(())
    }

    fn estimate_fee(&self, _target: u32) -> Result<Option<FeeRate>, ChainError> {
        self.check_available()?;
        Ok(self.state().fee_estimate)
    }

    fn address_coins(&self, destination: &Destination) -> Result<Vec<ChainCoin>, ChainError> {
        self.check_available()?;
        let state = self.state();
        Ok(Self::utxos(&state)
            .into_values()
            .filter(|coin| extract_destination(&coin.txout.script_pubkey).as_ref() == Some(destination))
            .collect())
    }

    fn delegations_for_staker(
        &self,
        staker: &Hash160,
    ) -> Result<Vec<ChainDelegation>, ChainError> {
        self.check_available()?;
        let state = self.state();
        Ok(Self::active_delegations(&state)
            .into_values()
            .filter(|delegation| &delegation.staker == staker)
            .collect())
    }

    fn stake_context(&self) -> Result<StakeContext, ChainError> {
        self.check_available()?;
        let state = self.state();
        let tip = state
            .active
            .last()
            .ok_or_else(|| ChainError::Unavailable("empty chain".to_string()))?;
        let tip_hash = tip.hash();
        let height = state.active.len() as i32;
        let mut modifier_input = tip_hash.to_vec();
        modifier_input.extend_from_slice(&height.to_le_bytes());
        Ok(StakeContext {
            prev_hash: tip_hash,
            height,
            time: block_time(height),
            bits: state.stake_bits.unwrap_or(DEFAULT_STAKE_BITS),
            stake_modifier: sha256d(&modifier_input),
            reward: state.stake_reward.unwrap_or(DEFAULT_STAKE_REWARD),
        })
    }

    fn submit_stake(&self, solution: StakeSolution) -> Result<(), ChainError> {
        self.check_available()?;
        self.state().stakes.push(solution);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yupost_primitives::address::p2pkh_script;

    #[test]
    fn connect_and_disconnect_track_heights() {
        let chain = MemoryChain::new();
        assert_eq!(chain.tip().expect("tip"), None);
        let first = chain.connect_block(Vec::new());
        let ChainEvent::BlockConnected { block, height } = first else {
            panic!("expected connect event");
        };
        assert_eq!(height, 0);
        assert!(block.transactions[0].is_coinbase());
        chain.connect_block(Vec::new());
        assert_eq!(chain.height(), 1);

        let event = chain.disconnect_tip().expect("disconnect");
        assert!(matches!(event, ChainEvent::BlockDisconnected { height: 1, .. }));
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.block_height(&block.hash()).expect("height"), Some(0));
    }

    #[test]
    fn address_coins_tracks_spends() {
        let chain = MemoryChain::new();
        let script = p2pkh_script(&[3u8; 20]);
        let funding = coinbase_transaction(0, vec![TxOut::new(5 * COIN, script.clone())]);
        let funding_id = funding.txid();
        chain.connect_block(vec![funding]);
        let dest = Destination::PubKeyHash([3u8; 20]);
        assert_eq!(chain.address_coins(&dest).expect("coins").len(), 1);

        let mut spend = Transaction::new(2);
        spend.vin.push(TxIn::new(OutPoint::new(funding_id, 0), u32::MAX));
        spend.vout.push(TxOut::new(COIN, p2pkh_script(&[4u8; 20])));
        chain.connect_block(vec![spend]);
        assert!(chain.address_coins(&dest).expect("coins").is_empty());
    }

    #[test]
    fn query_failures_are_injected() {
        let chain = MemoryChain::new();
        chain.fail_next_queries(2);
        assert!(chain.tip().is_err());
        assert!(chain.tip().is_err());
        assert!(chain.tip().is_ok());
        chain.set_unavailable(true);
        assert!(chain.block_hash(0).is_err());
    }

    #[test]
    fn read_hook_sees_each_block_read() {
        let chain = MemoryChain::new();
        chain.connect_block(Vec::new());
        chain.connect_block(Vec::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        chain.set_read_hook(Some(Arc::new(move |height: i32| {
            record.lock().expect("seen").push(height);
        })));
        for height in [1, 0] {
            let hash = chain.block_hash(height).expect("hash").expect("block");
            assert!(chain.read_block(&hash).expect("read").is_some());
        }
        assert!(chain.read_block(&[0xee; 32]).expect("read").is_none());
        assert_eq!(*seen.lock().expect("seen"), vec![1, 0]);

        chain.set_read_hook(None);
        let hash = chain.block_hash(0).expect("hash").expect("block");
        chain.read_block(&hash).expect("read");
        assert_eq!(seen.lock().expect("seen").len(), 2);
    }
}
