//! Proof-of-stake search over owned and delegated coins.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use primitive_types::U256;
use serde::Serialize;
use yupost_consensus::constants::CURRENT_TX_VERSION;
use yupost_consensus::money::{format_amount, Amount};
use yupost_consensus::{Hash160, Hash256};
use yupost_log as logging;
use yupost_primitives::encoding::{Encodable, Encoder};
use yupost_primitives::hash::sha256d;
use yupost_primitives::hex::hash256_to_hex;
use yupost_primitives::{Destination, OutPoint, Transaction, TxIn, TxOut};
use yupost_script::standard::extract_destination;

use crate::chain::{ChainCoin, ChainDelegation, StakeContext, StakeSolution};
use crate::coin_control::SpendableOutput;
use crate::config::MIN_STAKE_SEARCH_INTERVAL_MS;
use crate::error::WalletError;
use crate::records::SuperStakerRecord;
use crate::signing::IsMine;
use crate::wallet::Wallet;

/// Coinstake inputs use a final sequence.
const COINSTAKE_SEQUENCE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;
    if (bits & 0x0080_0000) != 0 {
        return Err(CompactError::Negative);
    }

    let value = if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        U256::from(word) << (8 * (size - 3))
    };

    if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
        return Err(CompactError::Overflow);
    }
    Ok(value)
}

/// Kernel hash of `prevout` at the stake timestamp `time`.
pub fn kernel_hash(stake_modifier: &Hash256, prevout: &OutPoint, time: u32) -> Hash256 {
    let mut encoder = Encoder::new();
    encoder.write_hash_le(stake_modifier);
    prevout.consensus_encode(&mut encoder);
    encoder.write_u32_le(time);
    sha256d(&encoder.into_inner())
}

/// Whether `hash` meets the target scaled by the coin's `value`. A product beyond 256
/// bits meets any hash.
pub fn check_kernel(hash: &Hash256, bits: u32, value: Amount) -> Result<bool, CompactError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() || value <= 0 {
        return Ok(false);
    }
    let Some(weighted) = target.checked_mul(U256::from(value as u64)) else {
        return Ok(true);
    };
    Ok(U256::from_little_endian(hash) <= weighted)
}

/// The address that signed a delegation transaction: the destination paid by the output its
/// first input spends.
pub fn delegation_sender(
    tx: &Transaction,
    lookup: impl FnOnce(&OutPoint) -> Option<TxOut>,
) -> Option<Hash160> {
    if tx.is_coinbase() {
        return None;
    }
    let first = tx.vin.first()?;
    let spent = lookup(&first.prevout)?;
    match extract_destination(&spent.script_pubkey)? {
        Destination::PubKeyHash(hash) => Some(hash),
        Destination::ScriptHash(_) => None,
    }
}

/// A coin delegated to one of our staker addresses, with the grant covering it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegatedCoin {
    pub coin: ChainCoin,
    pub staker: Hash160,
    pub delegation: ChainDelegation,
}

/// Delegated coins keyed by outpoint, valid for a bounded number of blocks past the height
/// they were fetched at. Confirmed delegation changes clear the cache and bump the
/// generation so in-flight refreshes computed before the change are discarded.
#[derive(Debug)]
pub struct DelegationCache {
    capacity: usize,
    staleness: i32,
    generation: u64,
    computed_height: Option<i32>,
    entries: BTreeMap<OutPoint, DelegatedCoin>,
}

impl DelegationCache {
    pub fn new(capacity: usize, staleness: i32) -> Self {
        Self {
            capacity,
            staleness: staleness.max(0),
            generation: 0,
            computed_height: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
        self.computed_height = None;
        self.generation += 1;
    }

    pub fn is_fresh(&self, height: i32) -> bool {
        self.computed_height
            .is_some_and(|computed| height >= computed && height - computed <= self.staleness)
    }

    /// Cached coins when still fresh at `height`.
    pub fn get(&self, height: i32) -> Option<Vec<DelegatedCoin>> {
        self.is_fresh(height)
            .then(|| self.entries.values().cloned().collect())
    }

    /// Stores a refresh computed at `height` under `generation`; refreshes that raced with
    /// an invalidation are dropped.
    pub fn store(&mut self, generation: u64, height: i32, coins: Vec<DelegatedCoin>) -> bool {
        if generation != self.generation {
            return false;
        }
        self.entries = coins
            .into_iter()
            .take(self.capacity)
            .map(|coin| (coin.coin.outpoint, coin))
            .collect();
        self.computed_height = Some(height);
        true
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StakeWeight {
    pub mine: Amount,
    pub delegated: Amount,
}

#[derive(Clone, Debug)]
struct OwnStakeCoin {
    outpoint: OutPoint,
    txout: TxOut,
}

#[derive(Clone, Debug)]
enum Kernel {
    Own(OwnStakeCoin),
    Delegated(DelegatedCoin),
}

impl Kernel {
    fn outpoint(&self) -> OutPoint {
        match self {
            Kernel::Own(coin) => coin.outpoint,
            Kernel::Delegated(coin) => coin.coin.outpoint,
        }
    }

    fn value(&self) -> Amount {
        match self {
            Kernel::Own(coin) => coin.txout.value,
            Kernel::Delegated(coin) => coin.coin.txout.value,
        }
    }
}

/// Splits `reward` between a staker keeping `fee` percent and the delegator.
pub fn split_reward(reward: Amount, fee: u8) -> (Amount, Amount) {
    let staker = reward * Amount::from(fee.min(100)) / 100;
    (staker, reward - staker)
}

impl Wallet {
    /// Mature own coins that can be staked, in outpoint order. Coins below the staking
    /// floor are skipped, and the chosen coins never add up to more than the trusted
    /// balance minus the reserve.
    fn own_stake_coins(&self) -> Vec<OwnStakeCoin> {
        let guard = self.lock();
        let config = self.config();
        let min_depth = self.params().stake_min_confirmations;
        let balance = guard.get_balance().mine_trusted;
        let mut budget = balance - config.reserve_balance;
        if budget <= 0 {
            logging::log_debug!(
                "balance {} within reserve {}, not staking own coins",
                format_amount(balance),
                format_amount(config.reserve_balance)
            );
            return Vec::new();
        }

        let mut candidates: Vec<SpendableOutput> = guard
            .available_coins(None, true)
            .into_iter()
            .filter(|coin| {
                coin.spendable
                    && coin.depth >= min_depth
                    && coin.txout.value >= config.staking_min_value
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.txout
                .value
                .cmp(&a.txout.value)
                .then_with(|| a.outpoint.cmp(&b.outpoint))
        });
        let mut coins = Vec::with_capacity(candidates.len());
        for coin in candidates {
            if coin.txout.value > budget {
                continue;
            }
            budget -= coin.txout.value;
            coins.push(OwnStakeCoin {
                outpoint: coin.outpoint,
                txout: coin.txout,
            });
        }
        coins.sort_by_key(|coin| coin.outpoint);
        coins
    }

    /// Super-staker records for addresses we can sign with.
    fn staker_records(&self) -> Vec<SuperStakerRecord> {
        let guard = self.lock();
        guard
            .super_stakers
            .values()
            .filter(|record| {
                let script = Destination::PubKeyHash(record.staker_address).script_pubkey();
                guard.is_mine_script(&script) == IsMine::Spendable
            })
            .cloned()
            .collect()
    }

    /// Coins delegated to our super stakers that pass their policy at the height being
    /// staked. Served from the delegation cache while it is fresh; refreshed from the chain
    /// without holding the wallet lock otherwise.
    fn delegated_coins(&self, height: i32) -> Result<(u64, Vec<DelegatedCoin>), WalletError> {
        let generation = {
            let guard = self.lock();
            let generation = guard.delegation_cache.generation();
            if !self.config().super_staking {
                return Ok((generation, Vec::new()));
            }
            if let Some(coins) = guard.delegation_cache.get(height) {
                return Ok((generation, coins));
            }
            generation
        };

        let min_depth = self.params().stake_min_confirmations;
        let mut coins = Vec::new();
        for record in self.staker_records() {
            for delegation in self.chain().delegations_for_staker(&record.staker_address)? {
                let delegator = Destination::PubKeyHash(delegation.delegator);
                for coin in self.chain().address_coins(&delegator)? {
                    if height - coin.height < min_depth {
                        continue;
                    }
                    if !record.accepts(
                        &delegation.delegator,
                        delegation.fee,
                        coin.txout.value,
                        self.config(),
                    ) {
                        continue;
                    }
                    coins.push(DelegatedCoin {
                        coin,
                        staker: record.staker_address,
                        delegation: delegation.clone(),
                    });
                }
            }
        }
        coins.sort_by_key(|coin| coin.coin.outpoint);
        coins.dedup_by_key(|coin| coin.coin.outpoint);

        let mut guard = self.lock();
        if !guard.delegation_cache.store(generation, height, coins.clone()) {
            logging::log_debug!("delegation cache invalidated during refresh");
        }
        Ok((generation, coins))
    }

    /// Value of our mature coins and of the coins delegated to our super stakers.
    pub fn stake_weight(&self) -> Result<StakeWeight, WalletError> {
        let mine = self
            .own_stake_coins()
            .iter()
            .map(|coin| coin.txout.value)
            .sum();
        let height = self.lock().tip_height().map_or(0, |tip| tip + 1);
        let delegated = self
            .delegated_coins(height)?
            .1
            .iter()
            .map(|coin| coin.coin.txout.value)
            .sum();
        Ok(StakeWeight { mine, delegated })
    }

    /// One pass of the stake search at the chain's next stake timestamp. Candidates are
    /// snapshotted under the wallet lock and hashed outside it; the winner is re-checked
    /// under the lock before the coinstake is built.
    pub fn try_stake_once(&self) -> Result<Option<StakeSolution>, WalletError> {
        let context = self.chain().stake_context()?;
        let time = context.time & !self.params().stake_timestamp_mask;

        let mut candidates: Vec<Kernel> =
            self.own_stake_coins().into_iter().map(Kernel::Own).collect();
        let (generation, delegated) = self.delegated_coins(context.height)?;
        candidates.extend(delegated.into_iter().map(Kernel::Delegated));

        for kernel in candidates {
            let hash = kernel_hash(&context.stake_modifier, &kernel.outpoint(), time);
            let found = check_kernel(&hash, context.bits, kernel.value())
                .map_err(|_| WalletError::InvalidData("invalid stake target"))?;
            if !found {
                continue;
            }
            let Some(solution) = self.build_stake(&context, time, kernel, hash, generation)? else {
                continue;
            };
            logging::log_info!(
                "stake found at height {} with kernel {}",
                solution.height,
                hash256_to_hex(&solution.kernel_hash)
            );
            self.chain().submit_stake(solution.clone())?;
            return Ok(Some(solution));
        }
        logging::log_trace!("no stake kernel at time {time}");
        Ok(None)
    }

    fn build_stake(
        &self,
        context: &StakeContext,
        time: u32,
        kernel: Kernel,
        kernel_hash: Hash256,
        generation: u64,
    ) -> Result<Option<StakeSolution>, WalletError> {
        let guard = self.lock();
        let mut coinstake = Transaction::new(CURRENT_TX_VERSION);
        coinstake.vout.push(TxOut::empty());
        let proof_of_delegation = match &kernel {
            Kernel::Own(coin) => {
                if guard.is_spent(&coin.outpoint) || guard.is_locked_coin(&coin.outpoint) {
                    return Ok(None);
                }
                coinstake
                    .vin
                    .push(TxIn::new(coin.outpoint, COINSTAKE_SEQUENCE));
                coinstake.vout.push(TxOut::new(
                    coin.txout.value + context.reward,
                    coin.txout.script_pubkey.clone(),
                ));
                Vec::new()
            }
            Kernel::Delegated(delegated) => {
                if guard.delegation_cache.generation() != generation {
                    // A delegation changed since the snapshot.
                    return Ok(None);
                }
                let staker = Destination::PubKeyHash(delegated.staker);
                let Some(fee_coin) = guard
                    .available_coins(None, true)
                    .into_iter()
                    .filter(|coin| coin.spendable && coin.destination() == Some(staker))
                    .min_by_key(|coin| (coin.txout.value, coin.outpoint))
                else {
                    logging::log_debug!(
                        "super staker {} has no coin to carry a coinstake",
                        staker.encode(self.params())
                    );
                    return Ok(None);
                };
                let (staker_reward, delegator_reward) =
                    split_reward(context.reward, delegated.delegation.fee);
                coinstake
                    .vin
                    .push(TxIn::new(fee_coin.outpoint, COINSTAKE_SEQUENCE));
                coinstake.vout.push(TxOut::new(
                    fee_coin.txout.value + staker_reward,
                    fee_coin.txout.script_pubkey.clone(),
                ));
                if delegator_reward > 0 {
                    coinstake.vout.push(TxOut::new(
                        delegator_reward,
                        Destination::PubKeyHash(delegated.delegation.delegator).script_pubkey(),
                    ));
                }
                delegated.delegation.proof_of_delegation.clone()
            }
        };
        guard.sign_transaction(&mut coinstake)?;
        Ok(Some(StakeSolution {
            prev_hash: context.prev_hash,
            height: context.height,
            time,
            bits: context.bits,
            prevout_stake: kernel.outpoint(),
            kernel_hash,
            coinstake,
            proof_of_delegation,
        }))
    }
}

/// Handle to the background stake search; dropping it without `stop` leaves the thread
/// running until the process exits.
pub struct StakerHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StakerHandle {
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                logging::log_error!("staker thread panicked");
            }
        }
    }
}

/// Starts the stake search loop. Each timestamp slot is searched once; the loop sleeps
/// for the configured interval, never less than the floor, between passes.
pub fn start_staking(wallet: Arc<Wallet>) -> std::io::Result<StakerHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let interval = wallet
        .config()
        .stake_search_interval
        .max(Duration::from_millis(MIN_STAKE_SEARCH_INTERVAL_MS));
    let flag = Arc::clone(&stop);
    let handle = thread::Builder::new()
        .name("wallet-staker".to_string())
        .spawn(move || {
            let mut last_slot = None;
            while !flag.load(Ordering::SeqCst) {
                let slot = wallet.chain().stake_context().ok().map(|context| {
                    (context.prev_hash, context.time & !wallet.params().stake_timestamp_mask)
                });
                if slot.is_some() && slot != last_slot {
                    match wallet.try_stake_once() {
                        Ok(_) => last_slot = slot,
                        Err(err) => logging::log_warn!("stake search failed: {err}"),
                    }
                }
                thread::park_timeout(interval);
            }
            logging::log_debug!("staker stopped");
        })?;
    Ok(StakerHandle {
        stop,
        handle: Some(handle),
    })
}
