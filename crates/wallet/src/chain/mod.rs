//! The wallet's view of the node: chain queries, broadcast, and ordered notifications.

pub mod memory;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use yupost_consensus::money::Amount;
use yupost_consensus::{Hash160, Hash256};
use yupost_log as logging;
use yupost_primitives::{Block, Destination, OutPoint, Transaction, TxOut};

use crate::fees::FeeRate;
use crate::wallet::Wallet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    Unavailable(String),
    Rejected(String),
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Unavailable(message) => write!(f, "chain unavailable: {message}"),
            ChainError::Rejected(message) => write!(f, "rejected: {message}"),
        }
    }
}

impl std::error::Error for ChainError {}

/// An unspent output held by some address, as indexed by the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainCoin {
    pub outpoint: OutPoint,
    pub txout: TxOut,
    pub height: i32,
    pub block_time: u32,
    pub is_coinstake: bool,
}

/// A delegation currently in force on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainDelegation {
    pub delegator: Hash160,
    pub staker: Hash160,
    pub fee: u8,
    pub block_height: i32,
    pub proof_of_delegation: Vec<u8>,
}

/// Inputs needed to search for a stake on top of the current tip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeContext {
    pub prev_hash: Hash256,
    /// Height of the block being staked.
    pub height: i32,
    pub time: u32,
    pub bits: u32,
    pub stake_modifier: Hash256,
    pub reward: Amount,
}

/// A kernel found by the stake search, ready for the node to assemble into a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeSolution {
    pub prev_hash: Hash256,
    pub height: i32,
    pub time: u32,
    pub bits: u32,
    pub prevout_stake: OutPoint,
    pub kernel_hash: Hash256,
    pub coinstake: Transaction,
    pub proof_of_delegation: Vec<u8>,
}

pub trait Chain: Send + Sync {
    fn tip(&self) -> Result<Option<(i32, Hash256)>, ChainError>;
    fn block_hash(&self, height: i32) -> Result<Option<Hash256>, ChainError>;
    /// Height of `hash` on the active chain, `None` if unknown or reorged out.
    fn block_height(&self, hash: &Hash256) -> Result<Option<i32>, ChainError>;
    fn read_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError>;
    fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), ChainError>;
    fn estimate_fee(&self, target: u32) -> Result<Option<FeeRate>, ChainError>;
    fn address_coins(&self, destination: &Destination) -> Result<Vec<ChainCoin>, ChainError>;
    fn delegations_for_staker(&self, staker: &Hash160)
        -> Result<Vec<ChainDelegation>, ChainError>;
    fn stake_context(&self) -> Result<StakeContext, ChainError>;
    fn submit_stake(&self, solution: StakeSolution) -> Result<(), ChainError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemovalReason {
    Expiry,
    SizeLimit,
    Reorg,
    Block,
    Conflict,
    Replaced,
}

#[derive(Clone, Debug)]
pub enum ChainEvent {
    TransactionAddedToMempool {
        tx: Arc<Transaction>,
    },
    TransactionRemovedFromMempool {
        tx: Arc<Transaction>,
        reason: RemovalReason,
    },
    BlockConnected {
        block: Arc<Block>,
        height: i32,
    },
    BlockDisconnected {
        block: Arc<Block>,
        height: i32,
    },
    ChainStateFlushed {
        height: i32,
        hash: Hash256,
    },
}

/// Applies chain events to `wallet` in arrival order until every sender is dropped.
pub fn spawn_chain_listener(
    wallet: Arc<Wallet>,
    events: Receiver<ChainEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("wallet-notify".to_string())
        .spawn(move || {
            for event in events.iter() {
                wallet.handle_chain_event(event);
            }
            logging::log_debug!("chain notification channel closed");
        })
}
