//! Per-network chain parameters.

use crate::constants::{COINBASE_MATURITY, STAKE_TIMESTAMP_MASK};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Network::Mainnet),
            "test" | "testnet" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub pubkey_address_prefix: u8,
    pub script_address_prefix: u8,
    pub secret_key_prefix: u8,
    /// Blocks a coinbase or coinstake output must wait before it can be spent.
    pub coinbase_maturity: i32,
    /// Confirmations an output needs before it may be used as a stake kernel.
    pub stake_min_confirmations: i32,
    pub stake_timestamp_mask: u32,
    /// Compact proof-of-stake limit.
    pub pos_limit_bits: u32,
    pub target_spacing_secs: u32,
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => ChainParams {
            network,
            pubkey_address_prefix: 78,
            script_address_prefix: 80,
            secret_key_prefix: 0x80,
            coinbase_maturity: COINBASE_MATURITY,
            stake_min_confirmations: COINBASE_MATURITY,
            stake_timestamp_mask: STAKE_TIMESTAMP_MASK,
            pos_limit_bits: 0x1d00_ffff,
            target_spacing_secs: 32,
        },
        Network::Testnet => ChainParams {
            network,
            pubkey_address_prefix: 120,
            script_address_prefix: 110,
            secret_key_prefix: 0xef,
            coinbase_maturity: COINBASE_MATURITY,
            stake_min_confirmations: COINBASE_MATURITY,
            stake_timestamp_mask: STAKE_TIMESTAMP_MASK,
            pos_limit_bits: 0x1d00_ffff,
            target_spacing_secs: 32,
        },
        Network::Regtest => ChainParams {
            network,
            pubkey_address_prefix: 120,
            script_address_prefix: 110,
            secret_key_prefix: 0xef,
            coinbase_maturity: 100,
            stake_min_confirmations: 100,
            stake_timestamp_mask: STAKE_TIMESTAMP_MASK,
            pos_limit_bits: 0x207f_ffff,
            target_spacing_secs: 32,
        },
    }
}
