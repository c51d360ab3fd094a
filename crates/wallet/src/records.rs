//! Locally persisted delegation, super-staker and token records.
//!
//! Each record is stored under a content hash over its identity fields, so editing
//! bookkeeping fields (block number, fee, timestamps) keeps the same key.

use primitive_types::U256;
use yupost_consensus::money::Amount;
use yupost_consensus::{Hash160, Hash256};
use yupost_primitives::encoding::{DecodeError, Decoder, Encoder};
use yupost_primitives::hash::sha256d;

use crate::config::WalletConfig;

pub const RECORD_VERSION: i32 = 1;

const NULL_HASH: Hash256 = [0u8; 32];

fn finish(decoder: &Decoder) -> Result<(), DecodeError> {
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(())
}

fn write_u256(encoder: &mut Encoder, value: &U256) {
    for word in value.0 {
        encoder.write_u64_le(word);
    }
}

fn read_u256(decoder: &mut Decoder) -> Result<U256, DecodeError> {
    let bytes = decoder.read_fixed::<32>()?;
    Ok(U256::from_little_endian(&bytes))
}

/// A delegation this wallet created, from one of its addresses to a staker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegationRecord {
    pub version: i32,
    pub create_time: i64,
    pub fee: u8,
    pub delegate_address: Hash160,
    pub staker_address: Hash160,
    pub staker_name: String,
    /// -1 until the delegation transaction confirms.
    pub block_number: i64,
    pub create_tx_hash: Hash256,
    pub remove_tx_hash: Hash256,
}

impl DelegationRecord {
    pub fn new(delegate_address: Hash160, staker_address: Hash160, staker_name: &str, fee: u8) -> Self {
        Self {
            version: RECORD_VERSION,
            create_time: 0,
            fee,
            delegate_address,
            staker_address,
            staker_name: staker_name.to_string(),
            block_number: -1,
            create_tx_hash: NULL_HASH,
            remove_tx_hash: NULL_HASH,
        }
    }

    fn encode_identity(&self, encoder: &mut Encoder) {
        encoder.write_hash160(&self.delegate_address);
        encoder.write_hash160(&self.staker_address);
        encoder.write_var_str(&self.staker_name);
    }

    pub fn id(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        self.encode_identity(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    pub fn is_confirmed(&self) -> bool {
        self.block_number >= 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.version);
        encoder.write_i64_le(self.create_time);
        encoder.write_u8(self.fee);
        encoder.write_i64_le(self.block_number);
        encoder.write_hash_le(&self.create_tx_hash);
        encoder.write_hash_le(&self.remove_tx_hash);
        self.encode_identity(&mut encoder);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let record = Self {
            version: decoder.read_i32_le()?,
            create_time: decoder.read_i64_le()?,
            fee: decoder.read_u8()?,
            block_number: decoder.read_i64_le()?,
            create_tx_hash: decoder.read_hash_le()?,
            remove_tx_hash: decoder.read_hash_le()?,
            delegate_address: decoder.read_hash160()?,
            staker_address: decoder.read_hash160()?,
            staker_name: decoder.read_var_str()?,
        };
        finish(&decoder)?;
        Ok(record)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DelegateAddressType {
    #[default]
    AcceptAll,
    AllowList,
    ExcludeList,
}

impl DelegateAddressType {
    fn as_i32(self) -> i32 {
        match self {
            DelegateAddressType::AcceptAll => 0,
            DelegateAddressType::AllowList => 1,
            DelegateAddressType::ExcludeList => 2,
        }
    }

    fn from_i32(value: i32) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(DelegateAddressType::AcceptAll),
            1 => Ok(DelegateAddressType::AllowList),
            2 => Ok(DelegateAddressType::ExcludeList),
            _ => Err(DecodeError::InvalidData("unknown delegate address type")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DelegateAddressType::AcceptAll => "accept-all",
            DelegateAddressType::AllowList => "allow-list",
            DelegateAddressType::ExcludeList => "exclude-list",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accept-all" => Some(DelegateAddressType::AcceptAll),
            "allow-list" => Some(DelegateAddressType::AllowList),
            "exclude-list" => Some(DelegateAddressType::ExcludeList),
            _ => None,
        }
    }
}

/// Local policy for one of this wallet's staker addresses when staking delegated coins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuperStakerRecord {
    pub version: i32,
    pub create_time: i64,
    pub staker_address: Hash160,
    pub staker_name: String,
    /// When false the wallet-wide `stakingminfee`/`stakingminutxovalue` apply.
    pub custom_config: bool,
    pub min_fee: u8,
    pub min_delegate_utxo: Amount,
    pub delegate_address_list: Vec<Hash160>,
    pub delegate_address_type: DelegateAddressType,
}

impl SuperStakerRecord {
    pub fn new(staker_address: Hash160, staker_name: &str) -> Self {
        Self {
            version: RECORD_VERSION,
            create_time: 0,
            staker_address,
            staker_name: staker_name.to_string(),
            custom_config: false,
            min_fee: 0,
            min_delegate_utxo: 0,
            delegate_address_list: Vec::new(),
            delegate_address_type: DelegateAddressType::AcceptAll,
        }
    }

    fn encode_identity(&self, encoder: &mut Encoder) {
        encoder.write_hash160(&self.staker_address);
        encoder.write_var_str(&self.staker_name);
    }

    pub fn id(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        self.encode_identity(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    pub fn effective_min_fee(&self, config: &WalletConfig) -> u8 {
        if self.custom_config {
            self.min_fee
        } else {
            config.staking_min_fee
        }
    }

    pub fn effective_min_utxo(&self, config: &WalletConfig) -> Amount {
        if self.custom_config {
            self.min_delegate_utxo
        } else {
            config.staking_min_utxo_value
        }
    }

    pub fn accepts_delegator(&self, delegator: &Hash160) -> bool {
        if !self.custom_config {
            return true;
        }
        let listed = self.delegate_address_list.contains(delegator);
        match self.delegate_address_type {
            DelegateAddressType::AcceptAll => true,
            DelegateAddressType::AllowList => listed,
            DelegateAddressType::ExcludeList => !listed,
        }
    }

    /// Whether a delegated coin of `value` granting `fee` percent may be staked under this record.
    pub fn accepts(&self, delegator: &Hash160, fee: u8, value: Amount, config: &WalletConfig) -> bool {
        fee >= self.effective_min_fee(config)
            && value >= self.effective_min_utxo(config)
            && self.accepts_delegator(delegator)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.version);
        encoder.write_i64_le(self.create_time);
        encoder.write_u8(self.min_fee);
        encoder.write_bool(self.custom_config);
        encoder.write_i64_le(self.min_delegate_utxo);
        encoder.write_varint(self.delegate_address_list.len() as u64);
        for address in &self.delegate_address_list {
            encoder.write_hash160(address);
        }
        encoder.write_i32_le(self.delegate_address_type.as_i32());
        self.encode_identity(&mut encoder);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_i32_le()?;
        let create_time = decoder.read_i64_le()?;
        let min_fee = decoder.read_u8()?;
        let custom_config = decoder.read_bool()?;
        let min_delegate_utxo = decoder.read_i64_le()?;
        let count = decoder.read_len()?;
        let mut delegate_address_list = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            delegate_address_list.push(decoder.read_hash160()?);
        }
        let delegate_address_type = DelegateAddressType::from_i32(decoder.read_i32_le()?)?;
        let staker_address = decoder.read_hash160()?;
        let staker_name = decoder.read_var_str()?;
        finish(&decoder)?;
        Ok(Self {
            version,
            create_time,
            staker_address,
            staker_name,
            custom_config,
            min_fee,
            min_delegate_utxo,
            delegate_address_list,
            delegate_address_type,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenInfo {
    pub version: i32,
    pub contract_address: String,
    pub token_name: String,
    pub symbol: String,
    pub decimals: u8,
    pub sender_address: String,
    pub create_time: i64,
    pub block_hash: Hash256,
    pub block_number: i64,
}

impl TokenInfo {
    fn encode_identity(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.decimals);
        encoder.write_var_str(&self.contract_address);
        encoder.write_var_str(&self.sender_address);
    }

    pub fn id(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        self.encode_identity(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.version);
        encoder.write_i64_le(self.create_time);
        encoder.write_var_str(&self.token_name);
        encoder.write_var_str(&self.symbol);
        encoder.write_hash_le(&self.block_hash);
        encoder.write_i64_le(self.block_number);
        self.encode_identity(&mut encoder);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_i32_le()?;
        let create_time = decoder.read_i64_le()?;
        let token_name = decoder.read_var_str()?;
        let symbol = decoder.read_var_str()?;
        let block_hash = decoder.read_hash_le()?;
        let block_number = decoder.read_i64_le()?;
        let decimals = decoder.read_u8()?;
        let contract_address = decoder.read_var_str()?;
        let sender_address = decoder.read_var_str()?;
        finish(&decoder)?;
        Ok(Self {
            version,
            contract_address,
            token_name,
            symbol,
            decimals,
            sender_address,
            create_time,
            block_hash,
            block_number,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenTx {
    pub version: i32,
    pub contract_address: String,
    pub sender_address: String,
    pub receiver_address: String,
    pub value: U256,
    pub tx_hash: Hash256,
    pub create_time: i64,
    pub block_hash: Hash256,
    pub block_number: i64,
    pub label: String,
}

impl TokenTx {
    fn encode_identity(&self, encoder: &mut Encoder) {
        encoder.write_var_str(&self.contract_address);
        encoder.write_var_str(&self.sender_address);
        encoder.write_var_str(&self.receiver_address);
        write_u256(encoder, &self.value);
        encoder.write_hash_le(&self.tx_hash);
    }

    pub fn id(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        self.encode_identity(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.version);
        encoder.write_i64_le(self.create_time);
        encoder.write_hash_le(&self.block_hash);
        encoder.write_i64_le(self.block_number);
        encoder.write_var_str(&self.label);
        self.encode_identity(&mut encoder);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_i32_le()?;
        let create_time = decoder.read_i64_le()?;
        let block_hash = decoder.read_hash_le()?;
        let block_number = decoder.read_i64_le()?;
        let label = decoder.read_var_str()?;
        let contract_address = decoder.read_var_str()?;
        let sender_address = decoder.read_var_str()?;
        let receiver_address = decoder.read_var_str()?;
        let value = read_u256(&mut decoder)?;
        let tx_hash = decoder.read_hash_le()?;
        finish(&decoder)?;
        Ok(Self {
            version,
            contract_address,
            sender_address,
            receiver_address,
            value,
            tx_hash,
            create_time,
            block_hash,
            block_number,
            label,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegation_id_ignores_bookkeeping_fields() {
        let mut record = DelegationRecord::new([1u8; 20], [2u8; 20], "pool", 10);
        let id = record.id();
        record.block_number = 40;
        record.fee = 25;
        record.create_tx_hash = [3u8; 32];
        assert_eq!(record.id(), id);
        assert!(record.is_confirmed());

        let decoded = DelegationRecord::decode(&record.encode()).expect("decode");
        assert_eq!(decoded, record);

        let other = DelegationRecord::new([1u8; 20], [9u8; 20], "pool", 10);
        assert_ne!(other.id(), id);
    }

    #[test]
    fn super_staker_policy_uses_wallet_defaults_without_custom_config() {
        let config = WalletConfig::default();
        let delegator = [4u8; 20];
        let mut record = SuperStakerRecord::new([5u8; 20], "staker");
        assert!(record.accepts(&delegator, config.staking_min_fee, config.staking_min_utxo_value, &config));
        assert!(!record.accepts(&delegator, config.staking_min_fee - 1, config.staking_min_utxo_value, &config));

        record.custom_config = true;
        record.min_fee = 0;
        record.min_delegate_utxo = 0;
        record.delegate_address_type = DelegateAddressType::AllowList;
        assert!(!record.accepts(&delegator, 0, 1, &config));
        record.delegate_address_list.push(delegator);
        assert!(record.accepts(&delegator, 0, 1, &config));
        record.delegate_address_type = DelegateAddressType::ExcludeList;
        assert!(!record.accepts(&delegator, 50, 1, &config));

        let decoded = SuperStakerRecord::decode(&record.encode()).expect("decode");
        assert_eq!(decoded, record);
        assert_eq!(decoded.id(), record.id());
    }

    #[test]
    fn token_tx_value_keeps_full_width() {
        let tx = TokenTx {
            version: RECORD_VERSION,
            contract_address: "c0ffee".to_string(),
            sender_address: "a".to_string(),
            receiver_address: "b".to_string(),
            value: U256::MAX - U256::from(7u64),
            tx_hash: [6u8; 32],
            create_time: 1,
            block_hash: NULL_HASH,
            block_number: -1,
            label: "airdrop".to_string(),
        };
        let decoded = TokenTx::decode(&tx.encode()).expect("decode");
        assert_eq!(decoded, tx);

        let token = TokenInfo {
            version: RECORD_VERSION,
            contract_address: "c0ffee".to_string(),
            token_name: "Example".to_string(),
            symbol: "EXM".to_string(),
            decimals: 8,
            sender_address: "a".to_string(),
            create_time: 2,
            block_hash: [1u8; 32],
            block_number: 12,
        };
        assert_eq!(TokenInfo::decode(&token.encode()).expect("decode"), token);
    }
}
