//! The wallet's record of one transaction: confirmation state, annotations and cached amounts.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;

use yupost_consensus::money::Amount;
use yupost_consensus::Hash256;
use yupost_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use yupost_primitives::Transaction;

use crate::signing::IsMine;

/// Block hash written for abandoned transactions.
pub const ABANDON_HASH: Hash256 = {
    let mut hash = [0u8; 32];
    hash[0] = 1;
    hash
};

const NULL_HASH: Hash256 = [0u8; 32];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxStatus {
    Unconfirmed,
    Confirmed,
    Conflicted,
    Abandoned,
}

/// Confirmed entries point at their block; conflicted ones at the block holding the conflict.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Confirmation {
    pub status: TxStatus,
    pub block_height: i32,
    pub block_hash: Hash256,
    pub index: i32,
}

impl Confirmation {
    pub fn unconfirmed() -> Self {
        Self {
            status: TxStatus::Unconfirmed,
            block_height: 0,
            block_hash: NULL_HASH,
            index: 0,
        }
    }

    pub fn confirmed(block_height: i32, block_hash: Hash256, index: i32) -> Self {
        Self {
            status: TxStatus::Confirmed,
            block_height,
            block_hash,
            index,
        }
    }

    pub fn conflicted(block_height: i32, block_hash: Hash256) -> Self {
        Self {
            status: TxStatus::Conflicted,
            block_height,
            block_hash,
            index: 0,
        }
    }

    pub fn abandoned() -> Self {
        Self {
            status: TxStatus::Abandoned,
            block_height: 0,
            block_hash: NULL_HASH,
            index: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CachedAmount {
    Debit = 0,
    Credit = 1,
    ImmatureCredit = 2,
    AvailableCredit = 3,
}

/// Lazily filled amounts, one slot per kind and ownership class, cleared by `mark_dirty`.
#[derive(Clone, Debug, Default)]
pub struct AmountCache {
    slots: [Cell<Option<Amount>>; 8],
}

impl AmountCache {
    fn slot(kind: CachedAmount, filter: IsMine) -> usize {
        kind as usize * 2 + usize::from(filter == IsMine::WatchOnly)
    }

    pub fn get_or_compute(
        &self,
        kind: CachedAmount,
        filter: IsMine,
        compute: impl FnOnce() -> Amount,
    ) -> Amount {
        let slot = &self.slots[Self::slot(kind, filter)];
        if let Some(amount) = slot.get() {
            return amount;
        }
        let amount = compute();
        slot.set(Some(amount));
        amount
    }

    pub fn is_cached(&self, kind: CachedAmount, filter: IsMine) -> bool {
        self.slots[Self::slot(kind, filter)].get().is_some()
    }

    pub fn mark_dirty(&self) {
        for slot in &self.slots {
            slot.set(None);
        }
    }
}

#[derive(Clone, Debug)]
pub struct WalletTx {
    pub tx: Arc<Transaction>,
    pub txid: Hash256,
    pub confirmation: Confirmation,
    pub from_me: bool,
    pub time_received: u32,
    pub time_received_is_tx_time: bool,
    pub time_smart: u32,
    pub order_pos: i64,
    pub map_value: BTreeMap<String, String>,
    pub order_form: Vec<(String, String)>,
    /// Whether the node last reported this transaction in its mempool. Not persisted.
    pub in_mempool: bool,
    pub cache: AmountCache,
}

impl WalletTx {
    pub fn new(tx: Arc<Transaction>, time_received: u32) -> Self {
        let txid = tx.txid();
        Self {
            tx,
            txid,
            confirmation: Confirmation::unconfirmed(),
            from_me: false,
            time_received,
            time_received_is_tx_time: false,
            time_smart: time_received,
            order_pos: -1,
            map_value: BTreeMap::new(),
            order_form: Vec::new(),
            in_mempool: false,
            cache: AmountCache::default(),
        }
    }

    pub fn status(&self) -> TxStatus {
        self.confirmation.status
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmation.status == TxStatus::Confirmed
    }

    pub fn is_conflicted(&self) -> bool {
        self.confirmation.status == TxStatus::Conflicted
    }

    pub fn is_abandoned(&self) -> bool {
        self.confirmation.status == TxStatus::Abandoned
    }

    pub fn is_unconfirmed(&self) -> bool {
        self.confirmation.status == TxStatus::Unconfirmed
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx.is_coinbase()
    }

    pub fn is_coinstake(&self) -> bool {
        self.tx.is_coinstake()
    }

    pub fn mark_dirty(&self) {
        self.cache.mark_dirty();
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.tx.consensus_encode(&mut encoder);
        let (block_hash, index) = match self.confirmation.status {
            TxStatus::Confirmed => (self.confirmation.block_hash, self.confirmation.index),
            TxStatus::Conflicted => (self.confirmation.block_hash, -1),
            TxStatus::Abandoned => (ABANDON_HASH, -1),
            TxStatus::Unconfirmed => (NULL_HASH, 0),
        };
        encoder.write_hash_le(&block_hash);
        encoder.write_varint(0);
        encoder.write_i32_le(index);
        encoder.write_varint(0);

        let mut map_value = self.map_value.clone();
        map_value.insert("n".to_string(), self.order_pos.to_string());
        if self.time_smart != 0 {
            map_value.insert("timesmart".to_string(), self.time_smart.to_string());
        }
        encoder.write_string_map(&map_value);
        encoder.write_string_pairs(&self.order_form);
        encoder.write_u32_le(u32::from(self.time_received_is_tx_time));
        encoder.write_u32_le(self.time_received);
        encoder.write_bool(self.from_me);
        encoder.write_bool(false);
        encoder.into_inner()
    }

    /// Decodes a persisted record. Block heights are not stored; confirmed and
    /// conflicted entries come back with height -1 until resolved against the chain.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tx = Transaction::consensus_decode(&mut decoder)?;
        let block_hash = decoder.read_hash_le()?;
        let branch_len = decoder.read_len()?;
        for _ in 0..branch_len {
            decoder.read_hash_le()?;
        }
        let index = decoder.read_i32_le()?;
        let prev_count = decoder.read_len()?;
        if prev_count != 0 {
            return Err(DecodeError::InvalidData("unexpected embedded previous transactions"));
        }
        let mut map_value = decoder.read_string_map()?;
        let order_form = decoder.read_string_pairs()?;
        let time_received_is_tx_time = decoder.read_u32_le()? != 0;
        let time_received = decoder.read_u32_le()?;
        let from_me = decoder.read_bool()?;
        let _spent = decoder.read_bool()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }

        let order_pos = match map_value.remove("n") {
            Some(value) => value
                .parse::<i64>()
                .map_err(|_| DecodeError::InvalidData("invalid order position"))?,
            None => -1,
        };
        let time_smart = match map_value.remove("timesmart") {
            Some(value) => value
                .parse::<u32>()
                .map_err(|_| DecodeError::InvalidData("invalid smart time"))?,
            None => 0,
        };

        let confirmation = if index == -1 && block_hash == ABANDON_HASH {
            Confirmation::abandoned()
        } else if index == -1 {
            Confirmation::conflicted(-1, block_hash)
        } else if block_hash != NULL_HASH {
            Confirmation::confirmed(-1, block_hash, index)
        } else {
            Confirmation::unconfirmed()
        };

        let tx = Arc::new(tx);
        let txid = tx.txid();
        Ok(Self {
            tx,
            txid,
            confirmation,
            from_me,
            time_received,
            time_received_is_tx_time,
            time_smart,
            order_pos,
            map_value,
            order_form,
            in_mempool: false,
            cache: AmountCache::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yupost_primitives::{OutPoint, TxIn, TxOut};

    fn sample() -> WalletTx {
        let mut tx = Transaction::new(2);
        tx.vin.push(TxIn::new(OutPoint::new([2u8; 32], 1), u32::MAX));
        tx.vout.push(TxOut::new(50, vec![0x51]));
        let mut wtx = WalletTx::new(Arc::new(tx), 1_700_000_000);
        wtx.order_pos = 7;
        wtx.from_me = true;
        wtx.map_value
            .insert("comment".to_string(), "rent".to_string());
        wtx.order_form
            .push(("Message".to_string(), "hi".to_string()));
        wtx
    }

    #[test]
    fn persisted_layout_encodes_status() {
        let mut wtx = sample();
        for (confirmation, expected) in [
            (Confirmation::unconfirmed(), Confirmation::unconfirmed()),
            (
                Confirmation::confirmed(12, [9u8; 32], 3),
                Confirmation::confirmed(-1, [9u8; 32], 3),
            ),
            (
                Confirmation::conflicted(12, [8u8; 32]),
                Confirmation::conflicted(-1, [8u8; 32]),
            ),
            (Confirmation::abandoned(), Confirmation::abandoned()),
        ] {
            wtx.confirmation = confirmation;
            let decoded = WalletTx::decode(&wtx.encode()).expect("decode");
            assert_eq!(decoded.confirmation, expected);
            assert_eq!(decoded.order_pos, 7);
            assert!(decoded.from_me);
            assert_eq!(decoded.map_value.get("comment").map(String::as_str), Some("rent"));
            assert!(!decoded.map_value.contains_key("n"));
            assert_eq!(decoded.order_form, wtx.order_form);
            assert_eq!(decoded.txid, wtx.txid);
        }
    }

    #[test]
    fn abandoned_and_conflicted_write_negative_index() {
        let mut wtx = sample();
        wtx.confirmation = Confirmation::abandoned();
        let bytes = wtx.encode();
        let tx_len = wtx.tx.serialized_size();
        assert_eq!(&bytes[tx_len..tx_len + 32], &ABANDON_HASH);
        assert_eq!(&bytes[tx_len + 33..tx_len + 37], &(-1i32).to_le_bytes());
    }

    #[test]
    fn cache_recomputes_after_dirty() {
        let cache = AmountCache::default();
        let mut calls = 0;
        let mut compute = || {
            calls += 1;
            5
        };
        assert_eq!(cache.get_or_compute(CachedAmount::Credit, IsMine::Spendable, &mut compute), 5);
        assert_eq!(cache.get_or_compute(CachedAmount::Credit, IsMine::Spendable, &mut compute), 5);
        assert!(cache.is_cached(CachedAmount::Credit, IsMine::Spendable));
        assert!(!cache.is_cached(CachedAmount::Credit, IsMine::WatchOnly));
        cache.mark_dirty();
        assert_eq!(cache.get_or_compute(CachedAmount::Credit, IsMine::Spendable, &mut compute), 5);
        assert_eq!(calls, 2);
    }
}
