//! Transaction types and serialization.

use yupost_consensus::constants::MAX_BIP125_RBF_SEQUENCE;
use yupost_consensus::money::{money_range, Amount};
use yupost_consensus::Hash256;

use crate::encoding::{
    read_vec, write_vec, Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint, sequence: u32) -> Self {
        Self {
            prevout,
            script_sig: Vec::new(),
            sequence,
        }
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    /// The zero-value, empty-script marker used as the first coinstake output.
    pub fn empty() -> Self {
        Self {
            value: 0,
            script_pubkey: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }

    /// Serialized size of this output in bytes.
    pub fn serialized_size(&self) -> usize {
        8 + varint_size(self.script_pubkey.len() as u64) + self.script_pubkey.len()
    }
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(version: i32) -> Self {
        Self {
            version,
            vin: Vec::new(),
            vout: Vec::new(),
            lock_time: 0,
        }
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.to_bytes())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        crate::encoding::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::encoding::decode(bytes)
    }

    pub fn serialized_size(&self) -> usize {
        self.to_bytes().len()
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    /// A coinstake spends at least one real input and marks its first output empty.
    pub fn is_coinstake(&self) -> bool {
        !self.vin.is_empty()
            && !self.vin[0].prevout.is_null()
            && self.vout.len() >= 2
            && self.vout[0].is_empty()
    }

    /// True when any input opts in to replacement by a higher-fee transaction.
    pub fn signals_rbf(&self) -> bool {
        self.vin
            .iter()
            .any(|input| input.sequence <= MAX_BIP125_RBF_SEQUENCE)
    }

    /// Sum of output values, or `None` if any value or the running sum leaves the money range.
    pub fn value_out(&self) -> Option<Amount> {
        let mut total: Amount = 0;
        for output in &self.vout {
            if !money_range(output.value) {
                return None;
            }
            total = total.checked_add(output.value)?;
            if !money_range(total) {
                return None;
            }
        }
        Some(total)
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        write_vec(encoder, &self.vin);
        write_vec(encoder, &self.vout);
        encoder.write_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let vin = read_vec(decoder)?;
        let vout = read_vec(decoder)?;
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}

pub fn varint_size(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yupost_consensus::constants::SEQUENCE_FINAL;

    fn spend(prev: u8, vout: usize) -> Transaction {
        let mut tx = Transaction::new(2);
        tx.vin
            .push(TxIn::new(OutPoint::new([prev; 32], 0), SEQUENCE_FINAL));
        for idx in 0..vout {
            tx.vout.push(TxOut::new(1_000 * (idx as i64 + 1), vec![0x51]));
        }
        tx
    }

    #[test]
    fn encode_decode_preserves_txid() {
        let tx = spend(7, 2);
        let bytes = tx.to_bytes();
        let decoded = Transaction::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.txid(), tx.txid());
        assert_eq!(tx.serialized_size(), bytes.len());
    }

    #[test]
    fn classifies_coinbase_and_coinstake() {
        let mut coinbase = Transaction::new(2);
        coinbase.vin.push(TxIn::new(OutPoint::null(), SEQUENCE_FINAL));
        coinbase.vout.push(TxOut::new(50, vec![0x51]));
        assert!(coinbase.is_coinbase());
        assert!(!coinbase.is_coinstake());

        let mut coinstake = spend(1, 0);
        coinstake.vout.push(TxOut::empty());
        coinstake.vout.push(TxOut::new(10, vec![0x51]));
        assert!(coinstake.is_coinstake());
        assert!(!coinstake.is_coinbase());
    }

    #[test]
    fn rbf_signalling_follows_sequence() {
        let mut tx = spend(3, 1);
        assert!(!tx.signals_rbf());
        tx.vin[0].sequence = MAX_BIP125_RBF_SEQUENCE;
        assert!(tx.signals_rbf());
    }

    #[test]
    fn value_out_rejects_negative_outputs() {
        let mut tx = spend(4, 2);
        assert_eq!(tx.value_out(), Some(3_000));
        tx.vout[0].value = -1;
        assert_eq!(tx.value_out(), None);
    }
}
