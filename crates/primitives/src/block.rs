//! Proof-of-stake block header and block types.

use yupost_consensus::Hash256;

use crate::encoding::{
    read_vec, write_vec, Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;
use crate::transaction::Transaction;

pub const CURRENT_VERSION: i32 = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    /// Kernel outpoint for proof-of-stake blocks, null for proof-of-work.
    pub prevout_stake: OutPoint,
    /// Staker signature over the header hash; excluded from the hash itself.
    pub block_sig: Vec<u8>,
    /// Proof of delegation when the kernel coin belongs to a delegator.
    pub proof_of_delegation: Vec<u8>,
}

impl BlockHeader {
    pub fn is_proof_of_stake(&self) -> bool {
        !self.prevout_stake.is_null()
    }

    pub fn has_proof_of_delegation(&self) -> bool {
        self.is_proof_of_stake() && !self.proof_of_delegation.is_empty()
    }

    pub fn hash(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        self.encode_with_mode(&mut encoder, false);
        sha256d(&encoder.into_inner())
    }

    fn encode_with_mode(&self, encoder: &mut Encoder, include_signature: bool) {
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        self.prevout_stake.consensus_encode(encoder);
        if include_signature {
            encoder.write_var_bytes(&self.block_sig);
        }
        encoder.write_var_bytes(&self.proof_of_delegation);
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.encode_with_mode(encoder, true);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let prev_block = decoder.read_hash_le()?;
        let merkle_root = decoder.read_hash_le()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        let prevout_stake = OutPoint::consensus_decode(decoder)?;
        let block_sig = decoder.read_var_bytes()?;
        let proof_of_delegation = decoder.read_var_bytes()?;
        Ok(Self {
            version,
            prev_block,
            merkle_root,
            time,
            bits,
            nonce,
            prevout_stake,
            block_sig,
            proof_of_delegation,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.header.is_proof_of_stake()
            && self
                .transactions
                .get(1)
                .map(Transaction::is_coinstake)
                .unwrap_or(false)
    }

    /// Merkle root over transaction ids, duplicating the last node on odd levels.
    pub fn compute_merkle_root(&self) -> Hash256 {
        let mut level: Vec<Hash256> = self.transactions.iter().map(Transaction::txid).collect();
        if level.is_empty() {
            return [0u8; 32];
        }
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut data = [0u8; 64];
                data[..32].copy_from_slice(&left);
                data[32..].copy_from_slice(&right);
                next.push(sha256d(&data));
            }
            level = next;
        }
        level[0]
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.header.consensus_encode(encoder);
        write_vec(encoder, &self.transactions);
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = BlockHeader::consensus_decode(decoder)?;
        let transactions = read_vec(decoder)?;
        Ok(Self {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};
    use crate::transaction::{TxIn, TxOut};

    fn header() -> BlockHeader {
        BlockHeader {
            version: CURRENT_VERSION,
            prev_block: [1u8; 32],
            merkle_root: [0u8; 32],
            time: 1_700_000_000,
            bits: 0x207f_ffff,
            nonce: 0,
            prevout_stake: OutPoint::null(),
            block_sig: Vec::new(),
            proof_of_delegation: Vec::new(),
        }
    }

    #[test]
    fn signature_does_not_change_hash() {
        let mut signed = header();
        let unsigned_hash = signed.hash();
        signed.block_sig = vec![0x30, 0x44];
        assert_eq!(signed.hash(), unsigned_hash);
    }

    #[test]
    fn block_roundtrip_and_merkle_root() {
        let mut coinbase = Transaction::new(2);
        coinbase.vin.push(TxIn::new(OutPoint::null(), u32::MAX));
        coinbase.vout.push(TxOut::new(5, vec![0x51]));
        let mut block = Block {
            header: header(),
            transactions: vec![coinbase.clone()],
        };
        assert_eq!(block.compute_merkle_root(), coinbase.txid());
        block.header.merkle_root = block.compute_merkle_root();

        let decoded: Block = decode(&encode(&block)).expect("decode block");
        assert_eq!(decoded, block);
        assert!(!decoded.is_proof_of_stake());
    }
}
