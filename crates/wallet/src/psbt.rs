//! Partially signed transactions for flows where some inputs are signed elsewhere.

use yupost_consensus::money::{money_range, Amount};
use yupost_primitives::encoding::{
    read_vec, write_vec, Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use yupost_primitives::{Transaction, TxOut};

use crate::coin_control::CoinControl;
use crate::error::WalletError;
use crate::signing::SigningError;
use crate::spend::Recipient;
use crate::wallet::WalletGuard;

const PSBT_MAGIC: [u8; 5] = *b"psbt\xff";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PsbtInput {
    /// The output being spent, once known.
    pub utxo: Option<TxOut>,
    pub script_sig: Option<Vec<u8>>,
}

impl Encodable for PsbtInput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        match &self.utxo {
            Some(utxo) => {
                encoder.write_bool(true);
                utxo.consensus_encode(encoder);
            }
            None => encoder.write_bool(false),
        }
        match &self.script_sig {
            Some(script_sig) => {
                encoder.write_bool(true);
                encoder.write_var_bytes(script_sig);
            }
            None => encoder.write_bool(false),
        }
    }
}

impl Decodable for PsbtInput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let utxo = if decoder.read_bool()? {
            Some(TxOut::consensus_decode(decoder)?)
        } else {
            None
        };
        let script_sig = if decoder.read_bool()? {
            Some(decoder.read_var_bytes()?)
        } else {
            None
        };
        Ok(Self { utxo, script_sig })
    }
}

/// An unsigned transaction plus, per input, the spent output and any signature collected
/// so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartiallySignedTransaction {
    pub tx: Transaction,
    pub inputs: Vec<PsbtInput>,
}

impl PartiallySignedTransaction {
    /// Wraps `tx`, moving any existing scriptSigs into the per-input slots.
    pub fn new(mut tx: Transaction) -> Self {
        let inputs = tx
            .vin
            .iter_mut()
            .map(|input| PsbtInput {
                utxo: None,
                script_sig: (!input.script_sig.is_empty())
                    .then(|| std::mem::take(&mut input.script_sig)),
            })
            .collect();
        Self { tx, inputs }
    }

    pub fn is_complete(&self) -> bool {
        self.inputs.iter().all(|input| input.script_sig.is_some())
    }

    /// Input value minus output value, when every spent output is known.
    pub fn fee(&self) -> Option<Amount> {
        let mut value_in: Amount = 0;
        for input in &self.inputs {
            value_in = value_in.checked_add(input.utxo.as_ref()?.value)?;
            if !money_range(value_in) {
                return None;
            }
        }
        Some(value_in - self.tx.value_out()?)
    }

    /// Merges signatures and spent outputs from another copy of the same transaction.
    pub fn combine(&mut self, other: &PartiallySignedTransaction) -> Result<(), WalletError> {
        if self.tx.txid() != other.tx.txid() || self.inputs.len() != other.inputs.len() {
            return Err(WalletError::InvalidData("partially signed transactions differ"));
        }
        for (input, theirs) in self.inputs.iter_mut().zip(&other.inputs) {
            if input.utxo.is_none() {
                input.utxo = theirs.utxo.clone();
            }
            if input.script_sig.is_none() {
                input.script_sig = theirs.script_sig.clone();
            }
        }
        Ok(())
    }

    /// The network transaction, available once every input carries a signature.
    pub fn extract(&self) -> Result<Transaction, WalletError> {
        if !self.is_complete() {
            return Err(WalletError::Signing(SigningError::MissingKey));
        }
        let mut tx = self.tx.clone();
        for (input, slot) in tx.vin.iter_mut().zip(&self.inputs) {
            input.script_sig = slot.script_sig.clone().unwrap_or_default();
        }
        Ok(tx)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_bytes(&PSBT_MAGIC);
        self.tx.consensus_encode(&mut encoder);
        write_vec(&mut encoder, &self.inputs);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        if decoder.read_fixed::<5>()? != PSBT_MAGIC {
            return Err(DecodeError::InvalidData("bad psbt magic"));
        }
        let tx = Transaction::consensus_decode(&mut decoder)?;
        let inputs: Vec<PsbtInput> = read_vec(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        if inputs.len() != tx.vin.len() {
            return Err(DecodeError::InvalidData("psbt input count mismatch"));
        }
        if tx.vin.iter().any(|input| !input.script_sig.is_empty()) {
            return Err(DecodeError::InvalidData("psbt transaction is signed"));
        }
        Ok(Self { tx, inputs })
    }
}

impl WalletGuard<'_> {
    /// Funds `recipients` without signing, for completion by an external signer.
    pub fn create_psbt(
        &self,
        recipients: &[Recipient],
        coin_control: &CoinControl,
    ) -> Result<PartiallySignedTransaction, WalletError> {
        let created = self.create_transaction(recipients, coin_control, false)?;
        let mut psbt = PartiallySignedTransaction::new(created.tx);
        self.fill_psbt(&mut psbt, false)?;
        Ok(psbt)
    }

    /// Adds spent outputs the ledger knows and, with `sign`, signatures for inputs we hold
    /// keys for. Returns whether every input is now signed.
    pub fn fill_psbt(
        &self,
        psbt: &mut PartiallySignedTransaction,
        sign: bool,
    ) -> Result<bool, WalletError> {
        for (input, slot) in psbt.tx.vin.iter().zip(psbt.inputs.iter_mut()) {
            if slot.utxo.is_none() {
                slot.utxo = self
                    .ledger
                    .get(&input.prevout.hash)
                    .and_then(|wtx| wtx.tx.vout.get(input.prevout.index as usize))
                    .cloned();
            }
        }
        if sign {
            let signer = self.wallet().signer();
            for index in 0..psbt.inputs.len() {
                if psbt.inputs[index].script_sig.is_some() {
                    continue;
                }
                let Some(utxo) = psbt.inputs[index].utxo.clone() else {
                    continue;
                };
                if !signer.can_sign(&utxo.script_pubkey) {
                    continue;
                }
                psbt.inputs[index].script_sig =
                    signer.sign_input(&psbt.tx, index, &utxo.script_pubkey, utxo.value)?;
            }
        }
        Ok(psbt.is_complete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yupost_primitives::address::p2pkh_script;
    use yupost_primitives::{OutPoint, TxIn};

    fn unsigned() -> Transaction {
        let mut tx = Transaction::new(2);
        tx.vin.push(TxIn::new(OutPoint::new([1u8; 32], 0), 0xffff_fffe));
        tx.vin.push(TxIn::new(OutPoint::new([2u8; 32], 1), 0xffff_fffe));
        tx.vout.push(TxOut::new(9_000, p2pkh_script(&[3u8; 20])));
        tx
    }

    #[test]
    fn extract_requires_every_signature() {
        let mut psbt = PartiallySignedTransaction::new(unsigned());
        assert!(!psbt.is_complete());
        assert!(psbt.extract().is_err());
        psbt.inputs[0].script_sig = Some(vec![0x51]);
        psbt.inputs[1].script_sig = Some(vec![0x52]);
        let tx = psbt.extract().expect("complete");
        assert_eq!(tx.vin[0].script_sig, vec![0x51]);
        assert_eq!(tx.vin[1].script_sig, vec![0x52]);
        assert_eq!(psbt.tx.txid(), unsigned().txid());
    }

    #[test]
    fn new_moves_existing_signatures_aside() {
        let mut tx = unsigned();
        tx.vin[1].script_sig = vec![0xaa];
        let psbt = PartiallySignedTransaction::new(tx);
        assert!(psbt.tx.vin.iter().all(|input| input.script_sig.is_empty()));
        assert_eq!(psbt.inputs[0].script_sig, None);
        assert_eq!(psbt.inputs[1].script_sig, Some(vec![0xaa]));
    }

    #[test]
    fn combine_and_fee() {
        let mut ours = PartiallySignedTransaction::new(unsigned());
        let mut theirs = ours.clone();
        ours.inputs[0].utxo = Some(TxOut::new(6_000, p2pkh_script(&[4u8; 20])));
        theirs.inputs[1].utxo = Some(TxOut::new(4_000, p2pkh_script(&[5u8; 20])));
        theirs.inputs[1].script_sig = Some(vec![0x01]);
        assert_eq!(ours.fee(), None);
        ours.combine(&theirs).expect("same transaction");
        assert_eq!(ours.fee(), Some(1_000));
        assert_eq!(ours.inputs[1].script_sig, Some(vec![0x01]));

        let decoded = PartiallySignedTransaction::decode(&ours.encode()).expect("decode");
        assert_eq!(decoded, ours);
        assert!(PartiallySignedTransaction::decode(b"nope!").is_err());
    }
}
