//! Delegation announcements carried in null-data outputs.
//!
//! A delegator publishes `Add` to hand staking rights over its coins to a
//! staker in exchange for a fee percentage, and `Remove` to revoke them.

use yupost_consensus::constants::MAX_DELEGATION_FEE;
use yupost_consensus::Hash160;
use yupost_primitives::encoding::{DecodeError, Decoder, Encoder};

use crate::standard::{classify_script_pubkey, null_data_script, parse_pushes, ScriptType};

pub const DELEGATION_MAGIC: [u8; 4] = *b"YDLG";
pub const DELEGATION_VERSION: u8 = 1;

const OP_ADD: u8 = 1;
const OP_REMOVE: u8 = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DelegationPayload {
    Add {
        staker: Hash160,
        fee: u8,
        proof_of_delegation: Vec<u8>,
    },
    Remove {
        staker: Hash160,
    },
}

impl DelegationPayload {
    pub fn staker(&self) -> &Hash160 {
        match self {
            DelegationPayload::Add { staker, .. } | DelegationPayload::Remove { staker } => staker,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_bytes(&DELEGATION_MAGIC);
        encoder.write_u8(DELEGATION_VERSION);
        match self {
            DelegationPayload::Add {
                staker,
                fee,
                proof_of_delegation,
            } => {
                encoder.write_u8(OP_ADD);
                encoder.write_hash160(staker);
                encoder.write_u8(*fee);
                encoder.write_var_bytes(proof_of_delegation);
            }
            DelegationPayload::Remove { staker } => {
                encoder.write_u8(OP_REMOVE);
                encoder.write_hash160(staker);
            }
        }
        encoder.into_inner()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        if decoder.read_fixed::<4>()? != DELEGATION_MAGIC {
            return Err(DecodeError::InvalidData("not a delegation payload"));
        }
        if decoder.read_u8()? != DELEGATION_VERSION {
            return Err(DecodeError::InvalidData("unsupported delegation version"));
        }
        let payload = match decoder.read_u8()? {
            OP_ADD => {
                let staker = decoder.read_hash160()?;
                let fee = decoder.read_u8()?;
                if fee > MAX_DELEGATION_FEE {
                    return Err(DecodeError::InvalidData("delegation fee above 100"));
                }
                let proof_of_delegation = decoder.read_var_bytes()?;
                DelegationPayload::Add {
                    staker,
                    fee,
                    proof_of_delegation,
                }
            }
            OP_REMOVE => DelegationPayload::Remove {
                staker: decoder.read_hash160()?,
            },
            _ => return Err(DecodeError::InvalidData("unknown delegation op")),
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(payload)
    }

    pub fn script_pubkey(&self) -> Vec<u8> {
        null_data_script(&self.to_bytes())
    }

    /// Parses a null-data output script; `None` for anything that is not a delegation.
    pub fn from_script_pubkey(script: &[u8]) -> Option<Self> {
        if classify_script_pubkey(script) != ScriptType::NullData {
            return None;
        }
        let pushes = parse_pushes(&script[1..])?;
        match pushes.as_slice() {
            [payload] => Self::from_bytes(payload).ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_payload_survives_script_wrapping() {
        let payload = DelegationPayload::Add {
            staker: [4u8; 20],
            fee: 10,
            proof_of_delegation: vec![0x1f; 65],
        };
        let script = payload.script_pubkey();
        assert_eq!(DelegationPayload::from_script_pubkey(&script), Some(payload));
    }

    #[test]
    fn rejects_fee_over_limit_and_foreign_data() {
        let mut bytes = DelegationPayload::Add {
            staker: [1u8; 20],
            fee: 100,
            proof_of_delegation: Vec::new(),
        }
        .to_bytes();
        bytes[26] = 101;
        assert!(DelegationPayload::from_bytes(&bytes).is_err());

        let other = null_data_script(b"hello world");
        assert_eq!(DelegationPayload::from_script_pubkey(&other), None);
        assert_eq!(DelegationPayload::from_script_pubkey(&[0x51]), None);
    }
}
