//! Producing and checking signatures for standard single-key inputs.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SecretKey};
use yupost_primitives::hash::hash160;
use yupost_primitives::Transaction;

use crate::secp::{secp256k1_signing, secp256k1_verify};
use crate::sighash::{signature_hash, SighashError, SighashType};
use crate::standard::{classify_script_pubkey, p2pk_pubkey, parse_pushes, push_data, ScriptType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignError {
    Sighash(SighashError),
    UnsupportedScript,
    KeyMismatch,
    InvalidMessage,
}

impl std::fmt::Display for SignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignError::Sighash(err) => write!(f, "{err}"),
            SignError::UnsupportedScript => write!(f, "unsupported script type"),
            SignError::KeyMismatch => write!(f, "key does not match script"),
            SignError::InvalidMessage => write!(f, "invalid signature hash"),
        }
    }
}

impl std::error::Error for SignError {}

impl From<SighashError> for SignError {
    fn from(err: SighashError) -> Self {
        SignError::Sighash(err)
    }
}

fn signature_message(
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &[u8],
    sighash_type: SighashType,
) -> Result<Message, SignError> {
    let digest = signature_hash(tx, input_index, script_pubkey, sighash_type)?;
    Message::from_digest_slice(&digest).map_err(|_| SignError::InvalidMessage)
}

/// Builds the scriptSig for `input_index` spending `script_pubkey` with `secret`.
pub fn sign_input(
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &[u8],
    secret: &SecretKey,
    compressed: bool,
    sighash_type: SighashType,
) -> Result<Vec<u8>, SignError> {
    let secp = secp256k1_signing();
    let pubkey = PublicKey::from_secret_key(secp, secret);
    let pubkey_bytes = if compressed {
        pubkey.serialize().to_vec()
    } else {
        pubkey.serialize_uncompressed().to_vec()
    };

    let script_type = classify_script_pubkey(script_pubkey);
    match script_type {
        ScriptType::P2Pkh => {
            if script_pubkey[3..23] != hash160(&pubkey_bytes) {
                return Err(SignError::KeyMismatch);
            }
        }
        ScriptType::P2Pk => {
            if p2pk_pubkey(script_pubkey) != Some(pubkey_bytes.as_slice()) {
                return Err(SignError::KeyMismatch);
            }
        }
        _ => return Err(SignError::UnsupportedScript),
    }

    let msg = signature_message(tx, input_index, script_pubkey, sighash_type)?;
    let mut sig = secp.sign_ecdsa(&msg, secret).serialize_der().to_vec();
    sig.push(sighash_type.0 as u8);

    let mut script_sig = Vec::with_capacity(sig.len() + pubkey_bytes.len() + 2);
    push_data(&mut script_sig, &sig);
    if script_type == ScriptType::P2Pkh {
        push_data(&mut script_sig, &pubkey_bytes);
    }
    Ok(script_sig)
}

/// Checks the scriptSig of `input_index` against the output it spends.
pub fn verify_input(tx: &Transaction, input_index: usize, script_pubkey: &[u8]) -> bool {
    let Some(input) = tx.vin.get(input_index) else {
        return false;
    };
    let Some(pushes) = parse_pushes(&input.script_sig) else {
        return false;
    };
    let (sig_with_type, pubkey_bytes) = match (classify_script_pubkey(script_pubkey), pushes.as_slice()) {
        (ScriptType::P2Pkh, [sig, key]) if script_pubkey[3..23] == hash160(key) => (*sig, *key),
        (ScriptType::P2Pk, [sig]) => match p2pk_pubkey(script_pubkey) {
            Some(key) => (*sig, key),
            None => return false,
        },
        _ => return false,
    };
    let Some((&hash_type, der)) = sig_with_type.split_last() else {
        return false;
    };
    let Ok(pubkey) = PublicKey::from_slice(pubkey_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_der(der) else {
        return false;
    };
    let Ok(msg) = signature_message(tx, input_index, script_pubkey, SighashType(hash_type as u32))
    else {
        return false;
    };
    secp256k1_verify().verify_ecdsa(&msg, &sig, &pubkey).is_ok()
}
