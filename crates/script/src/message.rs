//! Compact recoverable message signatures and proofs of delegation.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey};
use yupost_consensus::constants::SIGNED_MESSAGE_MAGIC;
use yupost_consensus::{Hash160, Hash256};
use yupost_primitives::encoding::Encoder;
use yupost_primitives::hash::{hash160, sha256d};
use yupost_primitives::hex::bytes_to_hex;

use crate::secp::{secp256k1_signing, secp256k1_verify};

pub const COMPACT_SIGNATURE_SIZE: usize = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedMessageError {
    InvalidPubkey,
    InvalidSignature,
    InvalidRecoveryId,
    InvalidMessage,
    RecoverFailed,
    PubkeyMismatch,
}

impl std::fmt::Display for SignedMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignedMessageError::InvalidPubkey => write!(f, "invalid pubkey"),
            SignedMessageError::InvalidSignature => write!(f, "invalid signature"),
            SignedMessageError::InvalidRecoveryId => write!(f, "invalid recovery id"),
            SignedMessageError::InvalidMessage => write!(f, "invalid message"),
            SignedMessageError::RecoverFailed => write!(f, "failed to recover pubkey"),
            SignedMessageError::PubkeyMismatch => write!(f, "pubkey mismatch"),
        }
    }
}

impl std::error::Error for SignedMessageError {}

pub fn signed_message_hash(message: &[u8]) -> Hash256 {
    let mut encoder = Encoder::new();
    encoder.write_var_str(SIGNED_MESSAGE_MAGIC);
    encoder.write_var_bytes(message);
    sha256d(&encoder.into_inner())
}

/// Signs `message` with the wallet magic prefix, returning a 65-byte compact signature.
pub fn sign_message(
    secret: &SecretKey,
    message: &[u8],
    compressed: bool,
) -> Result<[u8; COMPACT_SIGNATURE_SIZE], SignedMessageError> {
    let digest = signed_message_hash(message);
    let msg =
        Message::from_digest_slice(&digest).map_err(|_| SignedMessageError::InvalidMessage)?;
    let sig = secp256k1_signing().sign_ecdsa_recoverable(&msg, secret);
    Ok(encode_compact_signature(&sig, compressed))
}

pub fn verify_signed_message(
    expected_pubkey: &[u8],
    signature: &[u8],
    message: &[u8],
) -> Result<(), SignedMessageError> {
    if expected_pubkey.is_empty() {
        return Err(SignedMessageError::InvalidPubkey);
    }
    let (recoverable, compressed) = decode_compact_signature(signature)?;
    let expected_compressed = expected_pubkey.len() == 33;
    if compressed != expected_compressed {
        return Err(SignedMessageError::PubkeyMismatch);
    }
    let digest = signed_message_hash(message);
    let msg =
        Message::from_digest_slice(&digest).map_err(|_| SignedMessageError::InvalidMessage)?;
    let pubkey =
        PublicKey::from_slice(expected_pubkey).map_err(|_| SignedMessageError::InvalidPubkey)?;
    let sig = recoverable.to_standard();
    secp256k1_verify()
        .verify_ecdsa(&msg, &sig, &pubkey)
        .map_err(|_| SignedMessageError::InvalidSignature)?;
    Ok(())
}

pub fn recover_signed_message_pubkey(
    signature: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, SignedMessageError> {
    let (recoverable, compressed) = decode_compact_signature(signature)?;
    let digest = signed_message_hash(message);
    let msg =
        Message::from_digest_slice(&digest).map_err(|_| SignedMessageError::InvalidMessage)?;
    let pubkey = secp256k1_verify()
        .recover_ecdsa(&msg, &recoverable)
        .map_err(|_| SignedMessageError::RecoverFailed)?;
    if compressed {
        Ok(pubkey.serialize().to_vec())
    } else {
        Ok(pubkey.serialize_uncompressed().to_vec())
    }
}

/// The message a delegator signs to authorize `staker`: the staker key hash in hex.
fn delegation_message(staker: &Hash160) -> Vec<u8> {
    bytes_to_hex(staker).into_bytes()
}

/// Proof of delegation: the delegator's compact signature over the staker's key hash.
pub fn create_proof_of_delegation(
    delegator_secret: &SecretKey,
    staker: &Hash160,
) -> Result<Vec<u8>, SignedMessageError> {
    sign_message(delegator_secret, &delegation_message(staker), true).map(|sig| sig.to_vec())
}

/// Recovers the delegator key hash that authorized `staker`, failing on malformed proofs.
pub fn proof_of_delegation_signer(
    staker: &Hash160,
    proof: &[u8],
) -> Result<Hash160, SignedMessageError> {
    let pubkey = recover_signed_message_pubkey(proof, &delegation_message(staker))?;
    Ok(hash160(&pubkey))
}

pub fn verify_proof_of_delegation(staker: &Hash160, delegator: &Hash160, proof: &[u8]) -> bool {
    matches!(proof_of_delegation_signer(staker, proof), Ok(signer) if &signer == delegator)
}

fn encode_compact_signature(
    sig: &RecoverableSignature,
    compressed: bool,
) -> [u8; COMPACT_SIGNATURE_SIZE] {
    let (rec_id, bytes) = sig.serialize_compact();
    let mut out = [0u8; COMPACT_SIGNATURE_SIZE];
    out[0] = 27u8 + (rec_id.to_i32() as u8) + if compressed { 4 } else { 0 };
    out[1..].copy_from_slice(&bytes);
    out
}

fn decode_compact_signature(
    signature: &[u8],
) -> Result<(RecoverableSignature, bool), SignedMessageError> {
    if signature.len() != COMPACT_SIGNATURE_SIZE {
        return Err(SignedMessageError::InvalidSignature);
    }
    let header = signature[0];
    if !(27..=34).contains(&header) {
        return Err(SignedMessageError::InvalidSignature);
    }
    let compressed = header >= 31;
    let recovery = if compressed { header - 31 } else { header - 27 };
    let rec_id =
        RecoveryId::from_i32(recovery as i32).map_err(|_| SignedMessageError::InvalidRecoveryId)?;
    let sig = RecoverableSignature::from_compact(&signature[1..], rec_id)
        .map_err(|_| SignedMessageError::InvalidSignature)?;
    Ok((sig, compressed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> (SecretKey, PublicKey) {
        let secret = SecretKey::from_slice(&[byte; 32]).expect("secret");
        let pubkey = PublicKey::from_secret_key(secp256k1_signing(), &secret);
        (secret, pubkey)
    }

    #[test]
    fn sign_and_verify_compact_message() {
        let (secret, pubkey) = key(1);
        let sig = sign_message(&secret, b"hello", true).expect("sign");

        verify_signed_message(&pubkey.serialize(), &sig, b"hello").expect("verify ok");
        let err = verify_signed_message(&pubkey.serialize_uncompressed(), &sig, b"hello")
            .unwrap_err();
        assert_eq!(err, SignedMessageError::PubkeyMismatch);
        assert!(verify_signed_message(&pubkey.serialize(), &sig, b"other").is_err());
    }

    #[test]
    fn recover_matches_compression_flag() {
        let (secret, pubkey) = key(1);
        let compressed = sign_message(&secret, b"hello", true).expect("sign");
        let recovered = recover_signed_message_pubkey(&compressed, b"hello").expect("recover");
        assert_eq!(recovered, pubkey.serialize().to_vec());

        let uncompressed = sign_message(&secret, b"hello", false).expect("sign");
        let recovered = recover_signed_message_pubkey(&uncompressed, b"hello").expect("recover");
        assert_eq!(recovered, pubkey.serialize_uncompressed().to_vec());
    }

    #[test]
    fn proof_of_delegation_binds_staker_and_delegator() {
        let (delegator_secret, delegator_pub) = key(2);
        let (_, staker_pub) = key(3);
        let delegator = hash160(&delegator_pub.serialize());
        let staker = hash160(&staker_pub.serialize());

        let proof = create_proof_of_delegation(&delegator_secret, &staker).expect("pod");
        assert_eq!(proof.len(), COMPACT_SIGNATURE_SIZE);
        assert!(verify_proof_of_delegation(&staker, &delegator, &proof));

        let other_staker = [9u8; 20];
        assert!(!verify_proof_of_delegation(&other_staker, &delegator, &proof));
        assert!(!verify_proof_of_delegation(&staker, &delegator, &proof[..10]));
    }
}
