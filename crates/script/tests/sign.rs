use secp256k1::{PublicKey, SecretKey};
use yupost_primitives::address::p2pkh_script;
use yupost_primitives::hash::hash160;
use yupost_primitives::{OutPoint, Transaction, TxIn, TxOut};
use yupost_script::secp256k1_signing;
use yupost_script::sighash::SighashType;
use yupost_script::sign::{sign_input, verify_input, SignError};
use yupost_script::standard::p2pk_script;

fn keypair(byte: u8) -> (SecretKey, Vec<u8>) {
    let secret = SecretKey::from_slice(&[byte; 32]).expect("secret");
    let pubkey = PublicKey::from_secret_key(secp256k1_signing(), &secret);
    (secret, pubkey.serialize().to_vec())
}

fn spending_tx() -> Transaction {
    let mut tx = Transaction::new(2);
    tx.vin.push(TxIn::new(OutPoint::new([5u8; 32], 1), u32::MAX));
    tx.vout.push(TxOut::new(1_000, vec![0x51]));
    tx
}

#[test]
fn p2pkh_signature_verifies_and_detects_tampering() {
    let (secret, pubkey) = keypair(7);
    let script_pubkey = p2pkh_script(&hash160(&pubkey));
    let mut tx = spending_tx();
    tx.vin[0].script_sig =
        sign_input(&tx, 0, &script_pubkey, &secret, true, SighashType::ALL).expect("sign");
    assert!(verify_input(&tx, 0, &script_pubkey));

    tx.vout[0].value += 1;
    assert!(!verify_input(&tx, 0, &script_pubkey));
}

#[test]
fn p2pk_signature_verifies() {
    let (secret, pubkey) = keypair(8);
    let script_pubkey = p2pk_script(&pubkey);
    let mut tx = spending_tx();
    tx.vin[0].script_sig =
        sign_input(&tx, 0, &script_pubkey, &secret, true, SighashType::ALL).expect("sign");
    assert!(verify_input(&tx, 0, &script_pubkey));
}

#[test]
fn wrong_key_is_rejected() {
    let (secret, _) = keypair(7);
    let (_, other_pub) = keypair(9);
    let script_pubkey = p2pkh_script(&hash160(&other_pub));
    let tx = spending_tx();
    assert_eq!(
        sign_input(&tx, 0, &script_pubkey, &secret, true, SighashType::ALL),
        Err(SignError::KeyMismatch)
    );
}
