use yupost_primitives::{OutPoint, Transaction, TxIn, TxOut};
use yupost_script::sighash::{
    signature_hash, SighashError, SighashType, SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_NONE,
    SIGHASH_SINGLE,
};

fn two_input_tx() -> Transaction {
    let mut tx = Transaction::new(2);
    tx.vin.push(TxIn::new(OutPoint::new([1u8; 32], 0), u32::MAX));
    tx.vin.push(TxIn::new(OutPoint::new([2u8; 32], 1), u32::MAX));
    tx.vout.push(TxOut::new(10, vec![0x51]));
    tx
}

#[test]
fn sighash_type_flags() {
    let combined = SighashType(SIGHASH_ALL | SIGHASH_ANYONECANPAY);
    assert_eq!(combined.base_type(), SIGHASH_ALL);
    assert!(combined.has_anyone_can_pay());

    let none = SighashType(SIGHASH_NONE);
    assert_eq!(none.base_type(), SIGHASH_NONE);
    assert!(!none.has_anyone_can_pay());
}

#[test]
fn sighash_all_commits_to_outputs_and_other_inputs() {
    let tx = two_input_tx();
    let base = signature_hash(&tx, 0, &[0xac], SighashType::ALL).expect("sighash");

    let mut changed_output = tx.clone();
    changed_output.vout[0].value = 11;
    assert_ne!(
        signature_hash(&changed_output, 0, &[0xac], SighashType::ALL).expect("sighash"),
        base
    );

    let mut changed_other_input = tx.clone();
    changed_other_input.vin[1].prevout.index = 7;
    assert_ne!(
        signature_hash(&changed_other_input, 0, &[0xac], SighashType::ALL).expect("sighash"),
        base
    );

    let anyone = SighashType(SIGHASH_ALL | SIGHASH_ANYONECANPAY);
    assert_eq!(
        signature_hash(&tx, 0, &[0xac], anyone).expect("sighash"),
        signature_hash(&changed_other_input, 0, &[0xac], anyone).expect("sighash")
    );
}

#[test]
fn sighash_rejects_bad_indexes() {
    let tx = two_input_tx();
    assert_eq!(
        signature_hash(&tx, 2, &[], SighashType::ALL),
        Err(SighashError::InputIndexOutOfRange)
    );
    assert_eq!(
        signature_hash(&tx, 1, &[], SighashType(SIGHASH_SINGLE)),
        Err(SighashError::MissingOutput)
    );
}
