use yupost_consensus::Hash256;
use yupost_primitives::block::{Block, BlockHeader, CURRENT_VERSION};
use yupost_primitives::encoding::{decode, encode, DecodeError};
use yupost_primitives::outpoint::OutPoint;
use yupost_primitives::transaction::{Transaction, TxIn, TxOut};

fn seq_hash(start: u8) -> Hash256 {
    std::array::from_fn(|i| start.wrapping_add(i as u8))
}

fn push_hash_le(buffer: &mut Vec<u8>, start: u8) {
    for byte in 0u8..=0x1f {
        buffer.push(start.wrapping_add(byte));
    }
}

fn sample_tx() -> Transaction {
    let mut tx = Transaction::new(2);
    let mut input = TxIn::new(OutPoint::new(seq_hash(0x40), 3), 0xffff_fffd);
    input.script_sig = vec![0x51, 0x52];
    tx.vin.push(input);
    tx.vout.push(TxOut::new(0x0102, vec![0x6a]));
    tx.lock_time = 0x0a0b_0c0d;
    tx
}

#[test]
fn serialize_transaction_layout() {
    let tx = sample_tx();

    let mut expected = Vec::new();
    expected.extend_from_slice(&2i32.to_le_bytes());
    expected.push(1);
    push_hash_le(&mut expected, 0x40);
    expected.extend_from_slice(&3u32.to_le_bytes());
    expected.extend_from_slice(&[2, 0x51, 0x52]);
    expected.extend_from_slice(&0xffff_fffdu32.to_le_bytes());
    expected.push(1);
    expected.extend_from_slice(&0x0102i64.to_le_bytes());
    expected.extend_from_slice(&[1, 0x6a]);
    expected.extend_from_slice(&0x0a0b_0c0du32.to_le_bytes());

    assert_eq!(tx.to_bytes(), expected);
    assert_eq!(tx.serialized_size(), expected.len());
    assert_eq!(Transaction::from_bytes(&expected).expect("decode"), tx);
    assert!(tx.signals_rbf());
}

#[test]
fn header_hash_skips_signature_but_commits_to_delegation_proof() {
    let header = BlockHeader {
        version: CURRENT_VERSION,
        prev_block: seq_hash(0x00),
        merkle_root: seq_hash(0x20),
        time: 0x5000_0010,
        bits: 0x207f_ffff,
        nonce: 0,
        prevout_stake: OutPoint::new(seq_hash(0x60), 1),
        block_sig: vec![0xaa; 4],
        proof_of_delegation: Vec::new(),
    };

    let mut expected = Vec::new();
    expected.extend_from_slice(&CURRENT_VERSION.to_le_bytes());
    push_hash_le(&mut expected, 0x00);
    push_hash_le(&mut expected, 0x20);
    expected.extend_from_slice(&0x5000_0010u32.to_le_bytes());
    expected.extend_from_slice(&0x207f_ffffu32.to_le_bytes());
    expected.extend_from_slice(&0u32.to_le_bytes());
    push_hash_le(&mut expected, 0x60);
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(&[4, 0xaa, 0xaa, 0xaa, 0xaa]);
    expected.push(0);
    assert_eq!(encode(&header), expected);
    assert!(header.is_proof_of_stake());
    assert!(!header.has_proof_of_delegation());

    let mut resigned = header.clone();
    resigned.block_sig = vec![0xbb; 70];
    assert_eq!(resigned.hash(), header.hash());

    let mut delegated = header.clone();
    delegated.proof_of_delegation = vec![0x01; 65];
    assert!(delegated.has_proof_of_delegation());
    assert_ne!(delegated.hash(), header.hash());
}

#[test]
fn block_decodes_and_rejects_trailing_bytes() {
    let mut coinbase = Transaction::new(1);
    coinbase.vin.push(TxIn::new(OutPoint::null(), u32::MAX));
    coinbase.vout.push(TxOut::new(50, vec![0x51]));
    let mut block = Block {
        header: BlockHeader {
            version: CURRENT_VERSION,
            prev_block: seq_hash(0x10),
            merkle_root: [0u8; 32],
            time: 1,
            bits: 0x207f_ffff,
            nonce: 7,
            prevout_stake: OutPoint::null(),
            block_sig: Vec::new(),
            proof_of_delegation: Vec::new(),
        },
        transactions: vec![coinbase.clone(), sample_tx()],
    };
    block.header.merkle_root = block.compute_merkle_root();
    assert!(!block.is_proof_of_stake());
    assert!(block.transactions[0].is_coinbase());

    let mut bytes = encode(&block);
    assert_eq!(decode::<Block>(&bytes).expect("decode"), block);

    bytes.push(0);
    assert_eq!(decode::<Block>(&bytes), Err(DecodeError::TrailingBytes));
    assert_eq!(
        decode::<Block>(&bytes[..bytes.len() - 10]),
        Err(DecodeError::UnexpectedEof)
    );
}
