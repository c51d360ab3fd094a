//! Standard script classification, destination extraction, and size estimates.

use yupost_primitives::hash::hash160;
use yupost_primitives::Destination;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    NullData,
    Unknown,
}

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;

/// version + input count + output count + lock time, for small counts.
pub const TX_OVERHEAD_SIZE: usize = 10;
/// value + script length + 25 byte P2PKH script.
pub const P2PKH_OUTPUT_SIZE: usize = 34;
/// outpoint + script length + (DER signature with hash type + compressed key pushes) + sequence.
pub const P2PKH_INPUT_SIZE: usize = 148;
/// outpoint + script length + DER signature push + sequence.
pub const P2PK_INPUT_SIZE: usize = 114;

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if is_p2pk(script) {
        ScriptType::P2Pk
    } else if script.first() == Some(&OP_RETURN) {
        ScriptType::NullData
    } else {
        ScriptType::Unknown
    }
}

/// Destination paid by `script`; pay-to-pubkey maps to the key's hash.
pub fn extract_destination(script: &[u8]) -> Option<Destination> {
    match classify_script_pubkey(script) {
        ScriptType::P2Pkh | ScriptType::P2Sh => Destination::from_script_pubkey(script),
        ScriptType::P2Pk => p2pk_pubkey(script).map(|key| Destination::PubKeyHash(hash160(key))),
        ScriptType::NullData | ScriptType::Unknown => None,
    }
}

pub fn p2pk_pubkey(script: &[u8]) -> Option<&[u8]> {
    if !is_p2pk(script) {
        return None;
    }
    script.get(1..script.len() - 1)
}

pub fn p2pk_script(pubkey: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(pubkey.len() + 2);
    push_data(&mut script, pubkey);
    script.push(OP_CHECKSIG);
    script
}

pub fn null_data_script(payload: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(payload.len() + 3);
    script.push(OP_RETURN);
    push_data(&mut script, payload);
    script
}

pub fn is_unspendable(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
}

/// Appends a minimal push of `data` to `script`.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    }
    script.extend_from_slice(data);
}

/// Reads consecutive data pushes; `None` if a non-push opcode or truncated push is found.
pub fn parse_pushes(mut script: &[u8]) -> Option<Vec<&[u8]>> {
    let mut out = Vec::new();
    while let Some((&opcode, rest)) = script.split_first() {
        let (len, rest) = match opcode {
            0x01..=0x4b => (opcode as usize, rest),
            OP_PUSHDATA1 => {
                let (&len, rest) = rest.split_first()?;
                (len as usize, rest)
            }
            OP_PUSHDATA2 => {
                let bytes = rest.get(..2)?;
                (u16::from_le_bytes([bytes[0], bytes[1]]) as usize, &rest[2..])
            }
            OP_0 => (0, rest),
            _ => return None,
        };
        out.push(rest.get(..len)?);
        script = &rest[len..];
    }
    Some(out)
}

/// Worst-case size of an input spending `script_pubkey` once signed.
pub fn estimate_signed_input_size(script_pubkey: &[u8]) -> Option<usize> {
    match classify_script_pubkey(script_pubkey) {
        ScriptType::P2Pkh => Some(P2PKH_INPUT_SIZE),
        ScriptType::P2Pk => Some(P2PK_INPUT_SIZE),
        ScriptType::P2Sh | ScriptType::NullData | ScriptType::Unknown => None,
    }
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn is_p2pk(script: &[u8]) -> bool {
    let key_len = match script.first().copied() {
        Some(len @ 33) => len,
        Some(len @ 65) => len,
        _ => return false,
    };

    let expected_len = key_len as usize + 2;
    script.len() == expected_len && script[script.len() - 1] == OP_CHECKSIG
}
