//! Base58Check destinations and their script forms.

use yupost_consensus::{ChainParams, Hash160};

use crate::hash::sha256d;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::InvalidLength => write!(f, "invalid address length"),
            AddressError::InvalidCharacter => write!(f, "invalid base58 character"),
            AddressError::InvalidChecksum => write!(f, "invalid address checksum"),
            AddressError::UnknownPrefix => write!(f, "address prefix does not match network"),
        }
    }
}

impl std::error::Error for AddressError {}

/// Something an output can pay to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Destination {
    PubKeyHash(Hash160),
    ScriptHash(Hash160),
}

impl Destination {
    pub fn hash(&self) -> &Hash160 {
        match self {
            Destination::PubKeyHash(hash) | Destination::ScriptHash(hash) => hash,
        }
    }

    pub fn encode(&self, params: &ChainParams) -> String {
        let (prefix, hash) = match self {
            Destination::PubKeyHash(hash) => (params.pubkey_address_prefix, hash),
            Destination::ScriptHash(hash) => (params.script_address_prefix, hash),
        };
        let mut payload = Vec::with_capacity(21);
        payload.push(prefix);
        payload.extend_from_slice(hash);
        base58check_encode(&payload)
    }

    pub fn decode(address: &str, params: &ChainParams) -> Result<Self, AddressError> {
        let payload = base58check_decode(address)?;
        let (prefix, hash) = payload.split_first().ok_or(AddressError::InvalidLength)?;
        let hash: Hash160 = hash.try_into().map_err(|_| AddressError::InvalidLength)?;
        if *prefix == params.pubkey_address_prefix {
            return Ok(Destination::PubKeyHash(hash));
        }
        if *prefix == params.script_address_prefix {
            return Ok(Destination::ScriptHash(hash));
        }
        Err(AddressError::UnknownPrefix)
    }

    pub fn script_pubkey(&self) -> Vec<u8> {
        match self {
            Destination::PubKeyHash(hash) => p2pkh_script(hash),
            Destination::ScriptHash(hash) => p2sh_script(hash),
        }
    }

    /// Recognizes pay-to-pubkey-hash and pay-to-script-hash scripts only.
    pub fn from_script_pubkey(script: &[u8]) -> Option<Self> {
        if is_p2pkh(script) {
            return script[3..23].try_into().ok().map(Destination::PubKeyHash);
        }
        if is_p2sh(script) {
            return script[2..22].try_into().ok().map(Destination::ScriptHash);
        }
        None
    }
}

pub fn secret_key_to_wif(secret: &[u8; 32], params: &ChainParams, compressed: bool) -> String {
    let mut payload = Vec::with_capacity(1 + secret.len() + usize::from(compressed));
    payload.push(params.secret_key_prefix);
    payload.extend_from_slice(secret);
    if compressed {
        payload.push(0x01);
    }
    base58check_encode(&payload)
}

pub fn wif_to_secret_key(wif: &str, params: &ChainParams) -> Result<([u8; 32], bool), AddressError> {
    let payload = base58check_decode(wif)?;
    let (prefix, rest) = payload.split_first().ok_or(AddressError::InvalidLength)?;
    if *prefix != params.secret_key_prefix {
        return Err(AddressError::UnknownPrefix);
    }
    let compressed = match rest.len() {
        32 => false,
        33 if rest[32] == 0x01 => true,
        _ => return Err(AddressError::InvalidLength),
    };
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&rest[..32]);
    Ok((secret, compressed))
}

pub fn p2pkh_script(hash: &Hash160) -> Vec<u8> {
    const OP_DUP: u8 = 0x76;
    const OP_HASH160: u8 = 0xa9;
    const OP_EQUALVERIFY: u8 = 0x88;
    const OP_CHECKSIG: u8 = 0xac;

    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

pub fn p2sh_script(hash: &Hash160) -> Vec<u8> {
    const OP_HASH160: u8 = 0xa9;
    const OP_EQUAL: u8 = 0x87;

    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(hash);
    script.push(OP_EQUAL);
    script
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == 0x76
        && script[1] == 0xa9
        && script[2] == 0x14
        && script[23] == 0x88
        && script[24] == 0xac
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == 0xa9 && script[1] == 0x14 && script[22] == 0x87
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    let digest = sha256d(payload);
    if checksum != &digest[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    let checksum = sha256d(payload);
    data.extend_from_slice(&checksum[..4]);
    base58_encode(&data)
}

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes = Vec::new();
    for ch in input.bytes() {
        let value = base58_value(ch).ok_or(AddressError::InvalidCharacter)? as u32;
        let mut carry = value;
        for byte in bytes.iter_mut().rev() {
            let val = (*byte as u32) * 58 + carry;
            *byte = (val & 0xff) as u8;
            carry = val >> 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let leading_zeros = input.bytes().take_while(|b| *b == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    if data.is_empty() {
        return String::new();
    }
    let mut digits = vec![0u8];
    for byte in data {
        let mut carry = *byte as u32;
        for digit in digits.iter_mut().rev() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = data.iter().take_while(|b| **b == 0u8).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    for _ in 0..leading_zeros {
        out.push('1');
    }
    for digit in digits {
        out.push(ALPHABET[digit as usize] as char);
    }
    out
}

fn base58_value(byte: u8) -> Option<u8> {
    const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    ALPHABET
        .iter()
        .position(|value| *value == byte)
        .map(|pos| pos as u8)
}
