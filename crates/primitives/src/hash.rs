use ripemd::{Digest as RipemdDigest, Ripemd160};
use sha2::Sha256;
use yupost_consensus::{Hash160, Hash256};

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

pub fn hash160(data: &[u8]) -> Hash160 {
    let sha = sha256(data);
    let digest = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Hashes a sequence of length-prefixed fields; used for record ids.
pub fn sha256d_fields<'a, I>(fields: I) -> Hash256
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut data = Vec::new();
    for field in fields {
        data.extend_from_slice(&(field.len() as u32).to_le_bytes());
        data.extend_from_slice(field);
    }
    sha256d(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::bytes_to_hex;

    #[test]
    fn sha256d_of_empty_input() {
        assert_eq!(
            bytes_to_hex(&sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn field_hash_is_length_prefixed() {
        let ab_c = sha256d_fields([b"ab".as_slice(), b"c".as_slice()]);
        let a_bc = sha256d_fields([b"a".as_slice(), b"bc".as_slice()]);
        assert_ne!(ab_c, a_bc);
    }
}
