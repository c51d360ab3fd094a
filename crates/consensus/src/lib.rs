//! Chain constants, monetary units, and per-network parameters used by the wallet.

pub mod constants;
pub mod money;
pub mod params;

pub use params::{chain_params, ChainParams, Network};

/// Little-endian 256-bit hash as stored on the wire.
pub type Hash256 = [u8; 32];

/// 160-bit key or script hash (RIPEMD160 of SHA256).
pub type Hash160 = [u8; 20];
