//! Core block/transaction types, destinations, and consensus serialization.

pub mod address;
pub mod block;
pub mod encoding;
pub mod hash;
pub mod hex;
pub mod outpoint;
pub mod transaction;

pub use address::{secret_key_to_wif, wif_to_secret_key, AddressError, Destination};
pub use block::{Block, BlockHeader};
pub use hash::{hash160, sha256, sha256d};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
