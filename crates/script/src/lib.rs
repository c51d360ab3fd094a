//! Script classification, signature hashing, and signing helpers for wallet outputs.

pub mod delegation;
pub mod message;
mod secp;
pub mod sighash;
pub mod sign;
pub mod standard;

pub use secp::secp256k1_signing;
