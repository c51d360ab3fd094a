//! Chain-wide constants consulted by wallet policy.

/// Coinbase and coinstake outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 500;
/// Stake timestamps are aligned to this mask (16 second granularity).
pub const STAKE_TIMESTAMP_MASK: u32 = 15;
/// Sequence value that opts a transaction out of replacement.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;
/// Inputs with a sequence at or below this value signal replaceability.
pub const MAX_BIP125_RBF_SEQUENCE: u32 = 0xffff_fffd;
/// Current wallet transaction version.
pub const CURRENT_TX_VERSION: i32 = 2;
/// Maximum standard transaction weight accepted for relay, in bytes.
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;
/// Maximum percentage a delegator can grant to a staker.
pub const MAX_DELEGATION_FEE: u8 = 100;

/// Message magic used for proof-of-delegation signatures.
pub const SIGNED_MESSAGE_MAGIC: &str = "YuPost Signed Message:\n";
