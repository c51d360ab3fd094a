//! Wallet engine: ledger, confirmation tracking, coin selection, transaction building,
//! staking and rescans.

pub mod address_book;
pub mod balance;
pub mod chain;
pub mod coin_control;
pub mod coin_selection;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod events;
pub mod fees;
pub mod ledger;
pub mod psbt;
pub mod records;
pub mod rescan;
pub mod signing;
pub mod spend;
pub mod stake;
pub mod tool;
pub mod tx;
pub mod wallet;

pub use balance::Balance;
pub use chain::{spawn_chain_listener, Chain, ChainError, ChainEvent};
pub use coin_control::{CoinControl, SpendableOutput};
pub use config::WalletConfig;
pub use error::WalletError;
pub use events::{ChangeType, WalletEvent};
pub use fees::FeeRate;
pub use psbt::PartiallySignedTransaction;
pub use rescan::{ScanResult, ScanStatus};
pub use signing::{IsMine, KeyStore, SigningProvider};
pub use spend::{Recipient, SendRecipient};
pub use stake::{start_staking, StakeWeight, StakerHandle};
pub use tx::{Confirmation, TxStatus, WalletTx};
pub use wallet::{Wallet, WalletGuard};
