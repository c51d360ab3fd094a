use yupost_consensus::money::Amount;
use yupost_primitives::encoding::DecodeError;
use yupost_storage::StoreError;

use crate::chain::ChainError;
use crate::signing::SigningError;

#[derive(Debug)]
pub enum WalletError {
    InvalidAddress(String),
    InvalidAmount,
    DuplicateRecipient(String),
    AmountExceedsBalance { amount: Amount, balance: Amount },
    AmountWithFeeExceedsBalance { required: Amount, balance: Amount },
    InsufficientFunds { required: Amount, available: Amount },
    NoEligibleCoins,
    AbsurdFee { fee: Amount, max_fee: Amount },
    AmountTooSmall(&'static str),
    CreationFailed(&'static str),
    TransactionNotFound,
    CannotAbandon(&'static str),
    CannotBump(&'static str),
    RescanInProgress,
    Store(StoreError),
    Chain(ChainError),
    Signing(SigningError),
    Decode(DecodeError),
    InvalidData(&'static str),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::InvalidAddress(address) => write!(f, "invalid address '{address}'"),
            WalletError::InvalidAmount => write!(f, "amount must be positive and within the money range"),
            WalletError::DuplicateRecipient(address) => {
                write!(f, "duplicate recipient '{address}'")
            }
            WalletError::AmountExceedsBalance { amount, balance } => write!(
                f,
                "amount {amount} exceeds available balance {balance}"
            ),
            WalletError::AmountWithFeeExceedsBalance { required, balance } => write!(
                f,
                "amount with fee {required} exceeds available balance {balance}"
            ),
            WalletError::InsufficientFunds {
                required,
                available,
            } => write!(
                f,
                "insufficient funds (required {required}, available {available})"
            ),
            WalletError::NoEligibleCoins => write!(f, "no eligible coins"),
            WalletError::AbsurdFee { fee, max_fee } => {
                write!(f, "fee {fee} exceeds maximum configured fee {max_fee}")
            }
            WalletError::AmountTooSmall(reason) => write!(f, "{reason}"),
            WalletError::CreationFailed(reason) => {
                write!(f, "transaction creation failed: {reason}")
            }
            WalletError::TransactionNotFound => write!(f, "transaction not found in wallet"),
            WalletError::CannotAbandon(reason) => write!(f, "cannot abandon transaction: {reason}"),
            WalletError::CannotBump(reason) => write!(f, "cannot bump transaction: {reason}"),
            WalletError::RescanInProgress => write!(f, "a rescan is already in progress"),
            WalletError::Store(err) => write!(f, "wallet store: {err}"),
            WalletError::Chain(err) => write!(f, "chain: {err}"),
            WalletError::Signing(err) => write!(f, "signing: {err}"),
            WalletError::Decode(err) => write!(f, "{err}"),
            WalletError::InvalidData(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        WalletError::Store(err)
    }
}

impl From<ChainError> for WalletError {
    fn from(err: ChainError) -> Self {
        WalletError::Chain(err)
    }
}

impl From<SigningError> for WalletError {
    fn from(err: SigningError) -> Self {
        WalletError::Signing(err)
    }
}

impl From<DecodeError> for WalletError {
    fn from(err: DecodeError) -> Self {
        WalletError::Decode(err)
    }
}
