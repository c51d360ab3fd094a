//! Fee rates and the dust/change economics derived from them.

use yupost_consensus::money::Amount;
use yupost_primitives::TxOut;
use yupost_script::standard::{estimate_signed_input_size, is_unspendable, P2PKH_INPUT_SIZE};

/// Relay fee rate that defines dust outputs.
pub const DUST_RELAY_FEE: FeeRate = FeeRate::new(3_000);
/// Floor applied to every fee the wallet pays.
pub const MIN_RELAY_TX_FEE: FeeRate = FeeRate::new(1_000);

/// Fee rate in base units per 1000 bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FeeRate {
    per_kb: Amount,
}

impl FeeRate {
    pub const fn new(per_kb: Amount) -> Self {
        Self { per_kb }
    }

    pub fn from_fee_and_size(fee: Amount, size: usize) -> Self {
        if size == 0 {
            return Self::new(0);
        }
        Self::new(fee.saturating_mul(1_000) / size as Amount)
    }

    pub fn per_kb(self) -> Amount {
        self.per_kb
    }

    pub fn is_zero(self) -> bool {
        self.per_kb == 0
    }

    /// Fee for `size` bytes; a non-zero rate never rounds down to a free transaction.
    pub fn fee(self, size: usize) -> Amount {
        let fee = self.per_kb.saturating_mul(size as Amount) / 1_000;
        if fee == 0 && size != 0 && self.per_kb > 0 {
            return 1;
        }
        fee
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/kB", self.per_kb)
    }
}

/// Value below which `txout` costs more to spend at `rate` than it is worth.
pub fn dust_threshold(txout: &TxOut, rate: FeeRate) -> Amount {
    if is_unspendable(&txout.script_pubkey) {
        return 0;
    }
    let spend_size =
        estimate_signed_input_size(&txout.script_pubkey).unwrap_or(P2PKH_INPUT_SIZE);
    rate.fee(txout.serialized_size() + spend_size)
}

pub fn is_dust(txout: &TxOut, rate: FeeRate) -> bool {
    txout.value < dust_threshold(txout, rate)
}
