//! Caller-supplied selection constraints and the spendable-output view of the ledger.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use yupost_consensus::money::Amount;
use yupost_consensus::Hash256;
use yupost_primitives::{Destination, OutPoint, TxOut};
use yupost_script::standard::{estimate_signed_input_size, extract_destination};

use crate::fees::FeeRate;
use crate::signing::IsMine;
use crate::wallet::WalletGuard;

pub const MAP_REPLACES_TXID: &str = "replaces_txid";
pub const MAP_REPLACED_BY_TXID: &str = "replaced_by_txid";

#[derive(Clone, Debug)]
pub struct CoinControl {
    pub change_destination: Option<Destination>,
    /// Output index for the change; random when unset.
    pub change_position: Option<usize>,
    /// With preset inputs, whether selection may add more coins.
    pub allow_other_inputs: bool,
    pub allow_watch_only: bool,
    pub fee_rate: Option<FeeRate>,
    pub confirm_target: Option<u32>,
    pub signal_rbf: Option<bool>,
    pub avoid_partial_spends: Option<bool>,
    pub min_depth: i32,
    pub max_depth: i32,
    pub(crate) selected: BTreeSet<OutPoint>,
}

impl Default for CoinControl {
    fn default() -> Self {
        Self {
            change_destination: None,
            change_position: None,
            allow_other_inputs: false,
            allow_watch_only: false,
            fee_rate: None,
            confirm_target: None,
            signal_rbf: None,
            avoid_partial_spends: None,
            min_depth: 0,
            max_depth: 9_999_999,
            selected: BTreeSet::new(),
        }
    }
}

impl CoinControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_selected(&self) -> bool {
        !self.selected.is_empty()
    }

    pub fn is_selected(&self, outpoint: &OutPoint) -> bool {
        self.selected.contains(outpoint)
    }

    pub fn select(&mut self, outpoint: OutPoint) {
        self.selected.insert(outpoint);
    }

    pub fn unselect(&mut self, outpoint: &OutPoint) {
        self.selected.remove(outpoint);
    }

    pub fn unselect_all(&mut self) {
        self.selected.clear();
    }

    pub fn selected(&self) -> impl Iterator<Item = &OutPoint> {
        self.selected.iter()
    }
}

/// A wallet output that could fund a new transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpendableOutput {
    pub outpoint: OutPoint,
    pub txout: TxOut,
    pub depth: i32,
    /// Estimated size of the signed input, `None` when the script cannot be solved.
    pub input_bytes: Option<usize>,
    pub spendable: bool,
    pub solvable: bool,
    /// False for unconfirmed outputs we cannot vouch for.
    pub safe: bool,
    pub from_me: bool,
    pub time: u32,
    /// Unconfirmed wallet transactions this output depends on, itself included.
    pub ancestors: usize,
}

impl SpendableOutput {
    pub fn destination(&self) -> Option<Destination> {
        extract_destination(&self.txout.script_pubkey)
    }
}

impl WalletGuard<'_> {
    /// Outputs eligible for selection, honouring `coin_control`. Locked, spent, immature and
    /// conflicted outputs never appear.
    pub fn available_coins(
        &self,
        coin_control: Option<&CoinControl>,
        only_safe: bool,
    ) -> Vec<SpendableOutput> {
        let default_control = CoinControl::default();
        let control = coin_control.unwrap_or(&default_control);
        let mut coins = Vec::new();
        for wtx in self.ledger.iter() {
            if self.is_immature(wtx) {
                continue;
            }
            if wtx.is_conflicted() || wtx.is_abandoned() {
                continue;
            }
            let depth = self.depth(wtx);
            if depth == 0 && !wtx.in_mempool {
                continue;
            }
            let mut safe = self.is_trusted(wtx);
            if depth == 0
                && (wtx.map_value.contains_key(MAP_REPLACES_TXID)
                    || wtx.map_value.contains_key(MAP_REPLACED_BY_TXID))
            {
                safe = false;
            }
            if only_safe && !safe {
                continue;
            }
            if depth < control.min_depth || depth > control.max_depth {
                continue;
            }
            let from_me = wtx.from_me || self.is_from_me(wtx);
            let ancestors = if depth == 0 {
                self.unconfirmed_ancestors(&wtx.txid)
            } else {
                0
            };
            for (index, txout) in wtx.tx.vout.iter().enumerate() {
                let outpoint = OutPoint::new(wtx.txid, index as u32);
                if control.has_selected()
                    && !control.allow_other_inputs
                    && !control.is_selected(&outpoint)
                {
                    continue;
                }
                if self.is_locked_coin(&outpoint) || self.is_spent(&outpoint) {
                    continue;
                }
                let mine = self.is_mine_script(&txout.script_pubkey);
                if mine == IsMine::No || txout.value <= 0 {
                    continue;
                }
                let input_bytes = estimate_signed_input_size(&txout.script_pubkey);
                let solvable = input_bytes.is_some();
                let spendable = solvable
                    && (mine == IsMine::Spendable
                        || (mine == IsMine::WatchOnly && control.allow_watch_only));
                coins.push(SpendableOutput {
                    outpoint,
                    txout: txout.clone(),
                    depth,
                    input_bytes,
                    spendable,
                    solvable,
                    safe,
                    from_me,
                    time: wtx.time_smart,
                    ancestors,
                });
            }
        }
        coins
    }

    /// Spendable value the selection path could draw on.
    pub fn available_balance(&self, coin_control: Option<&CoinControl>) -> Amount {
        self.available_coins(coin_control, true)
            .iter()
            .filter(|coin| coin.spendable)
            .map(|coin| coin.txout.value)
            .sum()
    }

    /// Available coins plus locked ones, keyed by the first non-change address up their
    /// spending history.
    pub fn list_coins(&self) -> BTreeMap<Destination, Vec<SpendableOutput>> {
        let mut result: BTreeMap<Destination, Vec<SpendableOutput>> = BTreeMap::new();
        let mut coins = self.available_coins(None, false);
        for outpoint in self.locked_coins.iter() {
            let Some(wtx) = self.ledger.get(&outpoint.hash) else {
                continue;
            };
            let depth = self.depth(wtx);
            let Some(txout) = wtx.tx.vout.get(outpoint.index as usize) else {
                continue;
            };
            if wtx.is_conflicted() || wtx.is_abandoned() || self.is_spent(outpoint) {
                continue;
            }
            if self.is_mine_script(&txout.script_pubkey) != IsMine::Spendable {
                continue;
            }
            let input_bytes = estimate_signed_input_size(&txout.script_pubkey);
            coins.push(SpendableOutput {
                outpoint: *outpoint,
                txout: txout.clone(),
                depth,
                input_bytes,
                spendable: true,
                solvable: input_bytes.is_some(),
                safe: true,
                from_me: wtx.from_me,
                time: wtx.time_smart,
                ancestors: 0,
            });
        }
        for coin in coins {
            if !coin.spendable {
                continue;
            }
            let owner = self.non_change_parent(&coin.outpoint);
            if let Some(destination) = extract_destination(&owner.script_pubkey) {
                result.entry(destination).or_default().push(coin);
            }
        }
        result
    }

    fn non_change_parent(&self, outpoint: &OutPoint) -> TxOut {
        let mut current = *outpoint;
        let mut output = self
            .ledger
            .get(&current.hash)
            .and_then(|wtx| wtx.tx.vout.get(current.index as usize))
            .cloned()
            .unwrap_or_else(TxOut::empty);
        loop {
            let Some(wtx) = self.ledger.get(&current.hash) else {
                break;
            };
            if !self.is_change(&output) || !self.is_from_me(wtx) {
                break;
            }
            let Some(prevout) = wtx.tx.vin.first().map(|input| input.prevout) else {
                break;
            };
            let Some(parent_out) = self
                .ledger
                .get(&prevout.hash)
                .and_then(|parent| parent.tx.vout.get(prevout.index as usize))
            else {
                break;
            };
            if self.is_mine_script(&parent_out.script_pubkey) == IsMine::No {
                break;
            }
            current = prevout;
            output = parent_out.clone();
        }
        output
    }

    /// Count of unconfirmed wallet transactions in the ancestry of `txid`, itself included.
    pub fn unconfirmed_ancestors(&self, txid: &Hash256) -> usize {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([*txid]);
        while let Some(current) = queue.pop_front() {
            let Some(wtx) = self.ledger.get(&current) else {
                continue;
            };
            if !wtx.is_unconfirmed() || !seen.insert(current) {
                continue;
            }
            queue.extend(wtx.tx.vin.iter().map(|input| input.prevout.hash));
        }
        seen.len()
    }
}
