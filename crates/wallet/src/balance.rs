//! Derived amounts, trust, and the balance breakdown.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use yupost_consensus::money::Amount;
use yupost_consensus::Hash256;
use yupost_primitives::{Destination, OutPoint, Transaction, TxOut};

use crate::signing::IsMine;
use crate::tx::{CachedAmount, TxStatus, WalletTx};
use crate::wallet::WalletGuard;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Balance {
    pub mine_trusted: Amount,
    pub mine_untrusted_pending: Amount,
    pub mine_immature: Amount,
    pub mine_stake: Amount,
    pub watchonly_trusted: Amount,
    pub watchonly_untrusted_pending: Amount,
    pub watchonly_immature: Amount,
    pub watchonly_stake: Amount,
}

impl WalletGuard<'_> {
    /// True when a wallet transaction that is confirmed, or unconfirmed and not abandoned,
    /// spends `outpoint`.
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.ledger.spenders(outpoint).iter().any(|spender| {
            self.ledger
                .get(spender)
                .is_some_and(|wtx| wtx.is_confirmed() || wtx.is_unconfirmed())
        })
    }

    pub(crate) fn output_credit(&self, txout: &TxOut, filter: IsMine) -> Amount {
        if self.is_mine_script(&txout.script_pubkey) == filter {
            txout.value
        } else {
            0
        }
    }

    /// Value of our coins consumed by `tx`.
    pub fn tx_debit(&self, tx: &Transaction, filter: IsMine) -> Amount {
        if tx.is_coinbase() {
            return 0;
        }
        tx.vin
            .iter()
            .filter_map(|input| {
                let parent = self.ledger.get(&input.prevout.hash)?;
                let out = parent.tx.vout.get(input.prevout.index as usize)?;
                Some(self.output_credit(out, filter))
            })
            .sum()
    }

    pub fn debit(&self, wtx: &WalletTx, filter: IsMine) -> Amount {
        wtx.cache
            .get_or_compute(CachedAmount::Debit, filter, || self.tx_debit(&wtx.tx, filter))
    }

    pub fn is_from_me(&self, wtx: &WalletTx) -> bool {
        self.debit(wtx, IsMine::Spendable) > 0 || self.debit(wtx, IsMine::WatchOnly) > 0
    }

    fn raw_credit(&self, wtx: &WalletTx, filter: IsMine) -> Amount {
        wtx.tx
            .vout
            .iter()
            .map(|out| self.output_credit(out, filter))
            .sum()
    }

    /// Credit of mature outputs; immature coinbase and coinstake outputs count as zero.
    pub fn credit(&self, wtx: &WalletTx, filter: IsMine) -> Amount {
        if self.is_immature(wtx) {
            return 0;
        }
        wtx.cache
            .get_or_compute(CachedAmount::Credit, filter, || self.raw_credit(wtx, filter))
    }

    pub fn immature_credit(&self, wtx: &WalletTx, filter: IsMine) -> Amount {
        if !self.is_immature(wtx) || self.depth(wtx) <= 0 {
            return 0;
        }
        wtx.cache
            .get_or_compute(CachedAmount::ImmatureCredit, filter, || {
                self.raw_credit(wtx, filter)
            })
    }

    /// Mature, unspent credit.
    pub fn available_credit(&self, wtx: &WalletTx, filter: IsMine) -> Amount {
        if self.is_immature(wtx) {
            return 0;
        }
        wtx.cache
            .get_or_compute(CachedAmount::AvailableCredit, filter, || {
                wtx.tx
                    .vout
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| !self.is_spent(&OutPoint::new(wtx.txid, *index as u32)))
                    .map(|(_, out)| self.output_credit(out, filter))
                    .sum()
            })
    }

    pub fn is_trusted(&self, wtx: &WalletTx) -> bool {
        let mut trusted_parents = BTreeSet::new();
        self.is_trusted_with(wtx, &mut trusted_parents)
    }

    /// Confirmed transactions are trusted. Unconfirmed ones only when we sent them, the node
    /// holds them in its mempool, and every input spends one of our outputs from a trusted
    /// wallet transaction.
    fn is_trusted_with(&self, wtx: &WalletTx, trusted_parents: &mut BTreeSet<Hash256>) -> bool {
        match wtx.status() {
            TxStatus::Confirmed => return self.depth(wtx) >= 1,
            TxStatus::Conflicted | TxStatus::Abandoned => return false,
            TxStatus::Unconfirmed => {}
        }
        if !self.wallet().config().spend_zero_conf_change || !self.is_from_me(wtx) {
            return false;
        }
        if !wtx.in_mempool {
            return false;
        }
        for input in &wtx.tx.vin {
            let Some(parent) = self.ledger.get(&input.prevout.hash) else {
                return false;
            };
            let Some(out) = parent.tx.vout.get(input.prevout.index as usize) else {
                return false;
            };
            if self.is_mine_script(&out.script_pubkey) != IsMine::Spendable {
                return false;
            }
            if trusted_parents.contains(&parent.txid) {
                continue;
            }
            if !self.is_trusted_with(parent, trusted_parents) {
                return false;
            }
            trusted_parents.insert(parent.txid);
        }
        true
    }

    pub fn get_balance(&self) -> Balance {
        let mut balance = Balance::default();
        let mut trusted_parents = BTreeSet::new();
        for wtx in self.ledger.iter() {
            let trusted = self.is_trusted_with(wtx, &mut trusted_parents);
            let depth = self.depth(wtx);
            let mine = self.available_credit(wtx, IsMine::Spendable);
            let watch = self.available_credit(wtx, IsMine::WatchOnly);
            if trusted {
                balance.mine_trusted += mine;
                balance.watchonly_trusted += watch;
            } else if depth == 0 && wtx.in_mempool {
                balance.mine_untrusted_pending += mine;
                balance.watchonly_untrusted_pending += watch;
            }
            let immature_mine = self.immature_credit(wtx, IsMine::Spendable);
            let immature_watch = self.immature_credit(wtx, IsMine::WatchOnly);
            if wtx.is_coinstake() {
                balance.mine_stake += immature_mine;
                balance.watchonly_stake += immature_watch;
            } else {
                balance.mine_immature += immature_mine;
                balance.watchonly_immature += immature_watch;
            }
        }
        balance
    }

    /// Whether `txout` pays one of our addresses that is not named in the address book.
    pub fn is_change(&self, txout: &TxOut) -> bool {
        if self.is_mine_script(&txout.script_pubkey) == IsMine::No {
            return false;
        }
        match Destination::from_script_pubkey(&txout.script_pubkey) {
            Some(destination) => self
                .address_book
                .get(&destination)
                .map_or(true, |entry| entry.is_change()),
            None => true,
        }
    }

    /// Sets of addresses linked by being spent together or receiving change from each other.
    pub fn address_groupings(&self) -> Vec<BTreeSet<Destination>> {
        let mut groupings: Vec<BTreeSet<Destination>> = Vec::new();
        for wtx in self.ledger.iter() {
            if !wtx.is_coinbase() && !wtx.tx.vin.is_empty() {
                let mut grouping = BTreeSet::new();
                let mut any_mine = false;
                for input in &wtx.tx.vin {
                    let Some(out) = self
                        .ledger
                        .get(&input.prevout.hash)
                        .and_then(|parent| parent.tx.vout.get(input.prevout.index as usize))
                    else {
                        continue;
                    };
                    if self.is_mine_script(&out.script_pubkey) == IsMine::No {
                        continue;
                    }
                    if let Some(destination) = Destination::from_script_pubkey(&out.script_pubkey) {
                        grouping.insert(destination);
                        any_mine = true;
                    }
                }
                if any_mine {
                    for out in &wtx.tx.vout {
                        if self.is_change(out) {
                            if let Some(destination) =
                                Destination::from_script_pubkey(&out.script_pubkey)
                            {
                                grouping.insert(destination);
                            }
                        }
                    }
                }
                if !grouping.is_empty() {
                    groupings.push(grouping);
                }
            }
            for out in &wtx.tx.vout {
                if self.is_mine_script(&out.script_pubkey) == IsMine::No {
                    continue;
                }
                if let Some(destination) = Destination::from_script_pubkey(&out.script_pubkey) {
                    groupings.push(BTreeSet::from([destination]));
                }
            }
        }
        merge_groupings(groupings)
    }

    /// Unspent value held by each of our addresses, over trusted transactions only.
    pub fn address_balances(&self) -> BTreeMap<Destination, Amount> {
        let mut balances = BTreeMap::new();
        for wtx in self.ledger.iter() {
            if !self.is_trusted(wtx) || self.is_immature(wtx) {
                continue;
            }
            let depth = self.depth(wtx);
            if depth < if self.is_from_me(wtx) { 0 } else { 1 } {
                continue;
            }
            for (index, out) in wtx.tx.vout.iter().enumerate() {
                if self.is_mine_script(&out.script_pubkey) == IsMine::No {
                    continue;
                }
                let Some(destination) = Destination::from_script_pubkey(&out.script_pubkey) else {
                    continue;
                };
                if self.is_spent(&OutPoint::new(wtx.txid, index as u32)) {
                    continue;
                }
                *balances.entry(destination).or_insert(0) += out.value;
            }
        }
        balances
    }
}

fn merge_groupings(groupings: Vec<BTreeSet<Destination>>) -> Vec<BTreeSet<Destination>> {
    let mut merged: Vec<BTreeSet<Destination>> = Vec::new();
    for grouping in groupings {
        let (overlapping, mut rest): (Vec<_>, Vec<_>) = merged
            .into_iter()
            .partition(|existing| !existing.is_disjoint(&grouping));
        let mut union = grouping;
        for existing in overlapping {
            union.extend(existing);
        }
        rest.push(union);
        merged = rest;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groupings_merge_transitively() {
        let a = Destination::PubKeyHash([1u8; 20]);
        let b = Destination::PubKeyHash([2u8; 20]);
        let c = Destination::PubKeyHash([3u8; 20]);
        let d = Destination::PubKeyHash([4u8; 20]);
        let merged = merge_groupings(vec![
            BTreeSet::from([a, b]),
            BTreeSet::from([d]),
            BTreeSet::from([b, c]),
        ]);
        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&BTreeSet::from([a, b, c])));
        assert!(merged.contains(&BTreeSet::from([d])));
    }
}
