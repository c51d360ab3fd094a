//! Transaction store with insertion ordering and the outpoint spend index.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use yupost_consensus::Hash256;
use yupost_primitives::{OutPoint, Transaction};

use crate::tx::WalletTx;

#[derive(Default)]
pub struct Ledger {
    txs: HashMap<Hash256, WalletTx>,
    ordered: BTreeMap<i64, Hash256>,
    spends: BTreeMap<OutPoint, Vec<Hash256>>,
    order_pos_next: i64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn get(&self, txid: &Hash256) -> Option<&WalletTx> {
        self.txs.get(txid)
    }

    pub fn get_mut(&mut self, txid: &Hash256) -> Option<&mut WalletTx> {
        self.txs.get_mut(txid)
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.txs.contains_key(txid)
    }

    pub fn order_pos_next(&self) -> i64 {
        self.order_pos_next
    }

    pub fn set_order_pos_next(&mut self, next: i64) {
        self.order_pos_next = self.order_pos_next.max(next);
    }

    /// Transactions in order-position order.
    pub fn iter(&self) -> impl Iterator<Item = &WalletTx> {
        self.ordered.values().filter_map(|txid| self.txs.get(txid))
    }

    pub fn txids(&self) -> impl Iterator<Item = &Hash256> {
        self.ordered.values()
    }

    /// Adds a transaction not yet in the ledger, assigning the next order position when it has
    /// none or its position is taken. An existing entry is returned unchanged.
    pub fn insert(&mut self, mut wtx: WalletTx) -> &mut WalletTx {
        let txid = wtx.txid;
        if self.txs.contains_key(&txid) {
            return self.txs.entry(txid).or_insert(wtx);
        }
        if wtx.order_pos < 0 || self.ordered.contains_key(&wtx.order_pos) {
            wtx.order_pos = self.order_pos_next;
        }
        self.order_pos_next = self.order_pos_next.max(wtx.order_pos + 1);
        self.ordered.insert(wtx.order_pos, txid);
        if !wtx.tx.is_coinbase() {
            for input in &wtx.tx.vin {
                let spenders = self.spends.entry(input.prevout).or_default();
                if !spenders.contains(&txid) {
                    spenders.push(txid);
                }
            }
        }
        // The new transaction can change what its parents still hold and what its children debit.
        for input in &wtx.tx.vin {
            if let Some(parent) = self.txs.get(&input.prevout.hash) {
                parent.mark_dirty();
            }
        }
        for index in 0..wtx.tx.vout.len() {
            for child in self.spenders(&OutPoint::new(txid, index as u32)) {
                if let Some(child) = self.txs.get(child) {
                    child.mark_dirty();
                }
            }
        }
        self.txs.entry(txid).or_insert(wtx)
    }

    pub fn spenders(&self, outpoint: &OutPoint) -> &[Hash256] {
        self.spends
            .get(outpoint)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Other wallet transactions claiming any input of `tx`.
    pub fn conflicts(&self, tx: &Transaction) -> BTreeSet<Hash256> {
        let txid = tx.txid();
        let mut out = BTreeSet::new();
        if tx.is_coinbase() {
            return out;
        }
        for input in &tx.vin {
            for spender in self.spenders(&input.prevout) {
                if *spender != txid {
                    out.insert(*spender);
                }
            }
        }
        out
    }

    /// Wallet transactions spending outputs of `txid`, directly.
    pub fn children(&self, txid: &Hash256) -> BTreeSet<Hash256> {
        let Some(wtx) = self.txs.get(txid) else {
            return BTreeSet::new();
        };
        let mut out = BTreeSet::new();
        for index in 0..wtx.tx.vout.len() {
            out.extend(self.spenders(&OutPoint::new(*txid, index as u32)).iter().copied());
        }
        out
    }

    /// `root` followed by every wallet descendant, breadth first, each once.
    pub fn descendants(&self, root: Hash256) -> Vec<Hash256> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(txid) = queue.pop_front() {
            if !seen.insert(txid) {
                continue;
            }
            order.push(txid);
            queue.extend(self.children(&txid));
        }
        order
    }

    /// Dirties `txid` together with the wallet transactions it spends from and those spending it.
    pub fn mark_dirty_around(&self, txid: &Hash256) {
        let Some(wtx) = self.txs.get(txid) else {
            return;
        };
        wtx.mark_dirty();
        for input in &wtx.tx.vin {
            if let Some(parent) = self.txs.get(&input.prevout.hash) {
                parent.mark_dirty();
            }
        }
        for child in self.children(txid) {
            if let Some(child) = self.txs.get(&child) {
                child.mark_dirty();
            }
        }
    }

    pub fn mark_all_dirty(&self) {
        for wtx in self.txs.values() {
            wtx.mark_dirty();
        }
    }
}
