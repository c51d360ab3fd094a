//! Transaction lifecycle driven by mempool and block notifications.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use yupost_consensus::Hash256;
use yupost_primitives::{Block, Destination, OutPoint, Transaction};
use yupost_script::delegation::DelegationPayload;
use yupost_storage::WriteBatch;

use crate::address_book::USED_KEY;
use crate::chain::RemovalReason;
use crate::error::WalletError;
use crate::events::{ChangeType, WalletEvent};
use crate::records::DelegationRecord;
use crate::signing::IsMine;
use crate::tx::{Confirmation, TxStatus, WalletTx};
use crate::wallet::{unix_time, WalletGuard};

impl WalletGuard<'_> {
    /// Signed depth: positive when confirmed, 0 when unconfirmed or abandoned, negative when
    /// conflicted by a block that deep. A conflict whose block has since been disconnected
    /// stays at -1.
    pub fn depth(&self, wtx: &WalletTx) -> i32 {
        let tip = self.tip_height();
        match wtx.status() {
            TxStatus::Confirmed => tip.map_or(0, |tip| tip - wtx.confirmation.block_height + 1),
            TxStatus::Conflicted => {
                -tip.map_or(1, |tip| (tip - wtx.confirmation.block_height + 1).max(1))
            }
            TxStatus::Unconfirmed | TxStatus::Abandoned => 0,
        }
    }

    pub fn depth_of(&self, txid: &Hash256) -> Option<i32> {
        self.ledger.get(txid).map(|wtx| self.depth(wtx))
    }

    /// Blocks left before a coinbase or coinstake output can be spent.
    pub fn blocks_to_maturity(&self, wtx: &WalletTx) -> i32 {
        if !(wtx.is_coinbase() || wtx.is_coinstake()) {
            return 0;
        }
        let maturity = self.wallet().params().coinbase_maturity;
        (maturity + 1 - self.depth(wtx)).max(0)
    }

    pub fn is_immature(&self, wtx: &WalletTx) -> bool {
        self.blocks_to_maturity(wtx) > 0
    }

    fn involves_wallet(&self, tx: &Transaction) -> bool {
        tx.vout
            .iter()
            .any(|out| self.is_mine_script(&out.script_pubkey) != IsMine::No)
            || tx.vin.iter().any(|input| self.is_mine_outpoint(&input.prevout) != IsMine::No)
    }

    pub(crate) fn is_mine_outpoint(&self, outpoint: &OutPoint) -> IsMine {
        self.ledger
            .get(&outpoint.hash)
            .and_then(|wtx| wtx.tx.vout.get(outpoint.index as usize))
            .map(|out| self.is_mine_script(&out.script_pubkey))
            .unwrap_or(IsMine::No)
    }

    /// Inserts or updates `tx`. Returns whether the ledger changed. The caller decides what
    /// to do with a failed write.
    pub(crate) fn add_to_wallet(
        &mut self,
        tx: Arc<Transaction>,
        confirmation: Confirmation,
        from_me: bool,
        batch: &mut WriteBatch,
    ) -> bool {
        let txid = tx.txid();
        let change = if let Some(existing) = self.ledger.get_mut(&txid) {
            if existing.confirmation == confirmation && (existing.from_me || !from_me) {
                return false;
            }
            existing.confirmation = confirmation;
            existing.from_me |= from_me;
            ChangeType::Updated
        } else {
            let mut wtx = WalletTx::new(Arc::clone(&tx), unix_time() as u32);
            wtx.confirmation = confirmation;
            wtx.from_me = from_me || self.debits_wallet(&tx);
            self.ledger.insert(wtx);
            self.put_order_pos_next(batch);
            self.mark_used_destinations(&tx, batch);
            ChangeType::New
        };
        self.ledger.mark_dirty_around(&txid);
        if let Some(wtx) = self.ledger.get(&txid) {
            self.put_tx(batch, wtx);
            yupost_log::log_debug!(
                "wallet tx {} -> {:?} ({change:?})",
                yupost_primitives::hex::hash256_to_hex(&txid),
                wtx.status()
            );
        }
        self.emit(WalletEvent::TransactionChanged { txid, change });
        if confirmation.status == TxStatus::Unconfirmed {
            self.mark_known_conflicts(&tx, batch);
        }
        true
    }

    /// Conflicts an unconfirmed `tx` that spends an outpoint already spent by a confirmed
    /// wallet transaction, or that spends from a conflicted one.
    fn mark_known_conflicts(&mut self, tx: &Transaction, batch: &mut WriteBatch) {
        if tx.is_coinbase() {
            return;
        }
        let txid = tx.txid();
        let mut blocks: Vec<(i32, Hash256)> = Vec::new();
        for input in &tx.vin {
            for spender in self.ledger.spenders(&input.prevout) {
                if *spender == txid {
                    continue;
                }
                if let Some(other) = self.ledger.get(spender).filter(|wtx| wtx.is_confirmed()) {
                    blocks.push((other.confirmation.block_height, other.confirmation.block_hash));
                }
            }
            if let Some(parent) = self
                .ledger
                .get(&input.prevout.hash)
                .filter(|wtx| wtx.is_conflicted())
            {
                blocks.push((parent.confirmation.block_height, parent.confirmation.block_hash));
            }
        }
        // Deepest conflict first; shallower ones cannot override it.
        blocks.sort();
        for (height, block_hash) in blocks {
            yupost_log::log_info!(
                "wallet tx {} conflicts with a transaction in block {height}",
                yupost_primitives::hex::hash256_to_hex(&txid)
            );
            self.mark_conflicted(height, block_hash, txid, batch);
        }
    }

    fn debits_wallet(&self, tx: &Transaction) -> bool {
        !tx.is_coinbase()
            && tx
                .vin
                .iter()
                .any(|input| self.is_mine_outpoint(&input.prevout) != IsMine::No)
    }

    /// Flags our destinations spent from by `tx` as used.
    fn mark_used_destinations(&mut self, tx: &Transaction, batch: &mut WriteBatch) {
        if tx.is_coinbase() {
            return;
        }
        let spent: Vec<Destination> = tx
            .vin
            .iter()
            .filter_map(|input| {
                let wtx = self.ledger.get(&input.prevout.hash)?;
                let out = wtx.tx.vout.get(input.prevout.index as usize)?;
                if self.is_mine_script(&out.script_pubkey) == IsMine::No {
                    return None;
                }
                Destination::from_script_pubkey(&out.script_pubkey)
            })
            .collect();
        for destination in spent {
            if self.address_book.is_used(&destination) {
                continue;
            }
            let address = destination.encode(self.wallet().params());
            batch.put(
                yupost_storage::Column::DestData,
                crate::address_book::dest_data_key(&address, USED_KEY),
                b"p".to_vec(),
            );
            self.address_book.set_dest_data(destination, USED_KEY, "p");
        }
    }

    /// Applies `tx` seen with `confirmation`, marking other spenders of its inputs conflicted
    /// when it is in a block.
    pub(crate) fn sync_transaction(
        &mut self,
        tx: &Arc<Transaction>,
        confirmation: Confirmation,
        batch: &mut WriteBatch,
    ) -> bool {
        let txid = tx.txid();
        if confirmation.status == TxStatus::Confirmed && !tx.is_coinbase() {
            for input in &tx.vin {
                let others: Vec<Hash256> = self
                    .ledger
                    .spenders(&input.prevout)
                    .iter()
                    .filter(|spender| **spender != txid)
                    .copied()
                    .collect();
                for other in others {
                    yupost_log::log_info!(
                        "wallet tx {} conflicts with {} in block {}",
                        yupost_primitives::hex::hash256_to_hex(&other),
                        yupost_primitives::hex::hash256_to_hex(&txid),
                        confirmation.block_height
                    );
                    self.mark_conflicted(
                        confirmation.block_height,
                        confirmation.block_hash,
                        other,
                        batch,
                    );
                }
            }
        }
        if !self.ledger.contains(&txid) && !self.involves_wallet(tx) {
            return false;
        }
        self.add_to_wallet(Arc::clone(tx), confirmation, false, batch)
    }

    /// Marks `root` and its descendants conflicted by the block at `height`, stopping at
    /// entries already confirmed or conflicted at least as deeply.
    fn mark_conflicted(
        &mut self,
        height: i32,
        block_hash: Hash256,
        root: Hash256,
        batch: &mut WriteBatch,
    ) {
        let conflict_depth = -self.tip_height().map_or(1, |tip| (tip - height + 1).max(1));
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(txid) = queue.pop_front() {
            if !seen.insert(txid) {
                continue;
            }
            let Some(wtx) = self.ledger.get(&txid) else {
                continue;
            };
            if wtx.is_confirmed() || conflict_depth >= self.depth(wtx) {
                continue;
            }
            if let Some(wtx) = self.ledger.get_mut(&txid) {
                wtx.confirmation = Confirmation::conflicted(height, block_hash);
            }
            self.ledger.mark_dirty_around(&txid);
            if let Some(wtx) = self.ledger.get(&txid) {
                self.put_tx(batch, wtx);
            }
            self.emit(WalletEvent::TransactionChanged {
                txid,
                change: ChangeType::Updated,
            });
            queue.extend(self.ledger.children(&txid));
        }
    }

    pub(crate) fn transaction_added_to_mempool(&mut self, tx: Arc<Transaction>) {
        let mut batch = WriteBatch::new();
        let changed = self.sync_transaction(&tx, Confirmation::unconfirmed(), &mut batch);
        self.write_or_log(&batch, "mempool transaction");
        if let Some(wtx) = self.ledger.get_mut(&tx.txid()) {
            wtx.in_mempool = true;
        }
        if changed {
            self.emit(WalletEvent::BalanceChanged);
        }
    }

    pub(crate) fn transaction_removed_from_mempool(
        &mut self,
        tx: &Transaction,
        reason: RemovalReason,
    ) {
        let txid = tx.txid();
        if let Some(wtx) = self.ledger.get_mut(&txid) {
            wtx.in_mempool = false;
            yupost_log::log_debug!(
                "wallet tx {} left the mempool ({reason:?})",
                yupost_primitives::hex::hash256_to_hex(&txid)
            );
            self.ledger.mark_dirty_around(&txid);
            self.emit(WalletEvent::BalanceChanged);
        }
    }

    /// Applies every transaction of `block` as confirmed without moving the tip.
    pub(crate) fn sync_block(&mut self, block: &Block, height: i32, batch: &mut WriteBatch) -> bool {
        let block_hash = block.hash();
        let mut changed = false;
        let mut delegation_seen = false;
        for (index, tx) in block.transactions.iter().enumerate() {
            let tx = Arc::new(tx.clone());
            let confirmation = Confirmation::confirmed(height, block_hash, index as i32);
            changed |= self.sync_transaction(&tx, confirmation, batch);
            if let Some(wtx) = self.ledger.get_mut(&tx.txid()) {
                wtx.in_mempool = false;
            }
            delegation_seen |= self.apply_delegation_outputs(&tx, height, batch);
        }
        if delegation_seen {
            self.delegation_cache.invalidate_all();
        }
        changed
    }

    pub(crate) fn block_connected(&mut self, block: &Block, height: i32) {
        self.tip = Some((height, block.hash()));
        let mut batch = WriteBatch::new();
        self.sync_block(block, height, &mut batch);
        self.write_or_log(&batch, "connected block transactions");
        // Depth moved for every entry.
        self.ledger.mark_all_dirty();
        self.emit(WalletEvent::BalanceChanged);
    }

    /// Reverts confirmations at or above `height`. Conflicted entries keep their status.
    pub(crate) fn block_disconnected(&mut self, block: &Block, height: i32) {
        self.tip = if height > 0 {
            Some((height - 1, block.header.prev_block))
        } else {
            None
        };
        let reverted: Vec<Hash256> = self
            .ledger
            .iter()
            .filter(|wtx| wtx.is_confirmed() && wtx.confirmation.block_height >= height)
            .map(|wtx| wtx.txid)
            .collect();
        let mut batch = WriteBatch::new();
        for txid in reverted {
            if let Some(wtx) = self.ledger.get_mut(&txid) {
                wtx.confirmation = Confirmation::unconfirmed();
            }
            if let Some(wtx) = self.ledger.get(&txid) {
                self.put_tx(&mut batch, wtx);
            }
            self.emit(WalletEvent::TransactionChanged {
                txid,
                change: ChangeType::Updated,
            });
        }
        let mut delegation_seen = false;
        for tx in &block.transactions {
            delegation_seen |= self.revert_delegation_outputs(tx, &mut batch);
        }
        if delegation_seen {
            self.delegation_cache.invalidate_all();
        }
        self.write_or_log(&batch, "disconnected block transactions");
        self.ledger.mark_all_dirty();
        self.emit(WalletEvent::BalanceChanged);
    }

    /// Marks an unconfirmed transaction outside the mempool, and its unconfirmed
    /// descendants, abandoned so their inputs become spendable again.
    pub fn abandon_transaction(&mut self, txid: &Hash256) -> Result<(), WalletError> {
        let wtx = self.ledger.get(txid).ok_or(WalletError::TransactionNotFound)?;
        if !wtx.is_unconfirmed() || wtx.in_mempool {
            return Err(WalletError::CannotAbandon(
                "transaction is confirmed, conflicted or in the mempool",
            ));
        }
        let descendants = self.ledger.descendants(*txid);
        if descendants
            .iter()
            .skip(1)
            .filter_map(|id| self.ledger.get(id))
            .any(|child| child.in_mempool)
        {
            return Err(WalletError::CannotAbandon("a descendant is in the mempool"));
        }

        let mut targets = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([*txid]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            let Some(wtx) = self.ledger.get(&current) else {
                continue;
            };
            if !wtx.is_unconfirmed() {
                continue;
            }
            targets.push(current);
            queue.extend(self.ledger.children(&current));
        }

        let mut batch = WriteBatch::new();
        for target in &targets {
            if let Some(wtx) = self.ledger.get(target) {
                let mut updated = wtx.clone();
                updated.confirmation = Confirmation::abandoned();
                self.put_tx(&mut batch, &updated);
            }
        }
        self.write(&batch)?;

        for target in targets {
            if let Some(wtx) = self.ledger.get_mut(&target) {
                wtx.confirmation = Confirmation::abandoned();
            }
            self.ledger.mark_dirty_around(&target);
            self.emit(WalletEvent::TransactionChanged {
                txid: target,
                change: ChangeType::Updated,
            });
        }
        self.emit(WalletEvent::BalanceChanged);
        Ok(())
    }

    fn delegation_payloads(tx: &Transaction) -> Vec<DelegationPayload> {
        tx.vout
            .iter()
            .filter_map(|out| DelegationPayload::from_script_pubkey(&out.script_pubkey))
            .collect()
    }

    /// Tracks our delegation records against a confirmed delegation transaction. Returns
    /// whether `tx` carried any delegation payload.
    fn apply_delegation_outputs(
        &mut self,
        tx: &Transaction,
        height: i32,
        batch: &mut WriteBatch,
    ) -> bool {
        let payloads = Self::delegation_payloads(tx);
        if payloads.is_empty() {
            return false;
        }
        let Some(delegator) = crate::stake::delegation_sender(tx, |prevout| {
            self.ledger
                .get(&prevout.hash)
                .and_then(|wtx| wtx.tx.vout.get(prevout.index as usize).cloned())
        }) else {
            return true;
        };
        if self.is_mine_script(&Destination::PubKeyHash(delegator).script_pubkey()) != IsMine::Spendable {
            return true;
        }
        let txid = tx.txid();
        for payload in payloads {
            match payload {
                DelegationPayload::Add { staker, fee, .. } => {
                    let mut record = self
                        .delegations
                        .values()
                        .find(|record| {
                            record.delegate_address == delegator && record.staker_address == staker
                        })
                        .cloned()
                        .unwrap_or_else(|| {
                            let mut record = DelegationRecord::new(delegator, staker, "", fee);
                            record.create_time = unix_time();
                            record
                        });
                    record.fee = fee;
                    record.block_number = i64::from(height);
                    record.create_tx_hash = txid;
                    self.store_delegation(record, batch);
                }
                DelegationPayload::Remove { staker } => {
                    let removed: Vec<DelegationRecord> = self
                        .delegations
                        .values()
                        .filter(|record| {
                            record.delegate_address == delegator && record.staker_address == staker
                        })
                        .cloned()
                        .collect();
                    for mut record in removed {
                        let id = record.id();
                        batch.delete(yupost_storage::Column::Delegation, id);
                        self.delegations.remove(&id);
                        self.emit(WalletEvent::DelegationChanged {
                            id,
                            change: ChangeType::Deleted,
                        });
                        record.remove_tx_hash = txid;
                        self.removed_delegations.entry(txid).or_default().push(record);
                    }
                }
            }
        }
        true
    }

    fn revert_delegation_outputs(&mut self, tx: &Transaction, batch: &mut WriteBatch) -> bool {
        if Self::delegation_payloads(tx).is_empty() {
            return false;
        }
        let txid = tx.txid();
        let created: Vec<DelegationRecord> = self
            .delegations
            .values()
            .filter(|record| record.create_tx_hash == txid)
            .cloned()
            .collect();
        for mut record in created {
            record.block_number = -1;
            self.store_delegation(record, batch);
        }
        if let Some(restored) = self.removed_delegations.remove(&txid) {
            for mut record in restored {
                record.remove_tx_hash = [0u8; 32];
                self.store_delegation(record, batch);
            }
        }
        true
    }

    fn store_delegation(&mut self, record: DelegationRecord, batch: &mut WriteBatch) {
        let id = record.id();
        batch.put(yupost_storage::Column::Delegation, id, record.encode());
        let change = match self.delegations.insert(id, record) {
            Some(_) => ChangeType::Updated,
            None => ChangeType::New,
        };
        self.emit(WalletEvent::DelegationChanged { id, change });
    }
}
