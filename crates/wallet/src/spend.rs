//! Funding, signing and committing new transactions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use yupost_consensus::constants::{
    CURRENT_TX_VERSION, MAX_BIP125_RBF_SEQUENCE, MAX_DELEGATION_FEE, MAX_STANDARD_TX_SIZE,
    SEQUENCE_FINAL,
};
use yupost_consensus::money::{money_range, Amount};
use yupost_consensus::{Hash160, Hash256};
use yupost_primitives::hex::hash256_to_hex;
use yupost_primitives::{Destination, Transaction, TxIn, TxOut};
use yupost_script::delegation::DelegationPayload;
use yupost_script::standard::{estimate_signed_input_size, TX_OVERHEAD_SIZE};
use yupost_storage::WriteBatch;

use crate::address_book::PURPOSE_SEND;
use crate::coin_control::{CoinControl, SpendableOutput, MAP_REPLACED_BY_TXID, MAP_REPLACES_TXID};
use crate::coin_selection::{
    group_outputs, select_coins_min_conf, EligibilityFilter, InputCoin, Selection,
    SelectionParams, MIN_FINAL_CHANGE,
};
use crate::error::WalletError;
use crate::events::{ChangeType, WalletEvent};
use crate::fees::{dust_threshold, is_dust, FeeRate, DUST_RELAY_FEE, MIN_RELAY_TX_FEE};
use crate::records::DelegationRecord;
use crate::signing::{IsMine, SigningError};
use crate::tx::Confirmation;
use crate::wallet::{Wallet, WalletGuard};

/// Mempool ancestor limit the confirmation cascade scales against.
const MAX_ANCESTORS: usize = 25;
/// Confirmation target used for the long-term and discard fee estimates.
const LONG_TERM_TARGET: u32 = 1_008;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    pub script_pubkey: Vec<u8>,
    pub amount: Amount,
    pub subtract_fee_from_amount: bool,
}

/// A payment request as entered by a user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendRecipient {
    pub address: String,
    pub label: String,
    pub amount: Amount,
    pub subtract_fee_from_amount: bool,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedTransaction {
    pub tx: Transaction,
    pub fee: Amount,
    pub change_position: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedTransaction {
    pub tx: Transaction,
    pub fee: Amount,
    pub change_position: Option<usize>,
    pub total_amount: Amount,
    pub recipients: Vec<SendRecipient>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BumpResult {
    pub old_fee: Amount,
    pub new_fee: Amount,
    /// The unsigned replacement.
    pub tx: Transaction,
}

fn estimated_size(tx: &Transaction, input_bytes: usize) -> usize {
    TX_OVERHEAD_SIZE
        + input_bytes
        + tx.vout.iter().map(TxOut::serialized_size).sum::<usize>()
}

fn cascade(spend_zero_conf_change: bool) -> Vec<EligibilityFilter> {
    let mut filters = vec![EligibilityFilter::new(1, 6, 0), EligibilityFilter::new(1, 1, 0)];
    if spend_zero_conf_change {
        filters.extend([
            EligibilityFilter::new(0, 1, 2),
            EligibilityFilter::new(0, 1, 4usize.min(MAX_ANCESTORS / 3)),
            EligibilityFilter::new(0, 1, MAX_ANCESTORS / 2),
            EligibilityFilter::new(0, 1, MAX_ANCESTORS - 1),
            EligibilityFilter::new(0, 1, usize::MAX),
        ]);
    }
    filters
}

impl WalletGuard<'_> {
    fn estimate_fee_rate(&self, target: u32) -> Option<FeeRate> {
        match self.wallet().chain().estimate_fee(target) {
            Ok(rate) => rate.filter(|rate| !rate.is_zero()),
            Err(err) => {
                yupost_log::log_warn!("fee estimate for target {target} unavailable: {err}");
                None
            }
        }
    }

    /// Floor every wallet fee respects.
    pub fn required_fee_rate(&self) -> FeeRate {
        self.wallet().config().min_tx_fee.max(MIN_RELAY_TX_FEE)
    }

    /// Explicit rate, then `paytxfee`, then the node's estimate or the fallback, never below
    /// the required rate.
    pub fn minimum_fee_rate(&self, coin_control: &CoinControl) -> FeeRate {
        let config = self.wallet().config();
        let rate = if let Some(rate) = coin_control.fee_rate {
            rate
        } else if coin_control.confirm_target.is_none() && !config.pay_tx_fee.is_zero() {
            config.pay_tx_fee
        } else {
            let target = coin_control
                .confirm_target
                .unwrap_or(config.tx_confirm_target);
            self.estimate_fee_rate(target)
                .unwrap_or(config.fallback_fee)
        };
        rate.max(self.required_fee_rate())
    }

    /// Rate below which change is not worth creating.
    pub fn discard_rate(&self) -> FeeRate {
        let configured = self.wallet().config().discard_fee;
        let rate = match self.estimate_fee_rate(LONG_TERM_TARGET) {
            Some(estimate) => estimate.min(configured),
            None => configured,
        };
        rate.max(DUST_RELAY_FEE)
    }

    fn long_term_fee_rate(&self) -> FeeRate {
        let control = CoinControl {
            confirm_target: Some(LONG_TERM_TARGET),
            ..CoinControl::default()
        };
        self.minimum_fee_rate(&control)
    }

    /// Coin selection over `available`, preset inputs first, walking the confirmation
    /// cascade until a filter yields a solution.
    fn select_coins(
        &self,
        available: &[SpendableOutput],
        target: Amount,
        coin_control: &CoinControl,
        params: &SelectionParams,
        rng: &mut impl Rng,
    ) -> Option<Selection> {
        if coin_control.has_selected() && !coin_control.allow_other_inputs {
            let coins: Vec<InputCoin> = available
                .iter()
                .filter(|output| output.spendable)
                .filter_map(|output| {
                    Some(InputCoin::new(
                        output.outpoint,
                        output.txout.clone(),
                        output.input_bytes?,
                    ))
                })
                .collect();
            let value: Amount = coins.iter().map(InputCoin::value).sum();
            return (value >= target).then_some(Selection {
                coins,
                value,
                bnb_used: false,
            });
        }

        let mut preset = Vec::new();
        let mut preset_value: Amount = 0;
        let mut preset_effective: Amount = 0;
        for outpoint in coin_control.selected() {
            let txout = self
                .ledger
                .get(&outpoint.hash)?
                .tx
                .vout
                .get(outpoint.index as usize)?
                .clone();
            let input_bytes = estimate_signed_input_size(&txout.script_pubkey)?;
            let coin = InputCoin::new(*outpoint, txout, input_bytes);
            preset_value += coin.value();
            preset_effective += coin.value() - params.effective_fee.fee(input_bytes);
            preset.push(coin);
        }
        let remaining: Vec<SpendableOutput> = available
            .iter()
            .filter(|output| !coin_control.is_selected(&output.outpoint))
            .cloned()
            .collect();

        let avoid_partial_spends = coin_control
            .avoid_partial_spends
            .unwrap_or(self.wallet().config().avoid_partial_spends);
        let groups = group_outputs(&remaining, !avoid_partial_spends);
        let value_to_select = target
            - if params.use_bnb {
                preset_effective
            } else {
                preset_value
            };

        let mut selection = if value_to_select <= 0 {
            Selection {
                coins: Vec::new(),
                value: 0,
                bnb_used: false,
            }
        } else {
            cascade(self.wallet().config().spend_zero_conf_change)
                .iter()
                .find_map(|filter| {
                    select_coins_min_conf(value_to_select, filter, &groups, params, rng)
                })?
        };
        selection.value += preset_value;
        selection.coins.extend(preset);
        Some(selection)
    }

    /// Funds `recipients` from the wallet's coins. Change goes to a random position unless
    /// `coin_control` fixes it, and is dropped when it would be dust at the discard rate.
    pub fn create_transaction(
        &self,
        recipients: &[Recipient],
        coin_control: &CoinControl,
        sign: bool,
    ) -> Result<CreatedTransaction, WalletError> {
        if recipients.is_empty() {
            return Err(WalletError::CreationFailed(
                "transaction must have at least one recipient",
            ));
        }
        let value = recipients
            .iter()
            .try_fold(0 as Amount, |total, recipient| {
                if !money_range(recipient.amount) {
                    return None;
                }
                total.checked_add(recipient.amount).filter(|sum| money_range(*sum))
            })
            .ok_or(WalletError::InvalidAmount)?;
        let subtract_count = recipients
            .iter()
            .filter(|recipient| recipient.subtract_fee_from_amount)
            .count() as Amount;

        let mut rng = rand::thread_rng();
        let available = self.available_coins(Some(coin_control), true);
        let available_value: Amount = available
            .iter()
            .filter(|coin| coin.spendable)
            .map(|coin| coin.txout.value)
            .sum();
        if available_value == 0 && !coin_control.has_selected() {
            return Err(WalletError::NoEligibleCoins);
        }

        let change_script = match coin_control.change_destination {
            Some(destination) => destination.script_pubkey(),
            None => self
                .wallet()
                .signer()
                .new_change_destination()?
                .script_pubkey(),
        };
        let change_prototype = TxOut::new(0, change_script.clone());
        let discard_rate = self.discard_rate();
        let effective_fee = self.minimum_fee_rate(coin_control);
        let change_spend_size = estimate_signed_input_size(&change_script);
        let mut params = SelectionParams {
            use_bnb: subtract_count == 0 && change_spend_size.is_some(),
            change_output_size: change_prototype.serialized_size(),
            change_spend_size: change_spend_size.unwrap_or(0),
            effective_fee,
            long_term_fee: self.long_term_fee_rate(),
            discard_fee: discard_rate,
            tx_noinputs_size: 0,
        };

        let mut fee: Amount = 0;
        let mut pick_new_inputs = true;
        let mut selection = Selection {
            coins: Vec::new(),
            value: 0,
            bnb_used: false,
        };
        let mut tx;
        let mut change_position;
        loop {
            tx = Transaction::new(CURRENT_TX_VERSION);
            change_position = coin_control.change_position;
            let mut value_to_select = value;
            if subtract_count == 0 {
                value_to_select += fee;
            }

            params.tx_noinputs_size = TX_OVERHEAD_SIZE;
            let mut first = true;
            for recipient in recipients {
                let mut txout = TxOut::new(recipient.amount, recipient.script_pubkey.clone());
                if recipient.subtract_fee_from_amount {
                    txout.value -= fee / subtract_count;
                    if first {
                        first = false;
                        txout.value -= fee % subtract_count;
                    }
                }
                params.tx_noinputs_size += txout.serialized_size();
                if is_dust(&txout, DUST_RELAY_FEE) {
                    return Err(WalletError::AmountTooSmall(
                        if recipient.subtract_fee_from_amount && fee > 0 {
                            if txout.value < 0 {
                                "the transaction amount is too small to pay the fee"
                            } else {
                                "the transaction amount is too small to send after the fee has been deducted"
                            }
                        } else {
                            "transaction amount too small"
                        },
                    ));
                }
                tx.vout.push(txout);
            }

            let mut bnb_used = false;
            if pick_new_inputs {
                match self.select_coins(&available, value_to_select, coin_control, &params, &mut rng)
                {
                    Some(found) => {
                        bnb_used = found.bnb_used;
                        selection = found;
                    }
                    None if params.use_bnb => {
                        params.use_bnb = false;
                        continue;
                    }
                    None => {
                        return Err(WalletError::InsufficientFunds {
                            required: value_to_select,
                            available: available_value,
                        })
                    }
                }
            }

            let change = selection.value - value_to_select;
            if change > 0 {
                let change_out = TxOut::new(change, change_script.clone());
                if bnb_used || is_dust(&change_out, discard_rate) {
                    change_position = None;
                    fee += change;
                } else {
                    let position = match change_position {
                        Some(position) if position > tx.vout.len() => {
                            return Err(WalletError::CreationFailed("change index out of range"))
                        }
                        Some(position) => position,
                        None => rng.gen_range(0..=tx.vout.len()),
                    };
                    tx.vout.insert(position, change_out);
                    change_position = Some(position);
                }
            } else {
                change_position = None;
            }

            let size = estimated_size(&tx, selection.input_bytes());
            let fee_needed = params.effective_fee.fee(size);
            if fee >= fee_needed {
                if change_position.is_none() && subtract_count == 0 && pick_new_inputs {
                    let fee_with_change =
                        params.effective_fee.fee(size + params.change_output_size + 2);
                    let minimum_change = dust_threshold(&change_prototype, discard_rate);
                    if fee >= fee_with_change + minimum_change {
                        pick_new_inputs = false;
                        fee = fee_with_change;
                        continue;
                    }
                }
                if let Some(position) = change_position {
                    if fee > fee_needed && subtract_count == 0 {
                        tx.vout[position].value += fee - fee_needed;
                        fee = fee_needed;
                    }
                }
                break;
            } else if !pick_new_inputs {
                return Err(WalletError::CreationFailed(
                    "transaction fee and change calculation failed",
                ));
            }

            if let Some(position) = change_position {
                if subtract_count == 0 {
                    let additional = fee_needed - fee;
                    if tx.vout[position].value >= MIN_FINAL_CHANGE + additional {
                        tx.vout[position].value -= additional;
                        fee += additional;
                        break;
                    }
                }
            }
            if subtract_count > 0 {
                pick_new_inputs = false;
            }
            fee = fee_needed;
            params.use_bnb = false;
        }

        let signal_rbf = coin_control
            .signal_rbf
            .unwrap_or(self.wallet().config().signal_rbf);
        let sequence = if signal_rbf {
            MAX_BIP125_RBF_SEQUENCE
        } else {
            SEQUENCE_FINAL - 1
        };
        let mut coins = selection.coins;
        coins.shuffle(&mut rng);
        tx.vin = coins
            .iter()
            .map(|coin| TxIn::new(coin.outpoint, sequence))
            .collect();

        if sign {
            self.sign_transaction(&mut tx)?;
        }
        if estimated_size(&tx, coins.iter().map(|coin| coin.input_bytes).sum())
            > MAX_STANDARD_TX_SIZE
        {
            return Err(WalletError::CreationFailed("transaction too large"));
        }
        let max_fee = self.wallet().config().max_tx_fee;
        if fee > max_fee {
            return Err(WalletError::AbsurdFee { fee, max_fee });
        }
        yupost_log::log_debug!(
            "created transaction with {} inputs, {} outputs, fee {fee} at {}",
            tx.vin.len(),
            tx.vout.len(),
            params.effective_fee
        );
        Ok(CreatedTransaction {
            tx,
            fee,
            change_position,
        })
    }

    /// Fills every input's scriptSig from the signing provider.
    pub fn sign_transaction(&self, tx: &mut Transaction) -> Result<(), WalletError> {
        let mut signatures = Vec::with_capacity(tx.vin.len());
        for (index, input) in tx.vin.iter().enumerate() {
            let prevout = self
                .ledger
                .get(&input.prevout.hash)
                .and_then(|wtx| wtx.tx.vout.get(input.prevout.index as usize))
                .ok_or(WalletError::InvalidData("input not found in wallet"))?;
            let signature = self
                .wallet()
                .signer()
                .sign_input(tx, index, &prevout.script_pubkey, prevout.value)?
                .ok_or(WalletError::Signing(SigningError::MissingKey))?;
            signatures.push(signature);
        }
        for (input, signature) in tx.vin.iter_mut().zip(signatures) {
            input.script_sig = signature;
        }
        Ok(())
    }

    /// Validates user recipients and builds a signed transaction paying them. An empty
    /// recipient list is not an error and yields `None`.
    pub fn prepare_transaction(
        &self,
        recipients: &[SendRecipient],
        coin_control: &CoinControl,
    ) -> Result<Option<PreparedTransaction>, WalletError> {
        if recipients.is_empty() {
            return Ok(None);
        }
        let params = self.wallet().params();
        let mut addresses = BTreeSet::new();
        let mut outputs = Vec::with_capacity(recipients.len());
        let mut total: Amount = 0;
        let mut subtract_fee = false;
        for recipient in recipients {
            let destination = Destination::decode(&recipient.address, params)
                .map_err(|_| WalletError::InvalidAddress(recipient.address.clone()))?;
            if recipient.amount <= 0 || !money_range(recipient.amount) {
                return Err(WalletError::InvalidAmount);
            }
            subtract_fee |= recipient.subtract_fee_from_amount;
            addresses.insert(recipient.address.as_str());
            total = total
                .checked_add(recipient.amount)
                .filter(|sum| money_range(*sum))
                .ok_or(WalletError::InvalidAmount)?;
            outputs.push(Recipient {
                script_pubkey: destination.script_pubkey(),
                amount: recipient.amount,
                subtract_fee_from_amount: recipient.subtract_fee_from_amount,
            });
        }
        if addresses.len() != recipients.len() {
            let mut seen = BTreeSet::new();
            let duplicate = recipients
                .iter()
                .find(|recipient| !seen.insert(recipient.address.as_str()))
                .map(|recipient| recipient.address.clone())
                .unwrap_or_default();
            return Err(WalletError::DuplicateRecipient(duplicate));
        }

        let balance = self.available_balance(Some(coin_control));
        if total > balance {
            return Err(WalletError::AmountExceedsBalance {
                amount: total,
                balance,
            });
        }

        let created = match self.create_transaction(&outputs, coin_control, true) {
            Ok(created) => created,
            Err(WalletError::InsufficientFunds { required, .. })
                if !subtract_fee && required > balance =>
            {
                return Err(WalletError::AmountWithFeeExceedsBalance { required, balance });
            }
            Err(err) => return Err(err),
        };
        Ok(Some(PreparedTransaction {
            tx: created.tx,
            fee: created.fee,
            change_position: created.change_position,
            total_amount: total,
            recipients: recipients.to_vec(),
        }))
    }

    /// Builds an unsigned replacement for `txid` that pays a higher fee out of its change.
    pub fn create_bump_transaction(
        &self,
        txid: &Hash256,
        coin_control: &CoinControl,
    ) -> Result<BumpResult, WalletError> {
        let wtx = self.ledger.get(txid).ok_or(WalletError::TransactionNotFound)?;
        if self.ledger.descendants(*txid).len() > 1 {
            return Err(WalletError::CannotBump("transaction has descendants in the wallet"));
        }
        if !wtx.is_unconfirmed() {
            return Err(WalletError::CannotBump(
                "transaction has been mined, or is conflicted with a mined transaction",
            ));
        }
        if !wtx.tx.signals_rbf() {
            return Err(WalletError::CannotBump("transaction is not BIP 125 replaceable"));
        }
        if wtx.map_value.contains_key(MAP_REPLACED_BY_TXID) {
            return Err(WalletError::CannotBump("transaction has already been bumped"));
        }
        let mut input_bytes = 0;
        for input in &wtx.tx.vin {
            if self.is_mine_outpoint(&input.prevout) != IsMine::Spendable {
                return Err(WalletError::CannotBump(
                    "transaction contains inputs that don't belong to this wallet",
                ));
            }
            let script = self
                .ledger
                .get(&input.prevout.hash)
                .and_then(|parent| parent.tx.vout.get(input.prevout.index as usize))
                .map(|out| out.script_pubkey.clone())
                .unwrap_or_default();
            input_bytes += estimate_signed_input_size(&script).ok_or(WalletError::CannotBump(
                "transaction has an input that cannot be size-estimated",
            ))?;
        }
        let value_out = wtx
            .tx
            .value_out()
            .ok_or(WalletError::InvalidData("transaction output value out of range"))?;
        let old_fee = self.debit(wtx, IsMine::Spendable) - value_out;
        let change_index = wtx
            .tx
            .vout
            .iter()
            .position(|out| self.is_change(out))
            .ok_or(WalletError::CannotBump("transaction does not have a change output"))?;

        let size = estimated_size(&wtx.tx, input_bytes).max(wtx.tx.serialized_size());
        let config = self.wallet().config();
        let min_bump = old_fee + config.incremental_relay_fee.fee(size);
        let new_fee = min_bump.max(self.minimum_fee_rate(coin_control).fee(size));
        let delta = new_fee - old_fee;
        let mut tx = Transaction::clone(&wtx.tx);
        let change = &mut tx.vout[change_index];
        if change.value < delta {
            return Err(WalletError::CannotBump("change output is too small to bump the fee"));
        }
        change.value -= delta;
        let mut new_fee = new_fee;
        if is_dust(change, self.discard_rate()) {
            new_fee += change.value;
            tx.vout.remove(change_index);
        }
        if new_fee > config.max_tx_fee {
            return Err(WalletError::AbsurdFee {
                fee: new_fee,
                max_fee: config.max_tx_fee,
            });
        }
        for input in &mut tx.vin {
            input.script_sig.clear();
        }
        Ok(BumpResult {
            old_fee,
            new_fee,
            tx,
        })
    }

    /// An unsigned transaction carrying a delegation payload, funded only from
    /// `delegator` so that its first input identifies the delegating address.
    fn delegation_transaction(
        &self,
        delegator: &Destination,
        payload: DelegationPayload,
    ) -> Result<CreatedTransaction, WalletError> {
        let mut coin_control = CoinControl {
            change_destination: Some(*delegator),
            ..CoinControl::default()
        };
        for coin in self.available_coins(None, true) {
            if coin.spendable && coin.destination().as_ref() == Some(delegator) {
                coin_control.select(coin.outpoint);
            }
        }
        if !coin_control.has_selected() {
            return Err(WalletError::NoEligibleCoins);
        }
        let recipients = [Recipient {
            script_pubkey: payload.script_pubkey(),
            amount: 0,
            subtract_fee_from_amount: false,
        }];
        self.create_transaction(&recipients, &coin_control, true)
    }

    pub fn create_delegation_transaction(
        &self,
        delegator: &Destination,
        staker: &Hash160,
        fee: u8,
    ) -> Result<CreatedTransaction, WalletError> {
        let Destination::PubKeyHash(delegator_hash) = delegator else {
            return Err(WalletError::InvalidAddress(
                delegator.encode(self.wallet().params()),
            ));
        };
        if fee > MAX_DELEGATION_FEE {
            return Err(WalletError::InvalidData("delegation fee above 100%"));
        }
        let proof_of_delegation = self.wallet().signer().sign_pod(staker, delegator_hash)?;
        self.delegation_transaction(
            delegator,
            DelegationPayload::Add {
                staker: *staker,
                fee,
                proof_of_delegation,
            },
        )
    }

    pub fn create_undelegation_transaction(
        &self,
        delegator: &Destination,
        staker: &Hash160,
    ) -> Result<CreatedTransaction, WalletError> {
        self.delegation_transaction(delegator, DelegationPayload::Remove { staker: *staker })
    }

    /// Adds `tx` to the ledger as our own unconfirmed transaction with its annotations.
    fn record_commit(
        &mut self,
        tx: Arc<Transaction>,
        map_value: BTreeMap<String, String>,
        order_form: Vec<(String, String)>,
    ) -> Result<Hash256, WalletError> {
        let txid = tx.txid();
        let mut batch = WriteBatch::new();
        self.add_to_wallet(tx, Confirmation::unconfirmed(), true, &mut batch);
        if let Some(wtx) = self.ledger.get_mut(&txid) {
            wtx.map_value.extend(map_value);
            wtx.order_form = order_form;
        }
        if let Some(wtx) = self.ledger.get(&txid) {
            self.put_tx(&mut batch, wtx);
        }
        self.write(&batch)?;
        self.emit(WalletEvent::BalanceChanged);
        Ok(txid)
    }
}

impl Wallet {
    /// Records `tx` as our own unconfirmed transaction, then hands it to the node. The
    /// broadcast happens after the wallet lock is released; a refused broadcast is logged
    /// and leaves the transaction in the ledger.
    pub fn commit_transaction(
        &self,
        tx: Transaction,
        map_value: BTreeMap<String, String>,
        order_form: Vec<(String, String)>,
    ) -> Result<Hash256, WalletError> {
        let tx = Arc::new(tx);
        let txid = self
            .lock()
            .record_commit(Arc::clone(&tx), map_value, order_form)?;
        self.broadcast_committed(&tx, &txid);
        Ok(txid)
    }

    fn broadcast_committed(&self, tx: &Transaction, txid: &Hash256) {
        match self.chain().broadcast_transaction(tx) {
            Ok(()) => {
                let mut guard = self.lock();
                if let Some(wtx) = guard.ledger.get_mut(txid) {
                    if wtx.is_unconfirmed() {
                        wtx.in_mempool = true;
                    }
                }
                guard.ledger.mark_dirty_around(txid);
            }
            Err(err) => yupost_log::log_warn!(
                "transaction {} committed but not broadcast: {err}",
                hash256_to_hex(txid)
            ),
        }
    }

    /// Commits a prepared send and records each recipient in the address book.
    pub fn send_coins(&self, prepared: PreparedTransaction) -> Result<Hash256, WalletError> {
        let order_form = prepared
            .recipients
            .iter()
            .filter(|recipient| !recipient.message.is_empty())
            .map(|recipient| ("Message".to_string(), recipient.message.clone()))
            .collect();
        let txid = self.commit_transaction(prepared.tx, BTreeMap::new(), order_form)?;

        let mut guard = self.lock();
        for recipient in &prepared.recipients {
            let Ok(destination) = Destination::decode(&recipient.address, self.params()) else {
                continue;
            };
            let existing = guard
                .address_book
                .get(&destination)
                .map(|entry| entry.label_str() != recipient.label);
            match existing {
                None => guard.set_address_book(destination, &recipient.label, PURPOSE_SEND)?,
                Some(true) => guard.set_address_book(destination, &recipient.label, "")?,
                Some(false) => {}
            }
        }
        Ok(txid)
    }

    /// Signs and commits a replacement built by `create_bump_transaction`, linking the two
    /// transactions through their annotations. Only one replacement per original is ever
    /// recorded; the broadcast follows once the lock is released.
    pub fn commit_bump_transaction(
        &self,
        original: &Hash256,
        mut replacement: Transaction,
    ) -> Result<Hash256, WalletError> {
        let replacement = {
            let mut guard = self.lock();
            let wtx = guard
                .ledger
                .get(original)
                .ok_or(WalletError::TransactionNotFound)?;
            if wtx.map_value.contains_key(MAP_REPLACED_BY_TXID) {
                return Err(WalletError::CannotBump("transaction has already been bumped"));
            }
            guard.sign_transaction(&mut replacement)?;
            let replacement = Arc::new(replacement);
            let map_value =
                BTreeMap::from([(MAP_REPLACES_TXID.to_string(), hash256_to_hex(original))]);
            let new_txid = guard.record_commit(Arc::clone(&replacement), map_value, Vec::new())?;

            if let Some(wtx) = guard.ledger.get_mut(original) {
                wtx.map_value
                    .insert(MAP_REPLACED_BY_TXID.to_string(), hash256_to_hex(&new_txid));
            }
            let mut batch = WriteBatch::new();
            if let Some(wtx) = guard.ledger.get(original) {
                guard.put_tx(&mut batch, wtx);
            }
            guard.write(&batch)?;
            guard.ledger.mark_dirty_around(original);
            guard.emit(WalletEvent::TransactionChanged {
                txid: *original,
                change: ChangeType::Updated,
            });
            replacement
        };
        let new_txid = replacement.txid();
        self.broadcast_committed(&replacement, &new_txid);
        Ok(new_txid)
    }

    /// Grants `staker` the staking weight of `delegator`'s coins and tracks the record.
    pub fn delegate(
        &self,
        delegator: &Destination,
        staker: &Hash160,
        staker_name: &str,
        fee: u8,
    ) -> Result<Hash256, WalletError> {
        let created = self
            .lock()
            .create_delegation_transaction(delegator, staker, fee)?;
        let txid = self.commit_transaction(created.tx, BTreeMap::new(), Vec::new())?;
        let mut guard = self.lock();
        let mut record = guard
            .delegations
            .values()
            .find(|record| {
                Destination::PubKeyHash(record.delegate_address) == *delegator
                    && record.staker_address == *staker
            })
            .cloned()
            .unwrap_or_else(|| {
                let mut record =
                    DelegationRecord::new(*delegator.hash(), *staker, staker_name, fee);
                record.create_time = crate::wallet::unix_time();
                record
            });
        record.fee = fee;
        record.create_tx_hash = txid;
        guard.add_delegation(record)?;
        Ok(txid)
    }

    /// Revokes the delegation from `delegator` to `staker`.
    pub fn undelegate(&self, delegator: &Destination, staker: &Hash160) -> Result<Hash256, WalletError> {
        let created = self
            .lock()
            .create_undelegation_transaction(delegator, staker)?;
        let txid = self.commit_transaction(created.tx, BTreeMap::new(), Vec::new())?;
        let mut guard = self.lock();
        let pending: Vec<DelegationRecord> = guard
            .delegations
            .values()
            .filter(|record| {
                Destination::PubKeyHash(record.delegate_address) == *delegator
                    && record.staker_address == *staker
            })
            .cloned()
            .collect();
        for mut record in pending {
            record.remove_tx_hash = txid;
            guard.add_delegation(record)?;
        }
        Ok(txid)
    }
}
