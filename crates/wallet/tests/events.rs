mod common;

use std::sync::Arc;

use common::{foreign_destination, Fixture};
use yupost_primitives::{Transaction, TxIn, TxOut};
use yupost_wallet::chain::RemovalReason;
use yupost_wallet::{spawn_chain_listener, ChangeType, TxStatus, WalletEvent};

#[test]
fn subscribers_see_changes_in_application_order() {
    let fx = Fixture::new();
    let mine = fx.new_key();
    let events = fx.wallet.subscribe();

    let payment = fx.external_payment(&[(mine, 12_000)]);
    let txid = payment.txid();
    fx.submit(payment.clone());
    fx.mine(vec![payment]);
    fx.wallet
        .lock()
        .set_address_book(mine, "salary", "receive")
        .expect("label");

    let received: Vec<WalletEvent> = events.try_iter().collect();
    let tx_changes: Vec<ChangeType> = received
        .iter()
        .filter_map(|event| match event {
            WalletEvent::TransactionChanged { txid: id, change } if *id == txid => Some(*change),
            _ => None,
        })
        .collect();
    assert_eq!(tx_changes, vec![ChangeType::New, ChangeType::Updated]);
    assert!(received
        .iter()
        .any(|event| matches!(event, WalletEvent::BalanceChanged)));
    match received.last() {
        Some(WalletEvent::AddressBookChanged {
            label,
            is_mine,
            purpose,
            change,
            ..
        }) => {
            assert_eq!(label, "salary");
            assert!(*is_mine);
            assert_eq!(purpose, "receive");
            assert_eq!(*change, ChangeType::New);
        }
        other => panic!("unexpected last event {other:?}"),
    }
}

#[test]
fn dropped_subscribers_are_pruned() {
    let fx = Fixture::new();
    let kept = fx.wallet.subscribe();
    drop(fx.wallet.subscribe());
    fx.wallet
        .lock()
        .set_contract_book("abc", "name", "abi")
        .expect("contract");
    assert!(matches!(
        kept.try_recv(),
        Ok(WalletEvent::ContractBookChanged {
            change: ChangeType::New,
            ..
        })
    ));
}

#[test]
fn listener_applies_events_in_order() {
    let fx = Fixture::new();
    let mine = fx.new_key();
    let (sender, receiver) = crossbeam_channel::unbounded();
    let listener = spawn_chain_listener(Arc::clone(&fx.wallet), receiver).expect("spawn");

    let first = fx.external_payment(&[(mine, 5_000)]);
    let second = fx.external_payment(&[(mine, 6_000), (foreign_destination(2), 1_000)]);
    sender.send(fx.chain.add_to_mempool(first.clone())).expect("send");
    sender.send(fx.chain.connect_block(vec![first.clone()])).expect("send");
    sender.send(fx.chain.add_to_mempool(second.clone())).expect("send");
    sender
        .send(
            fx.chain
                .remove_from_mempool(&second.txid(), RemovalReason::Expiry)
                .expect("in mempool"),
        )
        .expect("send");
    sender.send(fx.chain.flush_event().expect("flush")).expect("send");
    drop(sender);
    listener.join().expect("listener");

    let guard = fx.wallet.lock();
    assert_eq!(guard.tip_height(), Some(0));
    assert_eq!(
        guard.ledger().get(&first.txid()).map(|wtx| wtx.status()),
        Some(TxStatus::Confirmed)
    );
    let pending = guard.ledger().get(&second.txid()).expect("second tracked");
    assert_eq!(pending.status(), TxStatus::Unconfirmed);
    assert!(!pending.in_mempool);
    assert_eq!(guard.get_balance().mine_trusted, 5_000);
    assert_eq!(guard.get_balance().mine_untrusted_pending, 0);
}

#[test]
fn refused_broadcast_is_logged_and_kept() {
    yupost_log::capture_start(64);
    let fx = Fixture::new();
    let mine = fx.new_key();
    let coin = fx.fund(&mine, 40_000);
    fx.chain.set_reject_broadcast(true);

    let mut tx = Transaction::new(2);
    tx.vin.push(TxIn::new(coin, u32::MAX - 1));
    tx.vout
        .push(TxOut::new(30_000, foreign_destination(3).script_pubkey()));
    let txid = fx
        .wallet
        .commit_transaction(tx, Default::default(), Vec::new())
        .expect("commit");
    assert_eq!(fx.status(&txid), TxStatus::Unconfirmed);
    assert!(!fx.chain.mempool_contains(&txid));

    let logs = yupost_log::capture_take();
    assert!(logs
        .iter()
        .any(|record| record.level == yupost_log::Level::Warn
            && record.msg.contains("not broadcast")));
}

#[test]
fn watch_only_import_is_announced_and_counted_apart() {
    let fx = Fixture::new();
    let watched = foreign_destination(4);
    let events = fx.wallet.subscribe();
    assert!(fx.wallet.lock().add_watch_only(&watched.script_pubkey()));
    assert!(!fx.wallet.lock().add_watch_only(&watched.script_pubkey()));
    let received: Vec<WalletEvent> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![WalletEvent::WatchOnlyChanged(true), WalletEvent::BalanceChanged]
    );

    fx.mine(vec![fx.external_payment(&[(watched, 9_000)])]);
    let balance = fx.wallet.lock().get_balance();
    assert_eq!(balance.watchonly_trusted, 9_000);
    assert_eq!(balance.mine_trusted, 0);
}
