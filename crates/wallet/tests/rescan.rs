mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{regtest_config, Fixture};
use yupost_consensus::Hash256;
use yupost_storage::memory::MemoryStore;
use yupost_wallet::chain::memory::MemoryChain;
use yupost_wallet::{KeyStore, ScanStatus, TxStatus, WalletError, WalletEvent};

/// Builds a chain of `blocks` blocks where every third one pays the returned key, without
/// telling any wallet about it.
fn history(blocks: i32) -> (Arc<MemoryChain>, Arc<KeyStore>, Vec<Hash256>) {
    let builder = Fixture::new();
    let keys = Arc::new(KeyStore::new());
    let mine = keys.generate_key().expect("key");
    let mut paid = Vec::new();
    for height in 0..blocks {
        if height % 3 == 1 {
            let tx = builder.external_payment(&[(mine, 10_000 + i64::from(height))]);
            paid.push(tx.txid());
            builder.chain.connect_block(vec![tx]);
        } else {
            builder.chain.connect_block(Vec::new());
        }
    }
    (Arc::clone(&builder.chain), keys, paid)
}

fn fresh_wallet(chain: &Arc<MemoryChain>, keys: &Arc<KeyStore>) -> Fixture {
    Fixture::build_with_keys(
        Arc::clone(chain),
        Arc::new(MemoryStore::new()),
        Arc::clone(keys),
        regtest_config(),
    )
}

fn statuses(fx: &Fixture) -> BTreeMap<Hash256, (TxStatus, i32)> {
    fx.wallet
        .lock()
        .ledger()
        .iter()
        .map(|wtx| (wtx.txid, (wtx.status(), wtx.confirmation.block_height)))
        .collect()
}

#[test]
fn rescan_finds_history_without_moving_tip() {
    let (chain, keys, paid) = history(20);
    let fx = fresh_wallet(&chain, &keys);
    assert!(fx.wallet.lock().ledger().is_empty());
    assert_eq!(fx.wallet.lock().tip_height(), Some(19));

    let events = fx.wallet.subscribe();
    let result = fx.wallet.rescan_from_height(0).expect("rescan");
    assert_eq!(result.status, ScanStatus::Success);
    assert_eq!(result.last_scanned_height, Some(19));
    assert_eq!(result.last_scanned_block, chain.block_at(19).map(|b| b.hash()));
    assert_eq!(result.last_failed_block, None);

    let found = statuses(&fx);
    assert_eq!(found.len(), paid.len());
    for txid in &paid {
        assert_eq!(found[txid].0, TxStatus::Confirmed);
    }
    assert_eq!(fx.wallet.lock().tip_height(), Some(19));
    assert!(!fx.wallet.is_scanning());

    let progress: Vec<u8> = events
        .try_iter()
        .filter_map(|event| match event {
            WalletEvent::ShowProgress { percent, .. } => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn partial_scans_resume_to_the_same_state() {
    let (chain, keys, _) = history(30);
    let whole = fresh_wallet(&chain, &keys);
    whole.wallet.rescan_from_height(0).expect("full rescan");

    let split = fresh_wallet(&chain, &keys);
    {
        let reserver = split.wallet.reserve_rescan().expect("reserve");
        let first = split
            .wallet
            .scan_for_wallet_transactions(0, Some(12), &reserver)
            .expect("first half");
        assert_eq!(first.status, ScanStatus::Success);
        assert_eq!(first.last_scanned_height, Some(12));
    }
    let second = split.wallet.rescan_from_height(13).expect("second half");
    assert_eq!(second.last_scanned_height, Some(29));

    assert_eq!(statuses(&split), statuses(&whole));
    assert_eq!(
        split.wallet.lock().get_balance(),
        whole.wallet.lock().get_balance()
    );
}

#[test]
fn abort_stops_before_the_next_block() {
    let (chain, keys, _) = history(10);
    let fx = fresh_wallet(&chain, &keys);

    let reserver = fx.wallet.reserve_rescan().expect("reserve");
    assert!(fx.wallet.is_scanning());
    assert!(fx.wallet.scanning_duration().is_some());
    assert!(matches!(
        fx.wallet.reserve_rescan(),
        Err(WalletError::RescanInProgress)
    ));

    fx.wallet.abort_rescan();
    assert!(fx.wallet.is_abort_requested());
    let result = fx
        .wallet
        .scan_for_wallet_transactions(0, None, &reserver)
        .expect("scan");
    assert_eq!(result.status, ScanStatus::UserAbort);
    assert_eq!(result.last_scanned_height, None);
    assert!(fx.wallet.lock().ledger().is_empty());

    drop(reserver);
    assert!(!fx.wallet.is_scanning());
    assert!(!fx.wallet.is_abort_requested());
    assert_eq!(fx.wallet.scanning_progress(), 0.0);

    // Abort requests outside a scan are ignored.
    fx.wallet.abort_rescan();
    assert!(!fx.wallet.is_abort_requested());
    let result = fx.wallet.rescan_from_height(0).expect("rescan");
    assert_eq!(result.status, ScanStatus::Success);
}

#[test]
fn abort_mid_scan_reports_the_last_block_applied() {
    let (chain, keys, paid) = history(30);
    let whole = fresh_wallet(&chain, &keys);
    whole.wallet.rescan_from_height(0).expect("full rescan");

    let fx = fresh_wallet(&chain, &keys);
    let wallet = Arc::downgrade(&fx.wallet);
    chain.set_read_hook(Some(Arc::new(move |height: i32| {
        if height == 7 {
            if let Some(wallet) = wallet.upgrade() {
                wallet.abort_rescan();
            }
        }
    })));
    let result = fx.wallet.rescan_from_height(0).expect("rescan");
    chain.set_read_hook(None);
    assert_eq!(result.status, ScanStatus::UserAbort);
    assert_eq!(result.last_scanned_height, Some(7));
    assert_eq!(result.last_scanned_block, chain.block_at(7).map(|b| b.hash()));
    // Payments at heights 1, 4 and 7 were applied before the abort.
    assert_eq!(fx.wallet.lock().ledger().len(), 3);
    assert!(!fx.wallet.is_scanning());

    let resumed = fx.wallet.rescan_from_height(8).expect("resume");
    assert_eq!(resumed.status, ScanStatus::Success);
    assert_eq!(resumed.last_scanned_height, Some(29));
    assert_eq!(fx.wallet.lock().ledger().len(), paid.len());
    assert_eq!(statuses(&fx), statuses(&whole));
    assert_eq!(
        fx.wallet.lock().get_balance(),
        whole.wallet.lock().get_balance()
    );
}

#[test]
fn reorg_below_the_scan_is_a_failure() {
    let (chain, keys, _) = history(12);
    let fx = fresh_wallet(&chain, &keys);
    let reorged = Arc::downgrade(&chain);
    chain.set_read_hook(Some(Arc::new(move |height: i32| {
        if height != 5 {
            return;
        }
        if let Some(chain) = reorged.upgrade() {
            while chain.height() > 6 {
                chain.disconnect_tip();
            }
        }
    })));

    let result = fx.wallet.rescan_from_height(0).expect("rescan");
    chain.set_read_hook(None);
    assert_eq!(result.status, ScanStatus::Failure);
    assert_eq!(result.last_scanned_height, Some(6));
    assert_eq!(result.last_scanned_block, chain.block_at(6).map(|b| b.hash()));
    assert_eq!(result.last_failed_block, None);
    assert_eq!(fx.wallet.lock().ledger().len(), 2);
}

#[test]
fn unreadable_block_halts_and_keeps_progress() {
    let (chain, keys, paid) = history(12);
    let fx = fresh_wallet(&chain, &keys);
    let broken = chain.block_at(5).expect("block").hash();
    chain.set_unreadable(broken, true);

    let result = fx.wallet.rescan_from_height(0).expect("rescan");
    assert_eq!(result.status, ScanStatus::Failure);
    assert_eq!(result.last_failed_block, Some(broken));
    assert_eq!(result.last_scanned_height, Some(4));
    // Payments at heights 1 and 4 were applied before the failure.
    assert_eq!(fx.wallet.lock().ledger().len(), 2);

    chain.set_unreadable(broken, false);
    let result = fx.wallet.rescan_from_height(5).expect("resume");
    assert_eq!(result.status, ScanStatus::Success);
    assert_eq!(fx.wallet.lock().ledger().len(), paid.len());
}

#[test]
fn empty_range_is_a_successful_no_op() {
    let (chain, keys, _) = history(4);
    let fx = fresh_wallet(&chain, &keys);
    let result = fx.wallet.rescan_from_height(10).expect("rescan");
    assert_eq!(result.status, ScanStatus::Success);
    assert_eq!(result.last_scanned_block, None);
}
