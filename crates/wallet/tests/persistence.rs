mod common;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use common::{foreign_destination, regtest_config, Fixture};
use yupost_consensus::{chain_params, Hash256, Network};
use yupost_primitives::Destination;
use yupost_storage::fjall::FjallStore;
use yupost_storage::memory::MemoryStore;
use yupost_storage::{Column, KeyValueStore};
use yupost_wallet::chain::memory::MemoryChain;
use yupost_wallet::records::SuperStakerRecord;
use yupost_wallet::tool::{self, SuperStakerOptions, ToolArgs, ToolCommand, STORE_DIR_NAME};
use yupost_wallet::{KeyStore, TxStatus, WalletError};

fn open_fjall(dir: &Path) -> Arc<dyn KeyValueStore> {
    Arc::new(FjallStore::open(dir.join(STORE_DIR_NAME)).expect("open fjall"))
}

fn regtest_address(destination: &Destination) -> String {
    destination.encode(&chain_params(Network::Regtest))
}

fn snapshot(fx: &Fixture) -> BTreeMap<Hash256, (TxStatus, i32, i64)> {
    fx.wallet
        .lock()
        .ledger()
        .iter()
        .map(|wtx| {
            (
                wtx.txid,
                (wtx.status(), wtx.confirmation.block_height, wtx.order_pos),
            )
        })
        .collect()
}

fn tool_args(dir: &Path, watch: Vec<String>, command: ToolCommand) -> ToolArgs {
    ToolArgs {
        wallet_dir: dir.to_path_buf(),
        config: regtest_config(),
        watch,
        staker: SuperStakerOptions::default(),
        command,
    }
}

#[test]
fn fjall_wallet_reloads_and_tool_reads_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = Arc::new(MemoryChain::new());
    let keys = Arc::new(KeyStore::new());

    let (mine, address, before) = {
        let fx = Fixture::build_with_keys(
            Arc::clone(&chain),
            open_fjall(dir.path()),
            Arc::clone(&keys),
            regtest_config(),
        );
        let mine = fx.new_key();
        let staker = fx.new_key();
        fx.fund(&mine, 50_000);
        fx.mine_empty(2);
        fx.submit(fx.external_payment(&[(mine, 7_000)]));
        {
            let mut guard = fx.wallet.lock();
            guard
                .set_address_book(mine, "savings", "receive")
                .expect("label");
            guard
                .set_contract_book("c0ffee", "token", "[]")
                .expect("contract");
            guard
                .add_super_staker(SuperStakerRecord::new(*staker.hash(), "pool"))
                .expect("super staker");
        }
        let flush = fx.chain.flush_event().expect("flush event");
        fx.wallet.handle_chain_event(flush);
        (mine, fx.address(&mine), snapshot(&fx))
    };

    {
        let fx = Fixture::build_with_keys(
            Arc::clone(&chain),
            open_fjall(dir.path()),
            Arc::clone(&keys),
            regtest_config(),
        );
        assert_eq!(snapshot(&fx), before);
        let guard = fx.wallet.lock();
        assert_eq!(guard.ledger().order_pos_next(), 2);
        assert_eq!(
            guard.address_book().get(&mine).map(|entry| entry.label_str()),
            Some("savings")
        );
        assert_eq!(guard.contract_book().get("c0ffee").map(|c| c.name.as_str()), Some("token"));
        assert_eq!(guard.super_stakers().len(), 1);
        assert_eq!(guard.get_balance().mine_trusted, 50_000);
    }

    let info = tool::run(&tool_args(dir.path(), Vec::new(), ToolCommand::Info)).expect("info");
    assert_eq!(info["transactions"], 2);
    assert_eq!(info["contracts"], 1);
    assert_eq!(info["super_stakers"], 1);
    assert_eq!(info["best_block"]["height"], 2);

    let balance = tool::run(&tool_args(dir.path(), vec![address], ToolCommand::Balance))
        .expect("balance");
    assert_eq!(balance["confirmed"], 50_000);
    assert_eq!(balance["unconfirmed"], 7_000);

    let other = regtest_address(&foreign_destination(9));
    tool::run(&tool_args(
        dir.path(),
        Vec::new(),
        ToolCommand::AddSuperStaker {
            address: other.clone(),
            name: "backup".to_string(),
        },
    ))
    .expect("add super staker");
    let stakers =
        tool::run(&tool_args(dir.path(), Vec::new(), ToolCommand::SuperStakers)).expect("list");
    assert_eq!(stakers.as_array().map(Vec::len), Some(2));
    assert!(tool::run(&tool_args(
        dir.path(),
        Vec::new(),
        ToolCommand::AddSuperStaker {
            address: other.clone(),
            name: "again".to_string(),
        },
    ))
    .is_err());
    let removed = tool::run(&tool_args(
        dir.path(),
        Vec::new(),
        ToolCommand::RemoveSuperStaker { address: other },
    ))
    .expect("remove");
    assert_eq!(removed["removed"], 1);
}

#[test]
fn reload_unconfirms_transactions_in_reorged_blocks() {
    let chain = Arc::new(MemoryChain::new());
    let keys = Arc::new(KeyStore::new());
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (early, late) = {
        let fx = Fixture::build_with_keys(
            Arc::clone(&chain),
            Arc::clone(&store),
            Arc::clone(&keys),
            regtest_config(),
        );
        let mine = fx.new_key();
        let early = fx.fund(&mine, 10_000).hash;
        let late = fx.fund(&mine, 20_000).hash;
        (early, late)
    };
    // The tip is reorganized away while the wallet is closed.
    chain.disconnect_tip().expect("tip");

    let fx = Fixture::build_with_keys(chain, store, keys, regtest_config());
    assert_eq!(fx.status(&early), TxStatus::Confirmed);
    assert_eq!(fx.status(&late), TxStatus::Unconfirmed);
}

#[test]
fn failed_writes_leave_state_untouched() {
    let memory = Arc::new(MemoryStore::new());
    let fx = Fixture::build(
        Arc::new(MemoryChain::new()),
        Arc::clone(&memory) as Arc<dyn KeyValueStore>,
        regtest_config(),
    );
    let mine = fx.new_key();
    memory.set_fail_writes(true);
    let err = fx
        .wallet
        .lock()
        .set_address_book(mine, "lost", "receive")
        .expect_err("write fails");
    assert!(matches!(err, WalletError::Store(_)));
    assert!(fx.wallet.lock().address_book().get(&mine).is_none());
    assert_eq!(memory.len(Column::AddressBook), 0);

    memory.set_fail_writes(false);
    fx.wallet
        .lock()
        .set_address_book(mine, "kept", "receive")
        .expect("write");
    assert_eq!(memory.len(Column::AddressBook), 1);
}

#[test]
fn load_gives_up_on_unreadable_store() {
    let memory = Arc::new(MemoryStore::new());
    memory.set_fail_reads(true);
    let result = yupost_wallet::Wallet::load(
        memory,
        Arc::new(MemoryChain::new()),
        Arc::new(KeyStore::new()),
        regtest_config(),
    );
    assert!(matches!(result, Err(WalletError::Store(_))));
}
