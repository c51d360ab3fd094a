mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{regtest_config, Fixture};
use yupost_consensus::money::COIN;
use yupost_primitives::{Destination, Transaction};
use yupost_storage::memory::MemoryStore;
use yupost_wallet::chain::memory::DEFAULT_STAKE_REWARD;
use yupost_wallet::records::SuperStakerRecord;
use yupost_wallet::{start_staking, WalletConfig};

/// Connects a block and delivers it to every wallet watching the chain.
fn mine_all(wallets: &[&Fixture], txs: Vec<Transaction>) {
    let event = wallets[0].chain.connect_block(txs);
    for fx in wallets {
        fx.wallet.handle_chain_event(event.clone());
    }
}

fn mine_empty_all(wallets: &[&Fixture], count: usize) {
    for _ in 0..count {
        mine_all(wallets, Vec::new());
    }
}

#[test]
fn mature_own_coin_stakes() {
    let fx = Fixture::new();
    let mine = fx.new_key();
    let coin = fx.fund(&mine, 10 * COIN);
    assert!(fx.wallet.try_stake_once().expect("search").is_none());

    fx.mine_empty(fx.wallet.params().stake_min_confirmations as usize);
    let weight = fx.wallet.stake_weight().expect("weight");
    assert_eq!(weight.mine, 10 * COIN);
    assert_eq!(weight.delegated, 0);

    let solution = fx
        .wallet
        .try_stake_once()
        .expect("search")
        .expect("kernel found");
    assert_eq!(solution.prevout_stake, coin);
    assert_eq!(solution.height, fx.chain.height() + 1);
    assert_eq!(solution.time & fx.wallet.params().stake_timestamp_mask, 0);
    assert!(solution.proof_of_delegation.is_empty());
    let coinstake = &solution.coinstake;
    assert!(coinstake.is_coinstake());
    assert_eq!(coinstake.vin[0].prevout, coin);
    assert!(!coinstake.vin[0].script_sig.is_empty());
    assert_eq!(coinstake.vout[1].value, 10 * COIN + DEFAULT_STAKE_REWARD);
    assert_eq!(coinstake.vout[1].script_pubkey, mine.script_pubkey());
    assert_eq!(fx.chain.stakes(), vec![solution]);
}

#[test]
fn hard_target_finds_nothing() {
    let fx = Fixture::new();
    let mine = fx.new_key();
    fx.fund(&mine, 10 * COIN);
    fx.mine_empty(fx.wallet.params().stake_min_confirmations as usize);
    fx.chain.set_stake_params(0x0300_0001, DEFAULT_STAKE_REWARD);
    assert!(fx.wallet.try_stake_once().expect("search").is_none());
    assert!(fx.chain.stakes().is_empty());
}

#[test]
fn locked_coins_do_not_stake() {
    let fx = Fixture::new();
    let mine = fx.new_key();
    let coin = fx.fund(&mine, 10 * COIN);
    fx.mine_empty(fx.wallet.params().stake_min_confirmations as usize);
    fx.wallet.lock().lock_coin(coin);
    assert!(fx.wallet.try_stake_once().expect("search").is_none());
}

#[test]
fn coins_below_the_staking_floor_never_stake() {
    let config = WalletConfig {
        staking_min_value: 5 * COIN,
        ..regtest_config()
    };
    let fx = Fixture::with_config(config);
    let mine = fx.new_key();
    let small = fx.fund(&mine, 2 * COIN);
    fx.mine_empty(fx.wallet.params().stake_min_confirmations as usize);
    assert_eq!(fx.wallet.stake_weight().expect("weight").mine, 0);
    assert!(fx.wallet.try_stake_once().expect("search").is_none());

    let large = fx.fund(&fx.new_key(), 10 * COIN);
    fx.mine_empty(fx.wallet.params().stake_min_confirmations as usize);
    assert_eq!(fx.wallet.stake_weight().expect("weight").mine, 10 * COIN);
    for _ in 0..3 {
        let solution = fx
            .wallet
            .try_stake_once()
            .expect("search")
            .expect("kernel found");
        assert_eq!(solution.prevout_stake, large);
        assert_ne!(solution.prevout_stake, small);
    }
    assert!(fx
        .chain
        .stakes()
        .iter()
        .all(|stake| stake.prevout_stake != small));
}

#[test]
fn reserve_balance_is_kept_out_of_staking() {
    let config = WalletConfig {
        reserve_balance: 5 * COIN,
        ..regtest_config()
    };
    let fx = Fixture::with_config(config);
    let mine = fx.new_key();
    let large = fx.fund(&mine, 10 * COIN);
    fx.mine_empty(fx.wallet.params().stake_min_confirmations as usize);
    // 10 coins minus a reserve of 5 leaves no room for the only coin.
    assert_eq!(fx.wallet.stake_weight().expect("weight").mine, 0);
    assert!(fx.wallet.try_stake_once().expect("search").is_none());

    let small = fx.fund(&mine, 4 * COIN);
    fx.mine_empty(fx.wallet.params().stake_min_confirmations as usize);
    assert_eq!(fx.wallet.stake_weight().expect("weight").mine, 4 * COIN);
    let solution = fx
        .wallet
        .try_stake_once()
        .expect("search")
        .expect("kernel found");
    assert_eq!(solution.prevout_stake, small);
    assert_ne!(solution.prevout_stake, large);
}

#[test]
fn super_staker_stakes_delegated_coins() {
    let delegator = Fixture::new();
    let staker_config = WalletConfig {
        super_staking: true,
        ..regtest_config()
    };
    let staker = Fixture::build(
        Arc::clone(&delegator.chain),
        Arc::new(MemoryStore::new()),
        staker_config,
    );
    let wallets = [&delegator, &staker];

    let delegate_key = delegator.new_key();
    let staker_key = staker.new_key();
    let staker_hash = *staker_key.hash();
    staker
        .wallet
        .lock()
        .add_super_staker(SuperStakerRecord::new(staker_hash, "pool"))
        .expect("super staker");

    mine_all(
        &wallets,
        vec![delegator.external_payment(&[(delegate_key, 10 * COIN)])],
    );
    let delegation_txid = delegator
        .wallet
        .delegate(&delegate_key, &staker_hash, "pool", 20)
        .expect("delegate");
    let delegation_tx = delegator
        .chain
        .broadcasts()
        .into_iter()
        .find(|tx| tx.txid() == delegation_txid)
        .expect("delegation broadcast");
    mine_all(&wallets, vec![delegation_tx.clone()]);
    {
        let guard = delegator.wallet.lock();
        let records: Vec<_> = guard.delegations().values().cloned().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].staker_name, "pool");
        assert_eq!(records[0].fee, 20);
        assert_eq!(records[0].block_number, 1);
        assert_eq!(records[0].create_tx_hash, delegation_txid);
    }

    mine_empty_all(&wallets, staker.wallet.params().stake_min_confirmations as usize);
    // A fresh coin to carry the coinstake; too young to stake on its own.
    mine_all(
        &wallets,
        vec![delegator.external_payment(&[(staker_key, COIN)])],
    );

    let delegated_coin = delegation_tx
        .vout
        .iter()
        .position(|out| out.script_pubkey == delegate_key.script_pubkey())
        .expect("delegated output");
    let delegated_value = delegation_tx.vout[delegated_coin].value;
    let weight = staker.wallet.stake_weight().expect("weight");
    assert_eq!(weight.mine, 0);
    assert_eq!(weight.delegated, delegated_value);

    let solution = staker
        .wallet
        .try_stake_once()
        .expect("search")
        .expect("delegated kernel");
    assert_eq!(solution.prevout_stake.hash, delegation_txid);
    assert_eq!(solution.prevout_stake.index as usize, delegated_coin);
    assert!(!solution.proof_of_delegation.is_empty());
    let coinstake = &solution.coinstake;
    assert_eq!(coinstake.vin.len(), 1);
    assert_ne!(coinstake.vin[0].prevout, solution.prevout_stake);
    let staker_share = DEFAULT_STAKE_REWARD * 20 / 100;
    assert_eq!(coinstake.vout[1].value, COIN + staker_share);
    assert_eq!(coinstake.vout[1].script_pubkey, staker_key.script_pubkey());
    assert_eq!(coinstake.vout[2].value, DEFAULT_STAKE_REWARD - staker_share);
    assert_eq!(
        coinstake.vout[2].script_pubkey,
        Destination::PubKeyHash(*delegate_key.hash()).script_pubkey()
    );

    let undelegation_txid = delegator
        .wallet
        .undelegate(&delegate_key, &staker_hash)
        .expect("undelegate");
    let undelegation_tx = delegator
        .chain
        .broadcasts()
        .into_iter()
        .find(|tx| tx.txid() == undelegation_txid)
        .expect("undelegation broadcast");
    mine_all(&wallets, vec![undelegation_tx]);
    assert!(delegator.wallet.lock().delegations().is_empty());
    assert_eq!(staker.wallet.stake_weight().expect("weight").delegated, 0);
}

#[test]
fn delegations_ignored_without_super_staking() {
    let delegator = Fixture::new();
    let staker = Fixture::build(
        Arc::clone(&delegator.chain),
        Arc::new(MemoryStore::new()),
        regtest_config(),
    );
    let wallets = [&delegator, &staker];
    let delegate_key = delegator.new_key();
    let staker_hash = *staker.new_key().hash();
    staker
        .wallet
        .lock()
        .add_super_staker(SuperStakerRecord::new(staker_hash, "idle"))
        .expect("super staker");

    mine_all(
        &wallets,
        vec![delegator.external_payment(&[(delegate_key, 10 * COIN)])],
    );
    let txid = delegator
        .wallet
        .delegate(&delegate_key, &staker_hash, "idle", 20)
        .expect("delegate");
    let tx = delegator
        .chain
        .broadcasts()
        .into_iter()
        .find(|tx| tx.txid() == txid)
        .expect("broadcast");
    mine_all(&wallets, vec![tx]);
    mine_empty_all(&wallets, staker.wallet.params().stake_min_confirmations as usize);

    assert_eq!(staker.wallet.stake_weight().expect("weight").delegated, 0);
    assert!(staker.wallet.try_stake_once().expect("search").is_none());
}

#[test]
fn background_staker_submits_and_stops() {
    let config = WalletConfig {
        stake_search_interval: Duration::from_millis(10),
        ..regtest_config()
    };
    let fx = Fixture::with_config(config);
    let mine = fx.new_key();
    fx.fund(&mine, 10 * COIN);
    fx.mine_empty(fx.wallet.params().stake_min_confirmations as usize);

    let handle = start_staking(Arc::clone(&fx.wallet)).expect("spawn staker");
    assert!(handle.is_running());
    let deadline = Instant::now() + Duration::from_secs(10);
    while fx.chain.stakes().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    handle.stop();
    let stakes = fx.chain.stakes();
    // The same slot is never searched twice.
    assert_eq!(stakes.len(), 1);
}
