#![allow(dead_code)]

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use yupost_consensus::money::Amount;
use yupost_consensus::{Hash256, Network};
use yupost_primitives::{Destination, OutPoint, Transaction, TxIn, TxOut};
use yupost_storage::memory::MemoryStore;
use yupost_storage::KeyValueStore;
use yupost_wallet::chain::memory::MemoryChain;
use yupost_wallet::{Chain, FeeRate, KeyStore, SigningProvider, TxStatus, Wallet, WalletConfig};

/// Regtest config paying a flat 1000 per kB.
pub fn regtest_config() -> WalletConfig {
    WalletConfig {
        network: Network::Regtest,
        pay_tx_fee: FeeRate::new(1_000),
        min_tx_fee: FeeRate::new(1_000),
        ..WalletConfig::default()
    }
}

pub struct Fixture {
    pub chain: Arc<MemoryChain>,
    pub store: Arc<dyn KeyValueStore>,
    pub keys: Arc<KeyStore>,
    pub wallet: Arc<Wallet>,
    salt: AtomicU8,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(regtest_config())
    }

    pub fn with_config(config: WalletConfig) -> Self {
        let chain = Arc::new(MemoryChain::new());
        Self::build(chain, Arc::new(MemoryStore::new()), config)
    }

    /// Opens a wallet over an existing chain and store.
    pub fn build(chain: Arc<MemoryChain>, store: Arc<dyn KeyValueStore>, config: WalletConfig) -> Self {
        Self::build_with_keys(chain, store, Arc::new(KeyStore::new()), config)
    }

    pub fn build_with_keys(
        chain: Arc<MemoryChain>,
        store: Arc<dyn KeyValueStore>,
        keys: Arc<KeyStore>,
        config: WalletConfig,
    ) -> Self {
        let wallet = Wallet::load(
            Arc::clone(&store),
            Arc::clone(&chain) as Arc<dyn Chain>,
            Arc::clone(&keys) as Arc<dyn SigningProvider>,
            config,
        )
        .expect("load wallet");
        Self {
            chain,
            store,
            keys,
            wallet: Arc::new(wallet),
            salt: AtomicU8::new(1),
        }
    }

    pub fn new_key(&self) -> Destination {
        self.keys.generate_key().expect("generate key")
    }

    /// Connects a block holding `txs` and delivers it to the wallet.
    pub fn mine(&self, txs: Vec<Transaction>) -> i32 {
        let event = self.chain.connect_block(txs);
        self.wallet.handle_chain_event(event);
        self.chain.height()
    }

    pub fn mine_empty(&self, count: usize) {
        for _ in 0..count {
            self.mine(Vec::new());
        }
    }

    pub fn submit(&self, tx: Transaction) {
        let event = self.chain.add_to_mempool(tx);
        self.wallet.handle_chain_event(event);
    }

    /// A transaction from outside the wallet paying `value` to each destination.
    pub fn external_payment(&self, outputs: &[(Destination, Amount)]) -> Transaction {
        let salt = self.salt.fetch_add(1, Ordering::SeqCst);
        let mut tx = Transaction::new(2);
        tx.vin
            .push(TxIn::new(OutPoint::new([salt; 32], 0), u32::MAX - 1));
        for (destination, value) in outputs {
            tx.vout.push(TxOut::new(*value, destination.script_pubkey()));
        }
        tx
    }

    /// Confirms an external payment of `value` to `destination` and returns its outpoint.
    pub fn fund(&self, destination: &Destination, value: Amount) -> OutPoint {
        let tx = self.external_payment(&[(*destination, value)]);
        let txid = tx.txid();
        self.mine(vec![tx]);
        OutPoint::new(txid, 0)
    }

    pub fn status(&self, txid: &Hash256) -> TxStatus {
        self.wallet
            .lock()
            .ledger()
            .get(txid)
            .expect("wallet transaction")
            .status()
    }

    pub fn address(&self, destination: &Destination) -> String {
        destination.encode(self.wallet.params())
    }
}

/// A pay-to-key-hash destination no wallet in the test owns.
pub fn foreign_destination(tag: u8) -> Destination {
    Destination::PubKeyHash([tag; 20])
}
