//! Key ownership and signing, behind the `SigningProvider` seam.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use rand::RngCore;
use secp256k1::{PublicKey, SecretKey};
use yupost_consensus::money::Amount;
use yupost_consensus::{ChainParams, Hash160};
use yupost_primitives::hash::hash160;
use yupost_primitives::{wif_to_secret_key, Destination, Transaction};
use yupost_script::message::create_proof_of_delegation;
use yupost_script::secp256k1_signing;
use yupost_script::sighash::SighashType;
use yupost_script::sign::sign_input;
use yupost_script::standard::{extract_destination, p2pk_pubkey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    MissingKey,
    InvalidKey,
    Script(String),
}

impl std::fmt::Display for SigningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningError::MissingKey => write!(f, "no key available for script"),
            SigningError::InvalidKey => write!(f, "invalid secret key"),
            SigningError::Script(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for SigningError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum IsMine {
    No,
    WatchOnly,
    Spendable,
}

pub trait SigningProvider: Send + Sync {
    fn is_mine(&self, script_pubkey: &[u8]) -> IsMine;

    fn can_sign(&self, script_pubkey: &[u8]) -> bool {
        self.is_mine(script_pubkey) == IsMine::Spendable
    }

    /// Returns the scriptSig for input `index`, or `None` when no key is held for it.
    fn sign_input(
        &self,
        tx: &Transaction,
        index: usize,
        script_pubkey: &[u8],
        amount: Amount,
    ) -> Result<Option<Vec<u8>>, SigningError>;

    fn new_change_destination(&self) -> Result<Destination, SigningError>;

    /// Starts watching `script_pubkey` without a key. Returns false when nothing changed.
    fn add_watch_only(&self, _script_pubkey: &[u8]) -> bool {
        false
    }

    /// Proof that `delegator` authorizes `staker` to stake its coins.
    fn sign_pod(&self, staker: &Hash160, delegator: &Hash160) -> Result<Vec<u8>, SigningError>;
}

struct StoredKey {
    secret: SecretKey,
    pubkey: Vec<u8>,
    compressed: bool,
}

#[derive(Default)]
struct KeyStoreInner {
    keys: BTreeMap<Hash160, StoredKey>,
    watch_scripts: BTreeSet<Vec<u8>>,
    change: BTreeSet<Hash160>,
}

/// In-memory secp256k1 key store.
#[derive(Default)]
pub struct KeyStore {
    inner: RwLock<KeyStoreInner>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_secret(&self, secret: [u8; 32], compressed: bool) -> Result<Destination, SigningError> {
        let secret = SecretKey::from_slice(&secret).map_err(|_| SigningError::InvalidKey)?;
        let pubkey = PublicKey::from_secret_key(secp256k1_signing(), &secret);
        let pubkey = if compressed {
            pubkey.serialize().to_vec()
        } else {
            pubkey.serialize_uncompressed().to_vec()
        };
        let key_hash = hash160(&pubkey);
        self.inner
            .write()
            .expect("key store lock")
            .keys
            .insert(
                key_hash,
                StoredKey {
                    secret,
                    pubkey,
                    compressed,
                },
            );
        Ok(Destination::PubKeyHash(key_hash))
    }

    pub fn generate_key(&self) -> Result<Destination, SigningError> {
        let mut rng = rand::thread_rng();
        loop {
            let mut secret = [0u8; 32];
            rng.fill_bytes(&mut secret);
            match self.add_secret(secret, true) {
                Ok(destination) => return Ok(destination),
                Err(SigningError::InvalidKey) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    pub fn import_wif(&self, wif: &str, params: &ChainParams) -> Result<Destination, SigningError> {
        let (secret, compressed) =
            wif_to_secret_key(wif, params).map_err(|_| SigningError::InvalidKey)?;
        self.add_secret(secret, compressed)
    }

    pub fn add_watch_script(&self, script_pubkey: Vec<u8>) -> bool {
        self.inner
            .write()
            .expect("key store lock")
            .watch_scripts
            .insert(script_pubkey)
    }

    pub fn pubkey(&self, key_hash: &Hash160) -> Option<Vec<u8>> {
        let inner = self.inner.read().expect("key store lock");
        inner.keys.get(key_hash).map(|key| key.pubkey.clone())
    }

    pub fn is_change(&self, key_hash: &Hash160) -> bool {
        self.inner.read().expect("key store lock").change.contains(key_hash)
    }

    pub fn key_count(&self) -> usize {
        self.inner.read().expect("key store lock").keys.len()
    }

    fn key_hash_for(script_pubkey: &[u8]) -> Option<Hash160> {
        if let Some(pubkey) = p2pk_pubkey(script_pubkey) {
            return Some(hash160(pubkey));
        }
        match extract_destination(script_pubkey)? {
            Destination::PubKeyHash(hash) => Some(hash),
            Destination::ScriptHash(_) => None,
        }
    }
}

impl SigningProvider for KeyStore {
    fn is_mine(&self, script_pubkey: &[u8]) -> IsMine {
        let inner = self.inner.read().expect("key store lock");
        if let Some(hash) = Self::key_hash_for(script_pubkey) {
            if inner.keys.contains_key(&hash) {
                return IsMine::Spendable;
            }
        }
        if inner.watch_scripts.contains(script_pubkey) {
            return IsMine::WatchOnly;
        }
        IsMine::No
    }

    fn add_watch_only(&self, script_pubkey: &[u8]) -> bool {
        self.is_mine(script_pubkey) == IsMine::No && self.add_watch_script(script_pubkey.to_vec())
    }

    fn sign_input(
        &self,
        tx: &Transaction,
        index: usize,
        script_pubkey: &[u8],
        _amount: Amount,
    ) -> Result<Option<Vec<u8>>, SigningError> {
        let Some(hash) = Self::key_hash_for(script_pubkey) else {
            return Ok(None);
        };
        let inner = self.inner.read().expect("key store lock");
        let Some(key) = inner.keys.get(&hash) else {
            return Ok(None);
        };
        sign_input(
            tx,
            index,
            script_pubkey,
            &key.secret,
            key.compressed,
            SighashType::ALL,
        )
        .map(Some)
        .map_err(|err| SigningError::Script(err.to_string()))
    }

    fn new_change_destination(&self) -> Result<Destination, SigningError> {
        let destination = self.generate_key()?;
        self.inner
            .write()
            .expect("key store lock")
            .change
            .insert(*destination.hash());
        Ok(destination)
    }

    fn sign_pod(&self, staker: &Hash160, delegator: &Hash160) -> Result<Vec<u8>, SigningError> {
        let inner = self.inner.read().expect("key store lock");
        let key = inner.keys.get(delegator).ok_or(SigningError::MissingKey)?;
        create_proof_of_delegation(&key.secret, staker)
            .map_err(|err| SigningError::Script(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yupost_consensus::{chain_params, Network};
    use yupost_primitives::secret_key_to_wif;
    use yupost_script::message::verify_proof_of_delegation;
    use yupost_script::standard::p2pk_script;

    #[test]
    fn ownership_follows_keys_and_watch_scripts() {
        let store = KeyStore::new();
        let dest = store.generate_key().expect("key");
        assert_eq!(store.is_mine(&dest.script_pubkey()), IsMine::Spendable);

        let pubkey = store.pubkey(dest.hash()).expect("pubkey");
        assert_eq!(store.is_mine(&p2pk_script(&pubkey)), IsMine::Spendable);

        let foreign = Destination::PubKeyHash([7u8; 20]).script_pubkey();
        assert_eq!(store.is_mine(&foreign), IsMine::No);
        store.add_watch_script(foreign.clone());
        assert_eq!(store.is_mine(&foreign), IsMine::WatchOnly);
        assert!(!store.can_sign(&foreign));
    }

    #[test]
    fn wif_import_restores_destination() {
        let params = chain_params(Network::Regtest);
        let secret = [5u8; 32];
        let wif = secret_key_to_wif(&secret, &params, true);
        let first = KeyStore::new();
        let second = KeyStore::new();
        assert_eq!(
            first.import_wif(&wif, &params).expect("import"),
            second.add_secret(secret, true).expect("add")
        );
    }

    #[test]
    fn pod_is_signed_by_delegator_key() {
        let store = KeyStore::new();
        let delegator = store.generate_key().expect("key");
        let staker = [9u8; 20];
        let pod = store.sign_pod(&staker, delegator.hash()).expect("pod");
        assert!(verify_proof_of_delegation(&staker, delegator.hash(), &pod));
        assert_eq!(
            store.sign_pod(&staker, &[1u8; 20]),
            Err(SigningError::MissingKey)
        );
    }

    #[test]
    fn change_destinations_are_tracked() {
        let store = KeyStore::new();
        let change = store.new_change_destination().expect("change");
        assert!(store.is_change(change.hash()));
        assert_eq!(store.key_count(), 1);
    }
}
