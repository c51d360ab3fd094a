//! Offline inspection and maintenance of a persisted wallet directory.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::{json, Value};
use yupost_consensus::money::Amount;
use yupost_consensus::{chain_params, ChainParams, Hash160};
use yupost_primitives::hex::hash256_to_hex;
use yupost_primitives::{Destination, OutPoint};
use yupost_storage::fjall::FjallStore;
use yupost_storage::{Column, KeyValueStore};

use crate::config::{parse_amount, WalletConfig, CONF_FILE_NAME};
use crate::ledger::Ledger;
use crate::records::{DelegateAddressType, SuperStakerRecord};
use crate::tx::TxStatus;
use crate::wallet::{load_records, unix_time, LoadedRecords};

pub const STORE_DIR_NAME: &str = "store";
pub const LOCK_FILE_NAME: &str = ".lock";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolCommand {
    Info,
    Balance,
    Transactions,
    Delegations,
    SuperStakers,
    AddSuperStaker { address: String, name: String },
    RemoveSuperStaker { address: String },
    Contracts,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SuperStakerOptions {
    pub min_fee: Option<u8>,
    pub min_utxo: Option<Amount>,
    pub allow: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug)]
pub struct ToolArgs {
    pub wallet_dir: PathBuf,
    pub config: WalletConfig,
    /// Addresses whose outputs `balance` sums.
    pub watch: Vec<String>,
    pub staker: SuperStakerOptions,
    pub command: ToolCommand,
}

#[derive(Debug)]
pub enum ToolAction {
    Help,
    Run(ToolArgs),
}

pub fn usage() -> String {
    [
        "Usage:",
        "  yupost-wallet-tool --wallet-dir=<dir> [options] <command> [args]",
        "",
        "Commands:",
        "  info                          Record counts, best block and order position",
        "  balance                       Unspent value of --watch addresses by stored status",
        "  transactions                  Every stored transaction in order",
        "  delegations                   Delegations created by this wallet",
        "  super-stakers                 Configured super stakers",
        "  add-super-staker <addr> <name>",
        "  remove-super-staker <addr>",
        "  contracts                     Contract book entries",
        "",
        "Options:",
        "  --help, -h        Print this help and exit",
        "  --wallet-dir      Wallet directory (required)",
        "  --conf            Config file (default: <wallet-dir>/yupost.conf)",
        "  --watch           Address to include in balance (repeatable)",
        "  --min-fee         Super staker fee floor, percent",
        "  --min-utxo        Super staker minimum delegated coin value",
        "  --allow           Delegator to allow-list (repeatable)",
        "  --exclude         Delegator to exclude (repeatable)",
        "  --<key>=<value>   Any wallet config key, e.g. --network=regtest",
    ]
    .join("\n")
}

fn split_option(arg: &str) -> Option<(&str, &str)> {
    let option = arg.strip_prefix("--")?;
    Some(option.split_once('=').unwrap_or((option, "1")))
}

pub fn parse_args_from<I>(raw_args: I) -> Result<ToolAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut wallet_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut overrides: Vec<(String, String)> = Vec::new();
    let mut watch = Vec::new();
    let mut staker = SuperStakerOptions::default();
    let mut positional: Vec<String> = Vec::new();

    for arg in raw_args {
        if arg == "-h" || arg == "--help" {
            return Ok(ToolAction::Help);
        }
        let Some((key, value)) = split_option(&arg) else {
            positional.push(arg);
            continue;
        };
        match key {
            "wallet-dir" => wallet_dir = Some(PathBuf::from(value)),
            "conf" => conf_path = Some(PathBuf::from(value)),
            "watch" => watch.push(value.to_string()),
            "min-fee" => {
                let fee: u8 = value
                    .parse()
                    .map_err(|_| format!("invalid --min-fee '{value}'"))?;
                if fee > 100 {
                    return Err("--min-fee must be at most 100".to_string());
                }
                staker.min_fee = Some(fee);
            }
            "min-utxo" => staker.min_utxo = Some(parse_amount(value)?),
            "allow" => staker.allow.push(value.to_string()),
            "exclude" => staker.exclude.push(value.to_string()),
            _ => overrides.push((key.to_string(), value.to_string())),
        }
    }
    if !staker.allow.is_empty() && !staker.exclude.is_empty() {
        return Err("--allow and --exclude cannot be combined".to_string());
    }

    let wallet_dir = wallet_dir.ok_or("missing --wallet-dir")?;
    let conf_path = conf_path.unwrap_or_else(|| wallet_dir.join(CONF_FILE_NAME));
    let mut config = WalletConfig::load(&conf_path)?;
    for (key, value) in &overrides {
        if !config.apply_option(key, value)? {
            return Err(format!("unknown option '--{key}'"));
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("info") => ToolCommand::Info,
        Some("balance") => ToolCommand::Balance,
        Some("transactions") => ToolCommand::Transactions,
        Some("delegations") => ToolCommand::Delegations,
        Some("super-stakers") => ToolCommand::SuperStakers,
        Some("contracts") => ToolCommand::Contracts,
        Some("add-super-staker") => {
            let address = positional.next().ok_or("add-super-staker needs an address")?;
            let name = positional.next().ok_or("add-super-staker needs a name")?;
            ToolCommand::AddSuperStaker { address, name }
        }
        Some("remove-super-staker") => {
            let address = positional
                .next()
                .ok_or("remove-super-staker needs an address")?;
            ToolCommand::RemoveSuperStaker { address }
        }
        Some(other) => return Err(format!("unknown command '{other}'")),
        None => return Err("missing command".to_string()),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }

    Ok(ToolAction::Run(ToolArgs {
        wallet_dir,
        config,
        watch,
        staker,
        command,
    }))
}

/// Exclusive lock on a wallet directory, held until dropped.
#[derive(Debug)]
pub struct WalletDirLock {
    _file: File,
}

pub fn lock_wallet_dir(wallet_dir: &Path) -> Result<WalletDirLock, String> {
    fs::create_dir_all(wallet_dir)
        .map_err(|err| format!("failed to create {}: {err}", wallet_dir.display()))?;
    let lock_path = wallet_dir.join(LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();
            Ok(WalletDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            Err(format!(
                "wallet dir {} is already locked ({})",
                wallet_dir.display(),
                holder.trim()
            ))
        }
        Err(err) => Err(format!("failed to lock {}: {err}", lock_path.display())),
    }
}

pub fn open_store(wallet_dir: &Path) -> Result<FjallStore, String> {
    FjallStore::open(wallet_dir.join(STORE_DIR_NAME)).map_err(|err| err.to_string())
}

fn status_name(status: TxStatus) -> &'static str {
    match status {
        TxStatus::Unconfirmed => "unconfirmed",
        TxStatus::Confirmed => "confirmed",
        TxStatus::Conflicted => "conflicted",
        TxStatus::Abandoned => "abandoned",
    }
}

fn decode_key_hash(address: &str, params: &ChainParams) -> Result<Hash160, String> {
    match Destination::decode(address, params) {
        Ok(Destination::PubKeyHash(hash)) => Ok(hash),
        Ok(Destination::ScriptHash(_)) => Err(format!("'{address}' is not a key address")),
        Err(err) => Err(format!("invalid address '{address}': {err}")),
    }
}

fn info(records: &LoadedRecords) -> Value {
    json!({
        "version": records.version,
        "transactions": records.txs.len(),
        "order_pos_next": records.order_pos_next,
        "best_block": records.best_block.map(|(height, hash)| json!({
            "height": height,
            "hash": hash256_to_hex(&hash),
        })),
        "address_book": records.address_book.len(),
        "contracts": records.contract_book.len(),
        "delegations": records.delegations.len(),
        "super_stakers": records.super_stakers.len(),
        "tokens": records.tokens.len(),
        "token_transactions": records.token_txs.len(),
    })
}

/// Sums unspent outputs paying `watch`, split by the stored status of the funding record.
/// Conflicted and abandoned records neither fund nor spend.
fn balance(
    records: LoadedRecords,
    watch: &[String],
    params: &ChainParams,
) -> Result<Value, String> {
    let scripts = watch
        .iter()
        .map(|address| {
            Destination::decode(address, params)
                .map(|destination| destination.script_pubkey())
                .map_err(|err| format!("invalid address '{address}': {err}"))
        })
        .collect::<Result<Vec<_>, String>>()?;
    let mut ledger = Ledger::new();
    for wtx in records.txs {
        ledger.insert(wtx);
    }
    let live = |status: TxStatus| matches!(status, TxStatus::Confirmed | TxStatus::Unconfirmed);

    let mut confirmed: Amount = 0;
    let mut unconfirmed: Amount = 0;
    for wtx in ledger.iter() {
        if !live(wtx.status()) {
            continue;
        }
        for (index, txout) in wtx.tx.vout.iter().enumerate() {
            if !scripts.contains(&txout.script_pubkey) {
                continue;
            }
            let spent = ledger
                .spenders(&OutPoint::new(wtx.txid, index as u32))
                .iter()
                .any(|spender| ledger.get(spender).is_some_and(|tx| live(tx.status())));
            if spent {
                continue;
            }
            match wtx.status() {
                TxStatus::Confirmed => confirmed += txout.value,
                _ => unconfirmed += txout.value,
            }
        }
    }
    Ok(json!({ "confirmed": confirmed, "unconfirmed": unconfirmed }))
}

fn transactions(records: &LoadedRecords) -> Value {
    Value::Array(
        records
            .txs
            .iter()
            .map(|wtx| {
                json!({
                    "txid": hash256_to_hex(&wtx.txid),
                    "status": status_name(wtx.status()),
                    "block_hash": wtx.is_confirmed().then(|| hash256_to_hex(&wtx.confirmation.block_hash)),
                    "order_pos": wtx.order_pos,
                    "time": wtx.time_smart,
                    "from_me": wtx.from_me,
                    "annotations": wtx.map_value,
                })
            })
            .collect(),
    )
}

fn delegations(records: &LoadedRecords, params: &ChainParams) -> Value {
    Value::Array(
        records
            .delegations
            .values()
            .map(|record| {
                json!({
                    "id": hash256_to_hex(&record.id()),
                    "delegate": Destination::PubKeyHash(record.delegate_address).encode(params),
                    "staker": Destination::PubKeyHash(record.staker_address).encode(params),
                    "staker_name": record.staker_name,
                    "fee": record.fee,
                    "block_number": record.block_number,
                    "create_tx": hash256_to_hex(&record.create_tx_hash),
                    "remove_tx": hash256_to_hex(&record.remove_tx_hash),
                })
            })
            .collect(),
    )
}

fn super_staker_json(record: &SuperStakerRecord, params: &ChainParams) -> Value {
    json!({
        "id": hash256_to_hex(&record.id()),
        "staker": Destination::PubKeyHash(record.staker_address).encode(params),
        "name": record.staker_name,
        "custom_config": record.custom_config,
        "min_fee": record.min_fee,
        "min_delegate_utxo": record.min_delegate_utxo,
        "address_type": record.delegate_address_type.as_str(),
        "addresses": record
            .delegate_address_list
            .iter()
            .map(|hash| Destination::PubKeyHash(*hash).encode(params))
            .collect::<Vec<_>>(),
    })
}

fn add_super_staker(
    store: &dyn KeyValueStore,
    records: &LoadedRecords,
    address: &str,
    name: &str,
    options: &SuperStakerOptions,
    params: &ChainParams,
) -> Result<Value, String> {
    let staker = decode_key_hash(address, params)?;
    if records
        .super_stakers
        .values()
        .any(|record| record.staker_address == staker)
    {
        return Err(format!("super staker {address} already exists"));
    }
    let mut record = SuperStakerRecord::new(staker, name);
    record.create_time = unix_time();
    let (list, kind) = if options.exclude.is_empty() {
        (&options.allow, DelegateAddressType::AllowList)
    } else {
        (&options.exclude, DelegateAddressType::ExcludeList)
    };
    record.custom_config =
        options.min_fee.is_some() || options.min_utxo.is_some() || !list.is_empty();
    if record.custom_config {
        record.min_fee = options.min_fee.unwrap_or(0);
        record.min_delegate_utxo = options.min_utxo.unwrap_or(0);
        record.delegate_address_list = list
            .iter()
            .map(|address| decode_key_hash(address, params))
            .collect::<Result<_, _>>()?;
        if !list.is_empty() {
            record.delegate_address_type = kind;
        }
    }
    store
        .put(Column::SuperStaker, &record.id(), &record.encode())
        .map_err(|err| err.to_string())?;
    store.flush().map_err(|err| err.to_string())?;
    Ok(super_staker_json(&record, params))
}

fn remove_super_staker(
    store: &dyn KeyValueStore,
    records: &LoadedRecords,
    address: &str,
    params: &ChainParams,
) -> Result<Value, String> {
    let staker = decode_key_hash(address, params)?;
    let ids: Vec<_> = records
        .super_stakers
        .iter()
        .filter(|(_, record)| record.staker_address == staker)
        .map(|(id, _)| *id)
        .collect();
    if ids.is_empty() {
        return Err(format!("no super staker for {address}"));
    }
    for id in &ids {
        store
            .delete(Column::SuperStaker, id)
            .map_err(|err| err.to_string())?;
    }
    store.flush().map_err(|err| err.to_string())?;
    Ok(json!({ "removed": ids.len() }))
}

/// Runs `command` against an opened store.
pub fn run_command(
    store: &dyn KeyValueStore,
    args: &ToolArgs,
) -> Result<Value, String> {
    let params = chain_params(args.config.network);
    let records = load_records(store, &params).map_err(|err| err.to_string())?;
    match &args.command {
        ToolCommand::Info => Ok(info(&records)),
        ToolCommand::Balance => balance(records, &args.watch, &params),
        ToolCommand::Transactions => Ok(transactions(&records)),
        ToolCommand::Delegations => Ok(delegations(&records, &params)),
        ToolCommand::SuperStakers => Ok(Value::Array(
            records
                .super_stakers
                .values()
                .map(|record| super_staker_json(record, &params))
                .collect(),
        )),
        ToolCommand::AddSuperStaker { address, name } => {
            add_super_staker(store, &records, address, name, &args.staker, &params)
        }
        ToolCommand::RemoveSuperStaker { address } => {
            remove_super_staker(store, &records, address, &params)
        }
        ToolCommand::Contracts => Ok(Value::Array(
            records
                .contract_book
                .iter()
                .map(|(address, entry)| {
                    json!({ "address": address, "name": entry.name, "abi": entry.abi })
                })
                .collect(),
        )),
    }
}

/// Locks the wallet directory, opens its store and runs the command.
pub fn run(args: &ToolArgs) -> Result<Value, String> {
    let _lock = lock_wallet_dir(&args.wallet_dir)?;
    let store = open_store(&args.wallet_dir)?;
    run_command(&store, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Result<ToolAction, String> {
        parse_args_from(raw.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn parses_commands_and_config_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wallet_dir = format!("--wallet-dir={}", dir.path().display());
        let ToolAction::Run(parsed) = args(&[&wallet_dir, "--network=regtest", "--watch=a", "info"])
            .expect("parse")
        else {
            panic!("expected run");
        };
        assert_eq!(parsed.command, ToolCommand::Info);
        assert_eq!(parsed.config.network, yupost_consensus::Network::Regtest);
        assert_eq!(parsed.watch, vec!["a".to_string()]);

        let ToolAction::Run(parsed) =
            args(&[&wallet_dir, "add-super-staker", "addr", "name", "--min-fee=20"])
                .expect("parse")
        else {
            panic!("expected run");
        };
        assert_eq!(
            parsed.command,
            ToolCommand::AddSuperStaker {
                address: "addr".to_string(),
                name: "name".to_string()
            }
        );
        assert_eq!(parsed.staker.min_fee, Some(20));
    }

    #[test]
    fn rejects_bad_invocations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wallet_dir = format!("--wallet-dir={}", dir.path().display());
        assert!(matches!(args(&["--help"]), Ok(ToolAction::Help)));
        assert!(args(&["info"]).is_err());
        assert!(args(&[&wallet_dir]).is_err());
        assert!(args(&[&wallet_dir, "bogus"]).is_err());
        assert!(args(&[&wallet_dir, "--nosuchkey=1", "info"]).is_err());
        assert!(args(&[&wallet_dir, "--min-fee=101", "info"]).is_err());
        assert!(args(&[&wallet_dir, "--allow=a", "--exclude=b", "info"]).is_err());
        assert!(args(&[&wallet_dir, "info", "extra"]).is_err());
    }

    #[test]
    fn directory_lock_is_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = lock_wallet_dir(dir.path()).expect("first lock");
        assert!(lock_wallet_dir(dir.path()).is_err());
        drop(first);
        lock_wallet_dir(dir.path()).expect("relock");
    }
}
