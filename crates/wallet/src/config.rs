//! Wallet tunables, read from `yupost.conf` and overridden on the command line.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use yupost_consensus::money::{money_range, Amount, COIN};
use yupost_consensus::Network;
use yupost_log as logging;

use crate::fees::FeeRate;

pub const CONF_FILE_NAME: &str = "yupost.conf";

pub const DEFAULT_FALLBACK_FEE: Amount = 20_000;
pub const DEFAULT_DISCARD_FEE: Amount = 10_000;
pub const DEFAULT_MIN_TX_FEE: Amount = 400_000;
pub const DEFAULT_INCREMENTAL_RELAY_FEE: Amount = 5_000;
pub const DEFAULT_MAX_TX_FEE: Amount = COIN;
pub const DEFAULT_TX_CONFIRM_TARGET: u32 = 6;
pub const DEFAULT_STAKING_MIN_FEE: u8 = 10;
pub const DEFAULT_STAKING_MIN_UTXO_VALUE: Amount = COIN / 10;
pub const DEFAULT_STAKING_MIN_VALUE: Amount = 0;
pub const DEFAULT_RESERVE_BALANCE: Amount = 0;
pub const DEFAULT_STAKER_CACHE_SIZE: usize = 200_000;
pub const DEFAULT_STAKE_SEARCH_INTERVAL_MS: u64 = 1_000;
pub const MIN_STAKE_SEARCH_INTERVAL_MS: u64 = 500;
pub const DEFAULT_STAKE_CACHE_STALENESS: i32 = 10;

#[derive(Clone, Debug)]
pub struct WalletConfig {
    pub network: Network,
    /// Explicit fee rate; zero means estimate, then fall back.
    pub pay_tx_fee: FeeRate,
    pub fallback_fee: FeeRate,
    pub discard_fee: FeeRate,
    pub min_tx_fee: FeeRate,
    pub incremental_relay_fee: FeeRate,
    pub max_tx_fee: Amount,
    pub tx_confirm_target: u32,
    pub spend_zero_conf_change: bool,
    pub avoid_partial_spends: bool,
    pub signal_rbf: bool,
    pub staking_min_fee: u8,
    pub staking_min_utxo_value: Amount,
    /// Own coins below this value are never offered as stake kernels.
    pub staking_min_value: Amount,
    /// Part of the trusted balance kept out of staking.
    pub reserve_balance: Amount,
    pub staker_cache_size: usize,
    pub stake_search_interval: Duration,
    pub stake_cache_staleness: i32,
    pub super_staking: bool,
    pub log: logging::LogConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            pay_tx_fee: FeeRate::new(0),
            fallback_fee: FeeRate::new(DEFAULT_FALLBACK_FEE),
            discard_fee: FeeRate::new(DEFAULT_DISCARD_FEE),
            min_tx_fee: FeeRate::new(DEFAULT_MIN_TX_FEE),
            incremental_relay_fee: FeeRate::new(DEFAULT_INCREMENTAL_RELAY_FEE),
            max_tx_fee: DEFAULT_MAX_TX_FEE,
            tx_confirm_target: DEFAULT_TX_CONFIRM_TARGET,
            spend_zero_conf_change: true,
            avoid_partial_spends: true,
            signal_rbf: false,
            staking_min_fee: DEFAULT_STAKING_MIN_FEE,
            staking_min_utxo_value: DEFAULT_STAKING_MIN_UTXO_VALUE,
            staking_min_value: DEFAULT_STAKING_MIN_VALUE,
            reserve_balance: DEFAULT_RESERVE_BALANCE,
            staker_cache_size: DEFAULT_STAKER_CACHE_SIZE,
            stake_search_interval: Duration::from_millis(DEFAULT_STAKE_SEARCH_INTERVAL_MS),
            stake_cache_staleness: DEFAULT_STAKE_CACHE_STALENESS,
            super_staking: false,
            log: logging::LogConfig::default(),
        }
    }
}

impl WalletConfig {
    /// Builds a config from parsed conf-file entries; the last value of a repeated key wins.
    pub fn from_conf(conf: &HashMap<String, Vec<String>>) -> Result<Self, String> {
        let mut config = Self::default();
        let mut keys: Vec<&String> = conf.keys().collect();
        keys.sort();
        for key in keys {
            for value in &conf[key] {
                if !config.apply_option(key, value)? {
                    logging::log_warn!("ignoring unknown config key '{key}'");
                }
            }
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        match load_conf_file(path)? {
            Some(conf) => Self::from_conf(&conf),
            None => Ok(Self::default()),
        }
    }

    /// Applies one `key=value` setting. Returns `Ok(false)` for keys this config does not own.
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<bool, String> {
        match key {
            "network" => {
                self.network = Network::parse(value)
                    .ok_or_else(|| format!("invalid network '{value}'"))?;
            }
            "testnet" => {
                if parse_bool_option(key, value)? {
                    self.network = Network::Testnet;
                }
            }
            "regtest" => {
                if parse_bool_option(key, value)? {
                    self.network = Network::Regtest;
                }
            }
            "paytxfee" => self.pay_tx_fee = FeeRate::new(parse_amount(value)?),
            "fallbackfee" => self.fallback_fee = FeeRate::new(parse_amount(value)?),
            "discardfee" => self.discard_fee = FeeRate::new(parse_amount(value)?),
            "mintxfee" => self.min_tx_fee = FeeRate::new(parse_amount(value)?),
            "incrementalrelayfee" => {
                self.incremental_relay_fee = FeeRate::new(parse_amount(value)?)
            }
            "maxtxfee" => {
                let fee = parse_amount(value)?;
                if fee == 0 {
                    return Err("maxtxfee must be greater than zero".to_string());
                }
                self.max_tx_fee = fee;
            }
            "txconfirmtarget" => {
                self.tx_confirm_target = value
                    .parse::<u32>()
                    .map_err(|_| format!("invalid txconfirmtarget '{value}'"))?;
            }
            "spendzeroconfchange" => self.spend_zero_conf_change = parse_bool_option(key, value)?,
            "avoidpartialspends" => self.avoid_partial_spends = parse_bool_option(key, value)?,
            "walletrbf" => self.signal_rbf = parse_bool_option(key, value)?,
            "stakingminfee" => {
                let fee = value
                    .parse::<u8>()
                    .ok()
                    .filter(|fee| *fee <= 100)
                    .ok_or_else(|| format!("invalid stakingminfee '{value}' (expected 0-100)"))?;
                self.staking_min_fee = fee;
            }
            "stakingminutxovalue" => self.staking_min_utxo_value = parse_amount(value)?,
            "stakingminvalue" => self.staking_min_value = parse_amount(value)?,
            "reservebalance" => self.reserve_balance = parse_amount(value)?,
            "stakercachesize" => {
                self.staker_cache_size = value
                    .parse::<usize>()
                    .map_err(|_| format!("invalid stakercachesize '{value}'"))?;
            }
            "stakesearchinterval" => {
                let millis = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid stakesearchinterval '{value}'"))?;
                self.stake_search_interval =
                    Duration::from_millis(millis.max(MIN_STAKE_SEARCH_INTERVAL_MS));
            }
            "stakecachestaleness" => {
                self.stake_cache_staleness = value
                    .parse::<i32>()
                    .ok()
                    .filter(|blocks| *blocks >= 0)
                    .ok_or_else(|| format!("invalid stakecachestaleness '{value}'"))?;
            }
            "superstaking" => self.super_staking = parse_bool_option(key, value)?,
            "loglevel" => {
                self.log.level = logging::Level::parse(value)
                    .ok_or_else(|| format!("invalid loglevel '{value}'"))?;
            }
            "logformat" => {
                self.log.format = logging::Format::parse(value)
                    .ok_or_else(|| format!("invalid logformat '{value}'"))?;
            }
            "logtimestamps" => self.log.timestamps = parse_bool_option(key, value)?,
            "debug" => {
                let directive = logging::LogConfig::parse_target_level(value)
                    .ok_or_else(|| format!("invalid debug directive '{value}'"))?;
                self.log.target_levels.push(directive);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

pub fn load_conf_file(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.to_string()),
    };
    Ok(Some(parse_conf(&contents)))
}

pub fn parse_conf(contents: &str) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(idx) = line.find('#') {
            line = &line[..idx];
        }
        if let Some(idx) = line.find(';') {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    out
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_bool_option(key: &str, value: &str) -> Result<bool, String> {
    parse_conf_bool(value).ok_or_else(|| format!("invalid boolean for {key}: '{value}'"))
}

/// Parses a decimal coin amount with at most eight fractional digits into base units.
pub fn parse_amount(value: &str) -> Result<Amount, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("amount is empty".to_string());
    }
    if value.starts_with('-') {
        return Err("amount must be >= 0".to_string());
    }

    let (whole, frac) = match value.split_once('.') {
        Some((whole, frac)) => (whole, Some(frac)),
        None => (value, None),
    };
    if whole.is_empty() && frac.is_none() {
        return Err(format!("invalid amount '{value}'"));
    }

    let whole = if whole.is_empty() {
        0i64
    } else {
        whole
            .parse::<i64>()
            .map_err(|_| format!("invalid amount '{value}'"))?
    };

    let mut frac_value = 0i64;
    if let Some(frac) = frac {
        if frac.len() > 8 {
            return Err(format!("amount has too many decimal places '{value}'"));
        }
        if !frac.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(format!("invalid amount '{value}'"));
        }
        let mut frac_str = frac.to_string();
        while frac_str.len() < 8 {
            frac_str.push('0');
        }
        frac_value = frac_str
            .parse::<i64>()
            .map_err(|_| format!("invalid amount '{value}'"))?;
    }

    let amount = whole
        .checked_mul(COIN)
        .and_then(|whole| whole.checked_add(frac_value))
        .ok_or_else(|| format!("amount out of range '{value}'"))?;
    if !money_range(amount) {
        return Err(format!("amount out of range '{value}'"));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conf_parsing_handles_comments_and_bare_keys() {
        let conf = parse_conf(
            "# comment\nPayTxFee=0.0001 ; inline\nsuperstaking\n\n;skip=1\ndebug=yupost_wallet::stake=debug\ndebug=yupost_storage=trace\n",
        );
        assert_eq!(conf["paytxfee"], vec!["0.0001".to_string()]);
        assert_eq!(conf["superstaking"], vec!["1".to_string()]);
        assert_eq!(conf["debug"].len(), 2);
        assert!(!conf.contains_key("skip"));
    }

    #[test]
    fn config_from_conf_applies_values() {
        let conf = parse_conf(
            "paytxfee=0.0001\nmaxtxfee=0.5\nwalletrbf=1\nstakesearchinterval=10\nnetwork=regtest\nstakingminfee=25\nstakingminvalue=2\nreservebalance=0.5\n",
        );
        let config = WalletConfig::from_conf(&conf).expect("config");
        assert_eq!(config.pay_tx_fee.per_kb(), 10_000);
        assert_eq!(config.max_tx_fee, COIN / 2);
        assert!(config.signal_rbf);
        assert_eq!(
            config.stake_search_interval,
            Duration::from_millis(MIN_STAKE_SEARCH_INTERVAL_MS)
        );
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.staking_min_fee, 25);
        assert_eq!(config.staking_min_value, 2 * COIN);
        assert_eq!(config.reserve_balance, COIN / 2);
    }

    #[test]
    fn config_rejects_bad_values() {
        let mut config = WalletConfig::default();
        assert!(config.apply_option("stakingminfee", "101").is_err());
        assert!(config.apply_option("maxtxfee", "0").is_err());
        assert!(config.apply_option("reservebalance", "-1").is_err());
        assert!(config.apply_option("walletrbf", "maybe").is_err());
        assert_eq!(config.apply_option("rpcport", "1"), Ok(false));
    }

    #[test]
    fn parse_amount_accepts_decimal_coins() {
        assert_eq!(parse_amount("1"), Ok(COIN));
        assert_eq!(parse_amount(".5"), Ok(COIN / 2));
        assert_eq!(parse_amount("0.00000001"), Ok(1));
        assert!(parse_amount("0.000000001").is_err());
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("abc").is_err());
    }
}
