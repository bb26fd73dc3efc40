//! Environment-driven configuration.
//!
//! Required values fail startup with a configuration error; optional knobs
//! fall back to defaults when unset or out of range. `.env` is loaded first
//! without overriding variables already present in the real environment.

use crate::error::ConfigError;
use alloy::primitives::Address;
use std::env;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MAX_BATCH_SPAN: u64 = 1_000;
const DEFAULT_TOKEN_DECIMALS: u64 = 18;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_DB_PATH: &str = "ledger.db";

/// Immutable configuration bundle consumed by the indexing cycle. Built
/// once at startup and passed by reference; there is no shared mutable
/// client state.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub rpc_url: String,
    /// Token contract whose transfer log is scanned.
    pub contract_address: Address,
    /// Wallet known to submit mints on behalf of other actors.
    pub central_relay_address: Address,
    /// Lower scan bound when no checkpoint exists yet.
    pub deployment_block: u64,
    /// Maximum blocks per log query, bounded by provider limits.
    pub max_batch_span: u64,
    pub token_decimals: u8,
    pub poll_interval: Duration,
    pub db_path: PathBuf,
}

impl IndexerConfig {
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let rpc_url = require_env("ETH_RPC_URL")?;
        validate_http_url("ETH_RPC_URL", &rpc_url)?;

        let contract_address = parse_address_env("TOKEN_CONTRACT_ADDRESS")?;
        let central_relay_address = parse_address_env("CENTRAL_RELAY_ADDRESS")?;
        let deployment_block = require_env("DEPLOYMENT_BLOCK")?
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::Invalid(format!("DEPLOYMENT_BLOCK must be a block height: {e}"))
            })?;

        let max_batch_span = load_u64("MAX_BATCH_SPAN", DEFAULT_MAX_BATCH_SPAN, 50..=10_000);
        let token_decimals = load_u64("TOKEN_DECIMALS", DEFAULT_TOKEN_DECIMALS, 0..=36) as u8;
        let poll_interval = Duration::from_secs(load_u64(
            "POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
            5..=3_600,
        ));
        let db_path = env::var("LEDGER_DB_PATH")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
            .into();

        Ok(Self {
            rpc_url,
            contract_address,
            central_relay_address,
            deployment_block,
            max_batch_span,
            token_decimals,
            poll_interval,
            db_path,
        })
    }
}

fn require_env(name: &str) -> std::result::Result<String, ConfigError> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing(name.to_string()))
}

fn parse_address_env(name: &str) -> std::result::Result<Address, ConfigError> {
    let raw = require_env(name)?;
    Address::from_str(&raw).map_err(|e| {
        ConfigError::Invalid(format!(
            "{name} must be a 0x-prefixed address, got `{raw}`: {e}"
        ))
    })
}

fn validate_http_url(name: &str, raw: &str) -> std::result::Result<(), ConfigError> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::Invalid(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))),
    }
}

/// Out-of-range or unparsable values fall back to the default; required
/// correctness knobs go through `require_env` instead.
fn load_u64(name: &str, default: u64, range: RangeInclusive<u64>) -> u64 {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| range.contains(v))
        .unwrap_or(default)
}

/// Load `.env` into the process environment and make sure a template
/// exists for operators. Real environment variables always win.
pub fn init_env() {
    load_dot_env();
    ensure_env_example();
}

fn load_dot_env() {
    let path = Path::new(".env");
    if !path.exists() {
        return;
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ENV] Failed to read .env: {e}");
            return;
        }
    };

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        if env::var_os(key.trim()).is_some() {
            continue;
        }

        let value_no_comment = value.split('#').next().unwrap_or("").trim();
        let parsed = if value_no_comment.len() >= 2
            && ((value_no_comment.starts_with('"') && value_no_comment.ends_with('"'))
                || (value_no_comment.starts_with('\'') && value_no_comment.ends_with('\'')))
        {
            &value_no_comment[1..value_no_comment.len() - 1]
        } else {
            value_no_comment
        };
        env::set_var(key.trim(), parsed);
    }
}

fn ensure_env_example() {
    let path = Path::new(".env.example");
    if path.exists() {
        return;
    }
    let template = r#"# mintscan configuration

ETH_RPC_URL="https://mainnet.infura.io/v3/CHANGE_ME"
TOKEN_CONTRACT_ADDRESS="0x0000000000000000000000000000000000000000"
CENTRAL_RELAY_ADDRESS="0x0000000000000000000000000000000000000000"
DEPLOYMENT_BLOCK="0"

# MAX_BATCH_SPAN="1000"
# TOKEN_DECIMALS="18"
# POLL_INTERVAL_SECS="30"
# LEDGER_DB_PATH="ledger.db"

RUST_LOG="info"
"#;
    if let Err(e) = fs::write(path, template) {
        eprintln!("[ENV] Failed to write .env.example: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::{load_u64, IndexerConfig};
    use crate::error::ConfigError;
    use alloy::primitives::Address;
    use std::str::FromStr;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    const ALL_KEYS: &[&str] = &[
        "ETH_RPC_URL",
        "TOKEN_CONTRACT_ADDRESS",
        "CENTRAL_RELAY_ADDRESS",
        "DEPLOYMENT_BLOCK",
        "MAX_BATCH_SPAN",
        "TOKEN_DECIMALS",
        "POLL_INTERVAL_SECS",
        "LEDGER_DB_PATH",
    ];

    fn clear_env() {
        for key in ALL_KEYS {
            std::env::remove_var(key);
        }
    }

    fn set_required() {
        std::env::set_var("ETH_RPC_URL", "https://example.org/rpc");
        std::env::set_var(
            "TOKEN_CONTRACT_ADDRESS",
            "0x00000000000000000000000000000000000000aa",
        );
        std::env::set_var(
            "CENTRAL_RELAY_ADDRESS",
            "0x00000000000000000000000000000000000000bb",
        );
        std::env::set_var("DEPLOYMENT_BLOCK", "100");
    }

    #[test]
    fn defaults_apply_for_optional_knobs() {
        let _guard = env_lock().lock().expect("env lock");
        clear_env();
        set_required();

        let config = IndexerConfig::from_env().expect("parse should succeed");
        assert_eq!(config.max_batch_span, 1_000);
        assert_eq!(config.token_decimals, 18);
        assert_eq!(config.poll_interval.as_secs(), 30);
        assert_eq!(config.deployment_block, 100);
        assert_eq!(
            config.contract_address,
            Address::from_str("0x00000000000000000000000000000000000000aa").expect("address")
        );
        clear_env();
    }

    #[test]
    fn missing_required_address_is_fatal() {
        let _guard = env_lock().lock().expect("env lock");
        clear_env();
        set_required();
        std::env::remove_var("CENTRAL_RELAY_ADDRESS");

        let err = IndexerConfig::from_env().expect_err("parse should fail");
        assert!(matches!(err, ConfigError::Missing(ref name) if name == "CENTRAL_RELAY_ADDRESS"));
        clear_env();
    }

    #[test]
    fn malformed_contract_address_is_fatal() {
        let _guard = env_lock().lock().expect("env lock");
        clear_env();
        set_required();
        std::env::set_var("TOKEN_CONTRACT_ADDRESS", "not-an-address");

        let err = IndexerConfig::from_env().expect_err("parse should fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
        clear_env();
    }

    #[test]
    fn out_of_range_knob_falls_back_to_default() {
        let _guard = env_lock().lock().expect("env lock");
        clear_env();
        std::env::set_var("MAX_BATCH_SPAN", "999999");
        assert_eq!(load_u64("MAX_BATCH_SPAN", 1_000, 50..=10_000), 1_000);
        std::env::set_var("MAX_BATCH_SPAN", "200");
        assert_eq!(load_u64("MAX_BATCH_SPAN", 1_000, 50..=10_000), 200);
        clear_env();
    }
}
