use ethers::types::U256;
use std::env;
use std::path::{Path, PathBuf};

use crate::amount::parse_u256;
use crate::error::VaultError;

pub const DEFAULT_DATABASE_URL: &str = "./.db/vaultspark.db";
pub const DEFAULT_GAS_PRICE_WEI: u64 = 1_000_000_000;

#[derive(Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    /// Overrides the first RPC URL of the network descriptor
    pub rpc_url: Option<String>,
    pub wallet_private_key: Option<String>,
    pub database_url: String,
    pub user_id: Option<String>,
    pub gas_price_wei: U256,
    pub wallet_preauthorized: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("config_dir", &self.config_dir)
            .field("rpc_url", &self.rpc_url)
            .field(
                "wallet_private_key",
                &self.wallet_private_key.as_ref().map(|_| "<redacted>"),
            )
            .field("database_url", &self.database_url)
            .field("user_id", &self.user_id)
            .field("gas_price_wei", &self.gas_price_wei)
            .field("wallet_preauthorized", &self.wallet_preauthorized)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, VaultError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, VaultError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let gas_price_wei = match get("VAULT_GAS_PRICE_WEI") {
            Some(raw) => parse_u256(&raw)
                .map_err(|e| VaultError::Config(format!("VAULT_GAS_PRICE_WEI: {}", e)))?,
            None => U256::from(DEFAULT_GAS_PRICE_WEI),
        };

        let wallet_preauthorized = match get("WALLET_PREAUTHORIZED") {
            Some(raw) => parse_flag(&raw).ok_or_else(|| {
                VaultError::Config(format!("WALLET_PREAUTHORIZED must be true or false, got '{}'", raw))
            })?,
            None => true,
        };

        Ok(Self {
            config_dir: resolve_config_dir(get("VAULT_CONFIG_DIR")),
            rpc_url: get("VAULT_RPC_URL"),
            wallet_private_key: get("WALLET_PRIVATE_KEY"),
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            user_id: get("VAULT_USER_ID"),
            gas_price_wei,
            wallet_preauthorized,
        })
    }
}

/// Explicit directory, else ./config, else ../config (running from a subdirectory)
pub fn resolve_config_dir(explicit: Option<String>) -> PathBuf {
    if let Some(dir) = explicit {
        return PathBuf::from(dir);
    }
    if Path::new("./config").exists() {
        PathBuf::from("./config")
    } else if Path::new("../config").exists() {
        PathBuf::from("../config")
    } else {
        log::warn!("Config directory not found in ./config or ../config, using built-in defaults");
        PathBuf::from("./config")
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, VaultError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("VAULT_CONFIG_DIR", "/tmp/vault-config")]).unwrap();
        assert_eq!(config.config_dir, PathBuf::from("/tmp/vault-config"));
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.gas_price_wei, U256::from(DEFAULT_GAS_PRICE_WEI));
        assert!(config.wallet_preauthorized);
        assert!(config.wallet_private_key.is_none());
        assert!(config.rpc_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("VAULT_RPC_URL", "http://127.0.0.1:8545"),
            ("WALLET_PRIVATE_KEY", "0xabc"),
            ("VAULT_GAS_PRICE_WEI", "0x77359400"),
            ("WALLET_PREAUTHORIZED", "no"),
            ("VAULT_USER_ID", "alice"),
        ])
        .unwrap();
        assert_eq!(config.rpc_url.as_deref(), Some("http://127.0.0.1:8545"));
        assert_eq!(config.gas_price_wei, U256::from(2_000_000_000u64));
        assert!(!config.wallet_preauthorized);
        assert_eq!(config.user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = config(&[("WALLET_PRIVATE_KEY", "  ")]).unwrap();
        assert!(config.wallet_private_key.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("VAULT_GAS_PRICE_WEI", "cheap")]),
            Err(VaultError::Config(_))
        ));
        assert!(matches!(
            config(&[("WALLET_PREAUTHORIZED", "maybe")]),
            Err(VaultError::Config(_))
        ));
    }

    #[test]
    fn test_private_key_redacted_in_debug() {
        let config = config(&[("WALLET_PRIVATE_KEY", "0xsecret")]).unwrap();
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
