//! Target network descriptor and the guard that forces the wallet onto it

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::error::VaultError;
use crate::provider::{methods, Eip1193Provider};
use crate::session::WalletSession;

/// Native currency metadata (EIP-3085 `nativeCurrency`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// The network the client is pinned to. Serializes in the
/// `wallet_addEthereumChain` parameter shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    pub chain_id: String,
    #[serde(rename = "chainName", alias = "name")]
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub native_currency: NativeCurrency,
    pub block_explorer_urls: Vec<String>,
}

impl NetworkDescriptor {
    /// BlockDAG Primordial Testnet
    pub fn builtin() -> Self {
        Self {
            chain_id: "0x413".to_string(),
            name: "BlockDAG Primordial Testnet".to_string(),
            rpc_urls: vec!["https://rpc.primordial.bdagscan.com".to_string()],
            native_currency: NativeCurrency {
                name: "BlockDAG".to_string(),
                symbol: "BDAG".to_string(),
                decimals: 18,
            },
            block_explorer_urls: vec!["https://primordial.bdagscan.com".to_string()],
        }
    }

    /// Load network.ron from the config directory, falling back to the built-in descriptor
    pub fn load(config_dir: &Path) -> Result<Self, VaultError> {
        let network_path = config_dir.join("network.ron");

        let descriptor = if network_path.exists() {
            let content = std::fs::read_to_string(&network_path).map_err(|e| {
                VaultError::Config(format!("Failed to read {:?}: {}", network_path, e))
            })?;
            let descriptor: NetworkDescriptor = ron::from_str(&content).map_err(|e| {
                VaultError::Config(format!("Failed to parse {:?}: {}", network_path, e))
            })?;
            log::info!(
                "[network] Loaded network {} ({}) from {:?}",
                descriptor.name,
                descriptor.chain_id,
                network_path
            );
            descriptor
        } else {
            log::warn!(
                "[network] {:?} not found, using built-in network descriptor",
                network_path
            );
            Self::builtin()
        };

        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check the descriptor is well-formed before it is handed to a wallet
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.chain_id_u64().is_none() {
            return Err(VaultError::Config(format!(
                "Invalid chain id '{}': expected a 0x-prefixed hex string",
                self.chain_id
            )));
        }
        if self.rpc_urls.is_empty() {
            return Err(VaultError::Config("Network needs at least one RPC URL".to_string()));
        }
        if self.block_explorer_urls.is_empty() {
            return Err(VaultError::Config(
                "Network needs at least one block explorer URL".to_string(),
            ));
        }
        for raw in self.rpc_urls.iter().chain(self.block_explorer_urls.iter()) {
            url::Url::parse(raw)
                .map_err(|e| VaultError::Config(format!("Invalid URL '{}': {}", raw, e)))?;
        }
        Ok(())
    }

    pub fn chain_id_u64(&self) -> Option<u64> {
        parse_chain_id(&self.chain_id)
    }

    /// Whether a wallet-reported chain id refers to this network
    pub fn matches(&self, chain_id: &str) -> bool {
        match (parse_chain_id(chain_id), self.chain_id_u64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Explorer link for a transaction hash
    pub fn explorer_tx_url(&self, hash: &str) -> Option<String> {
        self.block_explorer_urls
            .first()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), hash))
    }
}

/// Parse a chain id reported by a wallet ("0x413", "0x0413", or decimal "1043")
pub fn parse_chain_id(chain_id: &str) -> Option<u64> {
    let s = chain_id.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse::<u64>().ok(),
    }
}

/// How `ensure` reached the target network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The wallet already knew the chain and switched to it
    Switched,
    /// The chain was unknown to the wallet, so it was added first
    Added,
}

/// Validates and forces the active chain to the target network
#[derive(Debug, Clone)]
pub struct NetworkGuard {
    target: Arc<NetworkDescriptor>,
}

impl NetworkGuard {
    pub fn new(target: Arc<NetworkDescriptor>) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &NetworkDescriptor {
        &self.target
    }

    /// Ask the wallet to switch to the target chain, adding it when the wallet
    /// does not know it. Session chain id is never written here; the wallet's
    /// `chainChanged` event is the source of truth.
    pub async fn ensure(&self, provider: &dyn Eip1193Provider) -> Result<EnsureOutcome, VaultError> {
        let chain_id = &self.target.chain_id;
        log::info!(
            "[network] Requesting switch to {} ({})",
            self.target.name,
            chain_id
        );

        let switch = provider
            .request(methods::SWITCH_CHAIN, json!([{ "chainId": chain_id }]))
            .await;

        match switch {
            Ok(_) => {
                log::info!("[network] Wallet switched to {}", chain_id);
                Ok(EnsureOutcome::Switched)
            }
            Err(e) if e.is_unrecognized_chain() => {
                log::info!(
                    "[network] Wallet does not know {}, adding {}",
                    chain_id,
                    self.target.name
                );
                let params = serde_json::to_value(self.target.as_ref())
                    .map_err(|e| VaultError::Config(e.to_string()))?;

                match provider.request(methods::ADD_CHAIN, json!([params])).await {
                    Ok(_) => {
                        log::info!("[network] {} added to wallet", self.target.name);
                        Ok(EnsureOutcome::Added)
                    }
                    Err(add_err) if add_err.is_user_rejection() => {
                        log::warn!("[network] User rejected adding {}", self.target.name);
                        Err(VaultError::UserRejected)
                    }
                    Err(add_err) => {
                        log::error!(
                            "[network] Error adding {} network: {}",
                            self.target.name,
                            add_err
                        );
                        Err(VaultError::NetworkUnavailable(add_err.message))
                    }
                }
            }
            Err(e) if e.is_user_rejection() => {
                log::warn!("[network] User rejected switching to {}", chain_id);
                Err(VaultError::UserRejected)
            }
            Err(e) => {
                log::error!("[network] Error switching to {}: {}", chain_id, e);
                Err(VaultError::NetworkUnavailable(e.message))
            }
        }
    }

    /// Synchronous pre-submission check against the current session
    pub fn check(&self, session: &WalletSession) -> Result<(), VaultError> {
        match session.chain_id.as_deref() {
            Some(current) if self.target.matches(current) => Ok(()),
            other => Err(VaultError::WrongNetwork {
                expected: self.target.chain_id.clone(),
                actual: other.map(str::to_string),
            }),
        }
    }
}
