//! Token registry
//!
//! Static mapping from token symbol to on-chain address and decimals, loaded
//! once at startup from `tokens.ron` (or the built-in deployment table).
//! Unknown symbols pass through unchanged and are treated as raw addresses.

use ethers::types::{Address, H160};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::VaultError;

/// Decimals assumed for symbols not present in the registry
pub const DEFAULT_DECIMALS: u8 = 18;

/// The native asset is represented by the zero address in call arguments
pub const NATIVE_SENTINEL: Address = H160([0u8; 20]);

/// Token info as written in tokens.ron
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    pub address: String,
    pub decimals: u8,
    #[serde(default)]
    pub name: String,
}

/// A registered token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDescriptor {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    pub name: String,
}

impl TokenDescriptor {
    pub fn is_native(&self) -> bool {
        self.address == NATIVE_SENTINEL
    }
}

#[derive(Debug, Clone)]
pub struct TokenRegistry {
    tokens: HashMap<String, TokenDescriptor>,
}

impl TokenRegistry {
    /// Build a registry from symbol -> info pairs. Symbols are case-insensitive.
    pub fn from_infos(infos: HashMap<String, TokenInfo>) -> Result<Self, VaultError> {
        let mut tokens = HashMap::with_capacity(infos.len());

        for (symbol, info) in infos {
            let key = symbol.to_uppercase();
            let address: Address = info.address.parse().map_err(|_| {
                VaultError::Config(format!(
                    "Token {} has invalid address '{}'",
                    symbol, info.address
                ))
            })?;

            if tokens.contains_key(&key) {
                return Err(VaultError::Config(format!(
                    "Duplicate token symbol: {}",
                    key
                )));
            }

            tokens.insert(
                key.clone(),
                TokenDescriptor {
                    symbol: key,
                    address,
                    decimals: info.decimals,
                    name: info.name,
                },
            );
        }

        Ok(Self { tokens })
    }

    /// Tokens deployed alongside the VaultSpark contract on the BlockDAG testnet
    pub fn builtin() -> Self {
        let table = [
            ("BDAG", "0x0000000000000000000000000000000000000000", "BlockDAG"),
            ("USDT", "0x1111111111111111111111111111111111111111", "Mock USDT"),
            ("USDC", "0x2222222222222222222222222222222222222222", "Mock USDC"),
            ("ETH", "0x3333333333333333333333333333333333333333", "Wrapped ETH"),
        ];

        let tokens = table
            .iter()
            .filter_map(|(symbol, address, name)| {
                let address = address.parse::<Address>().ok()?;
                Some((
                    symbol.to_string(),
                    TokenDescriptor {
                        symbol: symbol.to_string(),
                        address,
                        decimals: DEFAULT_DECIMALS,
                        name: name.to_string(),
                    },
                ))
            })
            .collect();

        Self { tokens }
    }

    /// Load tokens.ron from the config directory, falling back to the built-in table
    pub fn load(config_dir: &Path) -> Result<Self, VaultError> {
        let tokens_path = config_dir.join("tokens.ron");

        if !tokens_path.exists() {
            log::warn!(
                "[tokens] {:?} not found, using built-in token table",
                tokens_path
            );
            return Ok(Self::builtin());
        }

        let content = std::fs::read_to_string(&tokens_path).map_err(|e| {
            VaultError::Config(format!("Failed to read {:?}: {}", tokens_path, e))
        })?;

        let infos: HashMap<String, TokenInfo> = ron::from_str(&content).map_err(|e| {
            VaultError::Config(format!("Failed to parse {:?}: {}", tokens_path, e))
        })?;

        let registry = Self::from_infos(infos)?;
        log::info!(
            "[tokens] Loaded {} tokens from {:?}",
            registry.len(),
            tokens_path
        );
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&TokenDescriptor> {
        self.tokens.get(&symbol.to_uppercase())
    }

    /// Registered address for a known symbol; unknown symbols are returned unchanged
    pub fn resolve(&self, symbol: &str) -> String {
        match self.get(symbol) {
            Some(token) => format!("{:?}", token.address),
            None => symbol.to_string(),
        }
    }

    /// Registered decimals, `DEFAULT_DECIMALS` for unknown symbols
    pub fn decimals_of(&self, symbol: &str) -> u8 {
        self.get(symbol)
            .map(|t| t.decimals)
            .unwrap_or(DEFAULT_DECIMALS)
    }

    /// Resolve to a typed address. Fails only when an unknown symbol is not a valid address either.
    pub fn resolve_address(&self, symbol: &str) -> Result<Address, VaultError> {
        if let Some(token) = self.get(symbol) {
            return Ok(token.address);
        }
        symbol.trim().parse::<Address>().map_err(|_| {
            VaultError::InvalidArguments(format!(
                "'{}' is neither a registered token nor an address",
                symbol
            ))
        })
    }

    /// Whether the symbol resolves to the native-asset sentinel
    pub fn is_native(&self, symbol: &str) -> bool {
        matches!(self.resolve_address(symbol), Ok(addr) if addr == NATIVE_SENTINEL)
    }

    /// Sorted list of registered symbols
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.tokens.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
