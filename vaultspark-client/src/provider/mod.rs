//! EIP-1193 provider port
//!
//! The injected wallet is modelled as a JSON-RPC style `request` entry point
//! plus an event stream for `accountsChanged` / `chainChanged`. The session,
//! network guard and pipeline only ever talk to a wallet through this trait.

pub mod local;
#[cfg(test)]
pub mod mock;

pub use local::LocalWalletProvider;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Provider methods consumed by this crate
pub mod methods {
    pub const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    pub const ACCOUNTS: &str = "eth_accounts";
    pub const CHAIN_ID: &str = "eth_chainId";
    pub const SWITCH_CHAIN: &str = "wallet_switchEthereumChain";
    pub const ADD_CHAIN: &str = "wallet_addEthereumChain";
    pub const ESTIMATE_GAS: &str = "eth_estimateGas";
    pub const GAS_PRICE: &str = "eth_gasPrice";
    pub const CALL: &str = "eth_call";
    pub const SEND_TRANSACTION: &str = "eth_sendTransaction";
}

/// Error codes defined by EIP-1193 / EIP-3326 and JSON-RPC
pub mod codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL: i64 = -32603;
}

/// Identity of a provider instance, used to install event listeners once per instance
pub type ProviderId = u64;

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique provider id
pub fn next_provider_id() -> ProviderId {
    NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Provider error object (`{ code, message, data }`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProviderError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(codes::USER_REJECTED, "User rejected the request")
    }

    pub fn unauthorized() -> Self {
        Self::new(codes::UNAUTHORIZED, "The requested account has not been authorized")
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(codes::UNSUPPORTED_METHOD, format!("Unsupported method: {}", method))
    }

    pub fn unrecognized_chain(chain_id: &str) -> Self {
        Self::new(
            codes::UNRECOGNIZED_CHAIN,
            format!("Unrecognized chain ID \"{}\". Try adding the chain first.", chain_id),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL, message)
    }

    pub fn is_user_rejection(&self) -> bool {
        if self.code == codes::USER_REJECTED {
            return true;
        }
        let lower = self.message.to_lowercase();
        lower.contains("user rejected") || lower.contains("user denied")
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == codes::UNRECOGNIZED_CHAIN
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for ProviderError {}

/// Events pushed by the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
}

/// Transaction / call object passed to `eth_estimateGas`, `eth_call` and
/// `eth_sendTransaction`. Quantities serialize as 0x-prefixed hex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
}

/// The injected wallet
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    /// Stable identity of this provider instance
    fn id(&self) -> ProviderId;

    /// Issue a JSON-RPC style request
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;

    /// Subscribe to wallet events
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Parse an `eth_requestAccounts` / `eth_accounts` result
pub fn parse_accounts(value: Value) -> Result<Vec<String>, ProviderError> {
    serde_json::from_value::<Vec<String>>(value)
        .map_err(|e| ProviderError::internal(format!("Malformed accounts response: {}", e)))
}

/// Parse a hex quantity result (`eth_estimateGas`, `eth_gasPrice`)
pub fn parse_quantity(value: &Value) -> Result<U256, ProviderError> {
    let s = value
        .as_str()
        .ok_or_else(|| ProviderError::internal(format!("Expected hex quantity, got {}", value)))?;
    crate::amount::parse_u256(s).map_err(ProviderError::internal)
}

/// Parse an `eth_call` result
pub fn parse_bytes(value: &Value) -> Result<Bytes, ProviderError> {
    let s = value
        .as_str()
        .ok_or_else(|| ProviderError::internal(format!("Expected hex data, got {}", value)))?;
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(hex_str)
        .map(Bytes::from)
        .map_err(|e| ProviderError::internal(format!("Invalid hex data: {}", e)))
}
