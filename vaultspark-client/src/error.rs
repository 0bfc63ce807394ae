//! Error taxonomy for the wallet-session / contract pipeline
//!
//! `VaultError` is what every library operation returns. The facade in
//! `client.rs` turns it into a user-facing notification and an absent result.

use ethers::types::H256;
use regex::Regex;
use std::sync::OnceLock;

use crate::provider::ProviderError;

static REVERT_REASON: OnceLock<Option<Regex>> = OnceLock::new();

/// Extract the reason from "execution reverted: <reason>" style messages
pub fn revert_reason(message: &str) -> Option<String> {
    let re = REVERT_REASON
        .get_or_init(|| Regex::new(r"(?i)reverted(?: with reason string)?:?\s*'?([^'\n]+?)'?\s*$").ok())
        .as_ref()?;
    re.captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|r| !r.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// No injected wallet was detected
    ProviderUnavailable,
    /// The user declined the connection or transaction prompt
    UserRejected,
    /// A signing operation was attempted without an active session
    NotConnected,
    /// The active chain is not the target network
    WrongNetwork {
        expected: String,
        actual: Option<String>,
    },
    /// Switching to (and adding) the target network failed
    NetworkUnavailable(String),
    /// Gas estimation failed; recovered locally with the fallback ceiling
    EstimationFailed(String),
    /// The chain rejected the transaction logic
    SubmissionReverted(String),
    /// Gas-related submission failure distinct from a logic revert
    InsufficientGas(String),
    /// Anything else, message surfaced verbatim
    UnknownFailure(String),
    /// Call arguments do not match the ABI shape of the method
    InvalidArguments(String),
    /// A read-only contract call failed
    ContractUnreachable(String),
    /// A decimal amount string could not be converted to base units
    InvalidAmount(String),
    /// Another call is already in flight on this instance
    OperationInFlight(&'static str),
    /// The chain changed while the operation was running; its result is unreliable
    StaleChain { hash: Option<H256> },
    Config(String),
    Storage(String),
}

impl VaultError {
    /// Terminal errors end the current call; only estimation failures are recovered
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VaultError::EstimationFailed(_))
    }

    /// Short machine-readable kind, used in event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::ProviderUnavailable => "provider_unavailable",
            VaultError::UserRejected => "user_rejected",
            VaultError::NotConnected => "not_connected",
            VaultError::WrongNetwork { .. } => "wrong_network",
            VaultError::NetworkUnavailable(_) => "network_unavailable",
            VaultError::EstimationFailed(_) => "estimation_failed",
            VaultError::SubmissionReverted(_) => "submission_reverted",
            VaultError::InsufficientGas(_) => "insufficient_gas",
            VaultError::UnknownFailure(_) => "unknown_failure",
            VaultError::InvalidArguments(_) => "invalid_arguments",
            VaultError::ContractUnreachable(_) => "contract_unreachable",
            VaultError::InvalidAmount(_) => "invalid_amount",
            VaultError::OperationInFlight(_) => "operation_in_flight",
            VaultError::StaleChain { .. } => "stale_chain",
            VaultError::Config(_) => "config",
            VaultError::Storage(_) => "storage",
        }
    }

    /// Map a provider error from the submission path onto the taxonomy
    pub fn from_submission(err: &ProviderError) -> Self {
        if err.is_user_rejection() {
            return VaultError::UserRejected;
        }

        let message = err.message.to_lowercase();
        if message.contains("revert") {
            VaultError::SubmissionReverted(
                revert_reason(&err.message).unwrap_or_else(|| err.message.clone()),
            )
        } else if message.contains("gas") {
            VaultError::InsufficientGas(err.message.clone())
        } else {
            VaultError::UnknownFailure(err.message.clone())
        }
    }
}

impl std::fmt::Display for VaultError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultError::ProviderUnavailable => {
                write!(f, "No wallet detected. Please install a wallet to continue.")
            }
            VaultError::UserRejected => write!(f, "Request rejected in the wallet"),
            VaultError::NotConnected => write!(f, "Please connect your wallet first"),
            VaultError::WrongNetwork { expected, actual } => write!(
                f,
                "Wrong network: expected chain {}, wallet is on {}",
                expected,
                actual.as_deref().unwrap_or("an unknown chain")
            ),
            VaultError::NetworkUnavailable(e) => write!(f, "Target network unavailable: {}", e),
            VaultError::EstimationFailed(e) => write!(f, "Gas estimation failed: {}", e),
            VaultError::SubmissionReverted(e) => write!(
                f,
                "Transaction failed: contract requirements not met (insufficient liquidity, invalid tokens, or contract not deployed): {}",
                e
            ),
            VaultError::InsufficientGas(e) => {
                write!(f, "Transaction failed: insufficient gas or gas limit too low: {}", e)
            }
            VaultError::UnknownFailure(e) => write!(f, "{}", e),
            VaultError::InvalidArguments(e) => write!(f, "Invalid arguments: {}", e),
            VaultError::ContractUnreachable(e) => write!(f, "Contract call failed: {}", e),
            VaultError::InvalidAmount(e) => write!(f, "Invalid amount: {}", e),
            VaultError::OperationInFlight(op) => write!(f, "A {} is already in progress", op),
            VaultError::StaleChain { hash } => match hash {
                Some(h) => write!(
                    f,
                    "Network changed while transaction {:?} was in flight; result discarded",
                    h
                ),
                None => write!(f, "Network changed while the request was in flight; result discarded"),
            },
            VaultError::Config(e) => write!(f, "Configuration error: {}", e),
            VaultError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for VaultError {}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::Storage(e.to_string())
    }
}
