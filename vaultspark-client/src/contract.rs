//! VaultSpark contract binding
//!
//! The ABI is fixed and embedded at compile time. Callers pick a
//! `ContractMethod` and pass typed arguments; `bind` checks them against the
//! ABI shape and produces a `CallDescriptor`, which is pure data. Signing
//! calls go through `invoke` (needs a connected session), read-only calls
//! through `query` (works while disconnected).

use chrono::{DateTime, TimeZone, Utc};
use ethers::abi::{Abi, Function, StateMutability, Token};
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use strum::{Display, EnumIter, IntoStaticStr};

use crate::error::VaultError;
use crate::pipeline::submit::{GasPolicy, Submitter, TransactionOutcome};
use crate::provider::{methods, parse_bytes, CallRequest};
use crate::session::SessionHandle;

pub const VAULT_SPARK_ABI: &str = include_str!("../abi/vault_spark.json");

pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x84eA74d481Ee0A5332C457a4d796187F6Ba67fEB";

/// Closed set of contract entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter, IntoStaticStr)]
pub enum ContractMethod {
    #[strum(serialize = "swap")]
    Swap,
    #[strum(serialize = "lend")]
    Lend,
    #[strum(serialize = "borrow")]
    Borrow,
    #[strum(serialize = "withdraw")]
    Withdraw,
    #[strum(serialize = "repay")]
    Repay,
    #[strum(serialize = "calculateSwapAmount")]
    Quote,
    #[strum(serialize = "getUserLendPositions")]
    LendPositions,
    #[strum(serialize = "getUserBorrowPositions")]
    BorrowPositions,
}

impl ContractMethod {
    /// Function name in the ABI
    pub fn abi_name(&self) -> &'static str {
        self.into()
    }

    /// Read-only methods are served by `query`, never signed
    pub fn is_view(&self) -> bool {
        matches!(
            self,
            ContractMethod::Quote | ContractMethod::LendPositions | ContractMethod::BorrowPositions
        )
    }
}

/// Typed call argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArg {
    Address(Address),
    Uint(U256),
}

impl From<CallArg> for Token {
    fn from(arg: CallArg) -> Self {
        match arg {
            CallArg::Address(a) => Token::Address(a),
            CallArg::Uint(v) => Token::Uint(v),
        }
    }
}

/// A bound contract call, ready to encode
#[derive(Debug, Clone, PartialEq)]
pub struct CallDescriptor {
    pub method: ContractMethod,
    pub args: Vec<Token>,
    /// Native value attached to the call, in base units
    pub native_value: U256,
    /// Caller-supplied gas ceiling; never lowered by the pipeline
    pub gas_limit_hint: Option<U256>,
}

impl CallDescriptor {
    pub fn with_value(mut self, value: U256) -> Self {
        self.native_value = value;
        self
    }

    pub fn with_gas_limit(mut self, gas: Option<U256>) -> Self {
        self.gas_limit_hint = gas;
        self
    }
}

/// Deployed contract settings (contract.ron)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    pub address: String,
    #[serde(default)]
    pub gas: GasPolicy,
}

impl ContractConfig {
    pub fn builtin() -> Self {
        Self {
            address: DEFAULT_CONTRACT_ADDRESS.to_string(),
            gas: GasPolicy::default(),
        }
    }

    /// Load contract.ron, falling back to the deployed address and default ceilings
    pub fn load(config_dir: &Path) -> Result<Self, VaultError> {
        let path = config_dir.join("contract.ron");
        if !path.exists() {
            log::warn!("[gateway] {:?} not found, using built-in contract settings", path);
            return Ok(Self::builtin());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| VaultError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        let config: ContractConfig = ron::from_str(&content)
            .map_err(|e| VaultError::Config(format!("Failed to parse {:?}: {}", path, e)))?;
        config.parsed_address()?;
        log::info!("[gateway] Contract {} loaded from {:?}", config.address, path);
        Ok(config)
    }

    pub fn parsed_address(&self) -> Result<Address, VaultError> {
        self.address
            .parse::<Address>()
            .map_err(|_| VaultError::Config(format!("Invalid contract address '{}'", self.address)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LendPosition {
    pub index: usize,
    pub amount: U256,
    pub timestamp: DateTime<Utc>,
    pub token: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BorrowPosition {
    pub index: usize,
    pub amount: U256,
    pub collateral: U256,
    pub timestamp: DateTime<Utc>,
    pub token: Address,
    pub collateral_token: Address,
}

pub struct ContractGateway {
    abi: Abi,
    address: Address,
    session: SessionHandle,
    submitter: Submitter,
}

impl ContractGateway {
    pub fn new(address: Address, session: SessionHandle, submitter: Submitter) -> Result<Self, VaultError> {
        let abi: Abi = serde_json::from_str(VAULT_SPARK_ABI)
            .map_err(|e| VaultError::Config(format!("Embedded ABI is invalid: {}", e)))?;
        Ok(Self {
            abi,
            address,
            session,
            submitter,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn function(&self, method: ContractMethod) -> Result<&Function, VaultError> {
        self.abi.function(method.abi_name()).map_err(|e| {
            VaultError::Config(format!("ABI has no function {}: {}", method.abi_name(), e))
        })
    }

    /// Check arguments against the ABI shape. No session required.
    pub fn bind(&self, method: ContractMethod, args: Vec<CallArg>) -> Result<CallDescriptor, VaultError> {
        let function = self.function(method)?;

        if args.len() != function.inputs.len() {
            return Err(VaultError::InvalidArguments(format!(
                "{} expects {} arguments, got {}",
                method,
                function.inputs.len(),
                args.len()
            )));
        }

        let tokens: Vec<Token> = args.into_iter().map(Token::from).collect();
        for (token, param) in tokens.iter().zip(function.inputs.iter()) {
            if !token.type_check(&param.kind) {
                return Err(VaultError::InvalidArguments(format!(
                    "{}: argument '{}' must be {}, got {}",
                    method, param.name, param.kind, token
                )));
            }
        }

        Ok(CallDescriptor {
            method,
            args: tokens,
            native_value: U256::zero(),
            gas_limit_hint: None,
        })
    }

    /// ABI-encoded calldata for a descriptor
    pub fn encode(&self, descriptor: &CallDescriptor) -> Result<Bytes, VaultError> {
        self.function(descriptor.method)?
            .encode_input(&descriptor.args)
            .map(Bytes::from)
            .map_err(|e| VaultError::InvalidArguments(format!("{}: {}", descriptor.method, e)))
    }

    /// Sign and submit a state-changing call
    pub async fn invoke(&self, descriptor: &CallDescriptor) -> Result<TransactionOutcome, VaultError> {
        if !self.session.snapshot().connected {
            return Err(VaultError::NotConnected);
        }
        if descriptor.method.is_view() {
            return Err(VaultError::InvalidArguments(format!(
                "{} is read-only; use query",
                descriptor.method
            )));
        }

        let function = self.function(descriptor.method)?;
        if !descriptor.native_value.is_zero() && function.state_mutability != StateMutability::Payable {
            return Err(VaultError::InvalidArguments(format!(
                "{} does not accept native value",
                descriptor.method
            )));
        }

        let data = self.encode(descriptor)?;
        self.submitter
            .submit(&self.session, self.address, descriptor, data)
            .await
    }

    /// Read-only `eth_call`; decoded return values
    pub async fn query(&self, descriptor: &CallDescriptor) -> Result<Vec<Token>, VaultError> {
        let provider = self.session.provider().ok_or(VaultError::ProviderUnavailable)?;
        let function = self.function(descriptor.method)?;
        let data = self.encode(descriptor)?;

        let from = self
            .session
            .snapshot()
            .address
            .and_then(|a| a.parse::<Address>().ok());
        let request = CallRequest {
            from,
            to: Some(self.address),
            data: Some(data),
            ..Default::default()
        };

        log::debug!("[gateway] eth_call {}", descriptor.method);
        let raw = provider
            .request(methods::CALL, json!([request, "latest"]))
            .await
            .and_then(|v| parse_bytes(&v))
            .map_err(|e| {
                log::warn!("[gateway] {} call failed: {}", descriptor.method, e);
                VaultError::ContractUnreachable(e.message)
            })?;

        function.decode_output(&raw).map_err(|e| {
            VaultError::ContractUnreachable(format!(
                "Could not decode {} result: {}",
                descriptor.method, e
            ))
        })
    }

    /// `calculateSwapAmount`, in base units of the output token
    pub async fn quote(&self, token_in: Address, token_out: Address, amount_in: U256) -> Result<U256, VaultError> {
        let descriptor = self.bind(
            ContractMethod::Quote,
            vec![
                CallArg::Address(token_in),
                CallArg::Address(token_out),
                CallArg::Uint(amount_in),
            ],
        )?;
        let tokens = self.query(&descriptor).await?;
        match tokens.first() {
            Some(token) => uint(token),
            None => Err(VaultError::ContractUnreachable(
                "calculateSwapAmount returned nothing".to_string(),
            )),
        }
    }

    pub async fn lend_positions(&self, user: Address) -> Result<Vec<LendPosition>, VaultError> {
        let descriptor = self.bind(ContractMethod::LendPositions, vec![CallArg::Address(user)])?;
        let rows = tuple_rows(self.query(&descriptor).await?)?;

        rows.iter()
            .enumerate()
            .map(|(index, fields)| match fields.as_slice() {
                [amount, timestamp, token] => Ok(LendPosition {
                    index,
                    amount: uint(amount)?,
                    timestamp: to_datetime(uint(timestamp)?)?,
                    token: address(token)?,
                }),
                _ => Err(shape_error("lend position", fields.len())),
            })
            .collect()
    }

    pub async fn borrow_positions(&self, user: Address) -> Result<Vec<BorrowPosition>, VaultError> {
        let descriptor = self.bind(ContractMethod::BorrowPositions, vec![CallArg::Address(user)])?;
        let rows = tuple_rows(self.query(&descriptor).await?)?;

        rows.iter()
            .enumerate()
            .map(|(index, fields)| match fields.as_slice() {
                [amount, collateral, timestamp, token, collateral_token] => Ok(BorrowPosition {
                    index,
                    amount: uint(amount)?,
                    collateral: uint(collateral)?,
                    timestamp: to_datetime(uint(timestamp)?)?,
                    token: address(token)?,
                    collateral_token: address(collateral_token)?,
                }),
                _ => Err(shape_error("borrow position", fields.len())),
            })
            .collect()
    }
}

fn tuple_rows(tokens: Vec<Token>) -> Result<Vec<Vec<Token>>, VaultError> {
    match tokens.into_iter().next() {
        Some(Token::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Token::Tuple(fields) => Ok(fields),
                other => Err(VaultError::ContractUnreachable(format!(
                    "Expected tuple, got {}",
                    other
                ))),
            })
            .collect(),
        Some(other) => Err(VaultError::ContractUnreachable(format!(
            "Expected position array, got {}",
            other
        ))),
        None => Ok(Vec::new()),
    }
}

fn uint(token: &Token) -> Result<U256, VaultError> {
    token
        .clone()
        .into_uint()
        .ok_or_else(|| VaultError::ContractUnreachable(format!("Expected uint, got {}", token)))
}

fn address(token: &Token) -> Result<Address, VaultError> {
    token
        .clone()
        .into_address()
        .ok_or_else(|| VaultError::ContractUnreachable(format!("Expected address, got {}", token)))
}

fn to_datetime(seconds: U256) -> Result<DateTime<Utc>, VaultError> {
    if seconds > U256::from(i64::MAX as u64) {
        return Err(VaultError::ContractUnreachable(format!(
            "Timestamp out of range: {}",
            seconds
        )));
    }
    Utc.timestamp_opt(seconds.as_u64() as i64, 0)
        .single()
        .ok_or_else(|| VaultError::ContractUnreachable(format!("Invalid timestamp: {}", seconds)))
}

fn shape_error(what: &str, fields: usize) -> VaultError {
    VaultError::ContractUnreachable(format!("Unexpected {} shape: {} fields", what, fields))
}
