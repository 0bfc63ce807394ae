//! Local-key wallet
//!
//! Serves the EIP-1193 surface from a private key and an HTTP RPC endpoint,
//! the way a browser wallet would: accounts are withheld until
//! `eth_requestAccounts`, chains must be added before they can be switched to,
//! and `eth_sendTransaction` signs locally before broadcasting the raw bytes.

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError as RpcProviderError, RpcError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

use super::{
    methods, next_provider_id, CallRequest, Eip1193Provider, ProviderError, ProviderEvent,
    ProviderId,
};
use crate::network::parse_chain_id;

#[derive(Clone)]
struct ActiveChain {
    id: u64,
    rpc: Provider<Http>,
}

pub struct LocalWalletProvider {
    id: ProviderId,
    wallet: LocalWallet,
    bootstrap: Provider<Http>,
    active: Mutex<Option<ActiveChain>>,
    known: Mutex<HashMap<u64, Provider<Http>>>,
    authorized: AtomicBool,
    events: broadcast::Sender<ProviderEvent>,
}

impl LocalWalletProvider {
    /// `preauthorized` mirrors a wallet that already approved this client,
    /// so `eth_accounts` answers without a prompt.
    pub fn new(private_key: &str, rpc_url: &str, preauthorized: bool) -> Result<Self, ProviderError> {
        let wallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| ProviderError::invalid_params(format!("Invalid private key: {}", e)))?;
        let bootstrap = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ProviderError::invalid_params(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;
        let (events, _) = broadcast::channel(64);

        log::info!(
            "[wallet] Local wallet {:?} using RPC {}",
            wallet.address(),
            rpc_url
        );

        Ok(Self {
            id: next_provider_id(),
            wallet,
            bootstrap,
            active: Mutex::new(None),
            known: Mutex::new(HashMap::new()),
            authorized: AtomicBool::new(preauthorized),
            events,
        })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    fn account(&self) -> String {
        format!("{:?}", self.wallet.address())
    }

    /// Active chain, resolving the bootstrap endpoint's chain id on first use
    async fn active_chain(&self) -> Result<ActiveChain, ProviderError> {
        if let Some(active) = self.active.lock().clone() {
            return Ok(active);
        }

        let id = self
            .bootstrap
            .get_chainid()
            .await
            .map_err(rpc_error)?
            .as_u64();
        let active = ActiveChain {
            id,
            rpc: self.bootstrap.clone(),
        };
        self.known.lock().insert(id, self.bootstrap.clone());
        *self.active.lock() = Some(active.clone());
        log::debug!("[wallet] Bootstrap endpoint is chain {:#x}", id);
        Ok(active)
    }

    fn require_authorized(&self) -> Result<(), ProviderError> {
        if self.authorized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ProviderError::unauthorized())
        }
    }

    fn set_active(&self, id: u64, rpc: Provider<Http>) {
        let previous = self
            .active
            .lock()
            .replace(ActiveChain { id, rpc })
            .map(|a| a.id);
        if previous != Some(id) {
            log::info!("[wallet] Active chain is now {:#x}", id);
            let _ = self.events.send(ProviderEvent::ChainChanged(format!("{:#x}", id)));
        }
    }

    async fn switch_chain(&self, params: &Value) -> Result<Value, ProviderError> {
        let raw = params[0]["chainId"]
            .as_str()
            .ok_or_else(|| ProviderError::invalid_params("Missing chainId"))?;
        let target = parse_chain_id(raw)
            .ok_or_else(|| ProviderError::invalid_params(format!("Invalid chainId {}", raw)))?;

        // Make sure the bootstrap chain is registered before looking the target up
        self.active_chain().await?;

        let rpc = self.known.lock().get(&target).cloned();
        match rpc {
            Some(rpc) => {
                self.set_active(target, rpc);
                Ok(Value::Null)
            }
            None => Err(ProviderError::unrecognized_chain(raw)),
        }
    }

    async fn add_chain(&self, params: &Value) -> Result<Value, ProviderError> {
        let raw = params[0]["chainId"]
            .as_str()
            .ok_or_else(|| ProviderError::invalid_params("Missing chainId"))?;
        let target = parse_chain_id(raw)
            .ok_or_else(|| ProviderError::invalid_params(format!("Invalid chainId {}", raw)))?;
        let rpc_url = params[0]["rpcUrls"][0]
            .as_str()
            .ok_or_else(|| ProviderError::invalid_params("Missing rpcUrls"))?;

        let rpc = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ProviderError::invalid_params(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;
        let reported = rpc.get_chainid().await.map_err(rpc_error)?.as_u64();
        if reported != target {
            return Err(ProviderError::internal(format!(
                "RPC endpoint {} reports chain {:#x}, expected {:#x}",
                rpc_url, reported, target
            )));
        }

        log::info!("[wallet] Added chain {:#x} via {}", target, rpc_url);
        self.known.lock().insert(target, rpc.clone());
        self.set_active(target, rpc);
        Ok(Value::Null)
    }

    async fn send_transaction(&self, params: &Value) -> Result<Value, ProviderError> {
        self.require_authorized()?;
        let request = call_request(params)?;
        let from = self.wallet.address();
        if let Some(requested) = request.from {
            if requested != from {
                return Err(ProviderError::unauthorized());
            }
        }

        let chain = self.active_chain().await?;
        let nonce = chain
            .rpc
            .get_transaction_count(from, None)
            .await
            .map_err(rpc_error)?;

        let mut typed = typed_transaction(&request, from);
        let gas = match request.gas {
            Some(gas) => gas,
            None => {
                let estimate = chain.rpc.estimate_gas(&typed, None).await.map_err(rpc_error)?;
                estimate.saturating_mul(U256::from(120u64)) / 100
            }
        };
        let gas_price = match request.gas_price {
            Some(price) => price,
            None => chain.rpc.get_gas_price().await.map_err(rpc_error)?,
        };
        typed.set_nonce(nonce);
        typed.set_gas(gas);
        typed.set_gas_price(gas_price);
        typed.set_chain_id(chain.id);

        log::info!(
            "[wallet] Signing tx: to={:?}, value={}, gas={}, gas_price={}, nonce={} on {:#x}",
            request.to,
            request.value.unwrap_or_default(),
            gas,
            gas_price,
            nonce,
            chain.id
        );

        let signature = self
            .wallet
            .clone()
            .with_chain_id(chain.id)
            .sign_transaction(&typed)
            .await
            .map_err(|e| ProviderError::internal(format!("Failed to sign transaction: {}", e)))?;
        let raw = typed.rlp_signed(&signature);

        let pending = chain.rpc.send_raw_transaction(raw).await.map_err(rpc_error)?;
        let hash = pending.tx_hash();
        log::info!("[wallet] Broadcast {:?}", hash);
        Ok(json!(format!("{:?}", hash)))
    }
}

#[async_trait]
impl Eip1193Provider for LocalWalletProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        log::debug!("[wallet] {} {}", method, params);

        match method {
            methods::REQUEST_ACCOUNTS => {
                self.authorized.store(true, Ordering::Release);
                Ok(json!([self.account()]))
            }
            methods::ACCOUNTS => {
                if self.authorized.load(Ordering::Acquire) {
                    Ok(json!([self.account()]))
                } else {
                    Ok(json!([]))
                }
            }
            methods::CHAIN_ID => {
                let chain = self.active_chain().await?;
                Ok(json!(format!("{:#x}", chain.id)))
            }
            methods::SWITCH_CHAIN => self.switch_chain(&params).await,
            methods::ADD_CHAIN => self.add_chain(&params).await,
            methods::ESTIMATE_GAS => {
                let request = call_request(&params)?;
                let chain = self.active_chain().await?;
                let tx = typed_transaction(&request, self.wallet.address());
                let gas = chain.rpc.estimate_gas(&tx, None).await.map_err(rpc_error)?;
                Ok(json!(format!("{:#x}", gas)))
            }
            methods::GAS_PRICE => {
                let chain = self.active_chain().await?;
                let price = chain.rpc.get_gas_price().await.map_err(rpc_error)?;
                Ok(json!(format!("{:#x}", price)))
            }
            methods::CALL => {
                let request = call_request(&params)?;
                let chain = self.active_chain().await?;
                let tx = typed_transaction(&request, self.wallet.address());
                let data = chain.rpc.call(&tx, None).await.map_err(rpc_error)?;
                Ok(json!(format!("0x{}", hex::encode(data))))
            }
            methods::SEND_TRANSACTION => self.send_transaction(&params).await,
            other => Err(ProviderError::unsupported_method(other)),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

fn call_request(params: &Value) -> Result<CallRequest, ProviderError> {
    serde_json::from_value(params[0].clone())
        .map_err(|e| ProviderError::invalid_params(format!("Invalid transaction object: {}", e)))
}

/// Legacy transaction; the target chain is pinned to fixed gas pricing
fn typed_transaction(request: &CallRequest, from: Address) -> TypedTransaction {
    let mut tx = TransactionRequest::new().from(request.from.unwrap_or(from));
    if let Some(to) = request.to {
        tx = tx.to(to);
    }
    if let Some(value) = request.value {
        tx = tx.value(value);
    }
    if let Some(data) = &request.data {
        tx = tx.data(data.clone());
    }
    if let Some(gas) = request.gas {
        tx = tx.gas(gas);
    }
    if let Some(price) = request.gas_price {
        tx = tx.gas_price(price);
    }
    tx.into()
}

/// Keep the node's JSON-RPC error code and message when there is one
fn rpc_error(e: RpcProviderError) -> ProviderError {
    match RpcError::as_error_response(&e) {
        Some(resp) => ProviderError {
            code: resp.code,
            message: resp.message.clone(),
            data: resp.data.clone(),
        },
        None => ProviderError::internal(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::codes;

    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    // Nothing listens here; tests below never reach the network
    const DEAD_RPC: &str = "http://127.0.0.1:9";

    #[tokio::test]
    async fn test_accounts_withheld_until_requested() {
        let provider = LocalWalletProvider::new(TEST_KEY, DEAD_RPC, false).unwrap();

        let accounts = provider.request(methods::ACCOUNTS, json!([])).await.unwrap();
        assert_eq!(accounts, json!([]));

        let accounts = provider
            .request(methods::REQUEST_ACCOUNTS, json!([]))
            .await
            .unwrap();
        assert_eq!(accounts, json!([format!("{:?}", provider.address())]));

        let accounts = provider.request(methods::ACCOUNTS, json!([])).await.unwrap();
        assert_eq!(accounts.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_requires_authorization() {
        let provider = LocalWalletProvider::new(TEST_KEY, DEAD_RPC, false).unwrap();
        let err = provider
            .request(methods::SEND_TRANSACTION, json!([{}]))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_send_from_foreign_account_rejected() {
        let provider = LocalWalletProvider::new(TEST_KEY, DEAD_RPC, true).unwrap();
        let err = provider
            .request(
                methods::SEND_TRANSACTION,
                json!([{ "from": "0x0000000000000000000000000000000000000001" }]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let provider = LocalWalletProvider::new(TEST_KEY, DEAD_RPC, true).unwrap();
        let err = provider
            .request("eth_signTypedData_v4", json!([]))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::UNSUPPORTED_METHOD);
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(LocalWalletProvider::new("not-a-key", DEAD_RPC, true).is_err());
        assert!(LocalWalletProvider::new(TEST_KEY, "not a url", true).is_err());
    }

    #[test]
    fn test_typed_transaction_defaults_sender() {
        let from: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        let request = CallRequest {
            value: Some(U256::from(5u64)),
            ..Default::default()
        };
        let tx = typed_transaction(&request, from);
        assert_eq!(tx.from(), Some(&from));
        assert_eq!(tx.value(), Some(&U256::from(5u64)));
        assert!(tx.to().is_none());
    }

    #[test]
    fn test_transport_error_maps_to_internal() {
        let err = rpc_error(RpcProviderError::CustomError("connection refused".to_string()));
        assert_eq!(err.code, codes::INTERNAL);
        assert!(err.message.contains("connection refused"));
    }
}
