//! Scripted in-memory wallet for tests
//!
//! Behaves like a browser wallet: chains must be known before switching,
//! adding a chain switches to it, and every request is recorded.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

use super::{
    methods, next_provider_id, Eip1193Provider, ProviderError, ProviderEvent, ProviderId,
};
use crate::network::parse_chain_id;

pub const MOCK_ACCOUNT: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";

#[derive(Debug, Default)]
struct MockState {
    accounts: Vec<String>,
    authorized: bool,
    chain_id: String,
    known_chains: HashSet<u64>,
    requests: Vec<(String, Value)>,
    sent: u64,
    request_accounts_error: Option<ProviderError>,
    switch_error: Option<ProviderError>,
    add_chain_error: Option<ProviderError>,
    estimate_error: Option<ProviderError>,
    gas_price_error: Option<ProviderError>,
    send_error: Option<ProviderError>,
    call_error: Option<ProviderError>,
    estimate_result: Option<Value>,
    call_result: Option<Value>,
}

pub struct MockProvider {
    id: ProviderId,
    state: Mutex<MockState>,
    events: broadcast::Sender<ProviderEvent>,
    send_gate: Option<Arc<Notify>>,
}

impl MockProvider {
    /// Authorized wallet with one account, on chain 0x1
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        let mut known_chains = HashSet::new();
        known_chains.insert(1);

        Self {
            id: next_provider_id(),
            state: Mutex::new(MockState {
                accounts: vec![MOCK_ACCOUNT.to_string()],
                authorized: true,
                chain_id: "0x1".to_string(),
                known_chains,
                ..Default::default()
            }),
            events,
            send_gate: None,
        }
    }

    pub fn with_accounts(self, accounts: Vec<&str>) -> Self {
        self.state.lock().accounts = accounts.into_iter().map(str::to_string).collect();
        self
    }

    /// `eth_accounts` returns nothing until `eth_requestAccounts` is approved
    pub fn unauthorized(self) -> Self {
        self.state.lock().authorized = false;
        self
    }

    pub fn with_chain(self, chain_id: &str) -> Self {
        {
            let mut state = self.state.lock();
            state.chain_id = chain_id.to_string();
            if let Some(id) = parse_chain_id(chain_id) {
                state.known_chains.insert(id);
            }
        }
        self
    }

    pub fn with_known_chain(self, chain_id: &str) -> Self {
        if let Some(id) = parse_chain_id(chain_id) {
            self.state.lock().known_chains.insert(id);
        }
        self
    }

    pub fn with_request_accounts_error(self, err: ProviderError) -> Self {
        self.state.lock().request_accounts_error = Some(err);
        self
    }

    pub fn with_switch_error(self, err: ProviderError) -> Self {
        self.state.lock().switch_error = Some(err);
        self
    }

    pub fn with_add_chain_error(self, err: ProviderError) -> Self {
        self.state.lock().add_chain_error = Some(err);
        self
    }

    pub fn with_estimate_error(self, err: ProviderError) -> Self {
        self.state.lock().estimate_error = Some(err);
        self
    }

    pub fn with_estimate(self, gas: u64) -> Self {
        self.with_estimate_raw(&format!("{:#x}", gas))
    }

    /// Hex quantity returned verbatim from `eth_estimateGas`
    pub fn with_estimate_raw(self, quantity: &str) -> Self {
        self.state.lock().estimate_result = Some(json!(quantity));
        self
    }

    pub fn with_gas_price_error(self, err: ProviderError) -> Self {
        self.state.lock().gas_price_error = Some(err);
        self
    }

    pub fn with_send_error(self, err: ProviderError) -> Self {
        self.state.lock().send_error = Some(err);
        self
    }

    pub fn with_call_result(self, data: &str) -> Self {
        self.state.lock().call_result = Some(json!(data));
        self
    }

    pub fn with_call_error(self, err: ProviderError) -> Self {
        self.state.lock().call_error = Some(err);
        self
    }

    /// Hold every `eth_sendTransaction` until the gate is notified
    pub fn with_send_gate(mut self, gate: Arc<Notify>) -> Self {
        self.send_gate = Some(gate);
        self
    }

    pub fn set_send_error(&self, err: Option<ProviderError>) {
        self.state.lock().send_error = err;
    }

    /// Push a wallet event to subscribers
    pub fn emit(&self, event: ProviderEvent) {
        if let ProviderEvent::ChainChanged(chain_id) = &event {
            self.state.lock().chain_id = chain_id.clone();
        }
        let _ = self.events.send(event);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.state
            .lock()
            .requests
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
    }

    pub fn methods_called(&self) -> Vec<String> {
        self.state
            .lock()
            .requests
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn switch_to(&self, chain_id: &str) {
        let changed = {
            let mut state = self.state.lock();
            let changed = parse_chain_id(&state.chain_id) != parse_chain_id(chain_id);
            state.chain_id = chain_id.to_string();
            changed
        };
        if changed {
            let _ = self
                .events
                .send(ProviderEvent::ChainChanged(chain_id.to_string()));
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Eip1193Provider for MockProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.state
            .lock()
            .requests
            .push((method.to_string(), params.clone()));

        match method {
            methods::REQUEST_ACCOUNTS => {
                let mut state = self.state.lock();
                if let Some(err) = state.request_accounts_error.clone() {
                    return Err(err);
                }
                state.authorized = true;
                Ok(json!(state.accounts))
            }
            methods::ACCOUNTS => {
                let state = self.state.lock();
                if state.authorized {
                    Ok(json!(state.accounts))
                } else {
                    Ok(json!([]))
                }
            }
            methods::CHAIN_ID => Ok(json!(self.state.lock().chain_id)),
            methods::SWITCH_CHAIN => {
                let target = params[0]["chainId"]
                    .as_str()
                    .ok_or_else(|| ProviderError::invalid_params("Missing chainId"))?
                    .to_string();
                let known = {
                    let state = self.state.lock();
                    if let Some(err) = state.switch_error.clone() {
                        return Err(err);
                    }
                    parse_chain_id(&target)
                        .map(|id| state.known_chains.contains(&id))
                        .unwrap_or(false)
                };
                if !known {
                    return Err(ProviderError::unrecognized_chain(&target));
                }
                self.switch_to(&target);
                Ok(Value::Null)
            }
            methods::ADD_CHAIN => {
                let target = params[0]["chainId"]
                    .as_str()
                    .ok_or_else(|| ProviderError::invalid_params("Missing chainId"))?
                    .to_string();
                {
                    let mut state = self.state.lock();
                    if let Some(err) = state.add_chain_error.clone() {
                        return Err(err);
                    }
                    if let Some(id) = parse_chain_id(&target) {
                        state.known_chains.insert(id);
                    }
                }
                self.switch_to(&target);
                Ok(Value::Null)
            }
            methods::ESTIMATE_GAS => {
                let state = self.state.lock();
                match &state.estimate_error {
                    Some(err) => Err(err.clone()),
                    None => Ok(state.estimate_result.clone().unwrap_or(json!("0x186a0"))),
                }
            }
            methods::GAS_PRICE => match &self.state.lock().gas_price_error {
                Some(err) => Err(err.clone()),
                None => Ok(json!("0x3b9aca00")),
            },
            methods::CALL => {
                let state = self.state.lock();
                match &state.call_error {
                    Some(err) => Err(err.clone()),
                    None => Ok(state
                        .call_result
                        .clone()
                        .unwrap_or_else(|| json!(format!("0x{}", "0".repeat(64))))),
                }
            }
            methods::SEND_TRANSACTION => {
                if let Some(gate) = &self.send_gate {
                    gate.notified().await;
                }
                let mut state = self.state.lock();
                if let Some(err) = state.send_error.clone() {
                    return Err(err);
                }
                state.sent += 1;
                Ok(json!(format!("0x{:064x}", state.sent)))
            }
            other => Err(ProviderError::unsupported_method(other)),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}
