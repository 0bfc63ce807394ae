//! Transaction submission
//!
//! Per operation: best-effort gas estimate, gas price lookup, then
//! `eth_sendTransaction`. Stage events go out in the order
//! Estimating, Submitting, then Submitted or Failed.

use ethers::types::{Address, Bytes, H256, U256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::contract::{CallDescriptor, ContractMethod};
use crate::error::VaultError;
use crate::events::{ClientEvent, EventBroadcaster};
use crate::provider::{methods, parse_quantity, CallRequest};
use crate::session::SessionHandle;

/// Fixed per-method gas ceilings used when estimation fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasPolicy {
    pub swap: u64,
    pub lend: u64,
    pub borrow: u64,
    pub withdraw: u64,
    pub repay: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            swap: 300_000,
            lend: 250_000,
            borrow: 400_000,
            withdraw: 150_000,
            repay: 200_000,
        }
    }
}

impl GasPolicy {
    pub fn fallback(&self, method: ContractMethod) -> Option<U256> {
        let gas = match method {
            ContractMethod::Swap => self.swap,
            ContractMethod::Lend => self.lend,
            ContractMethod::Borrow => self.borrow,
            ContractMethod::Withdraw => self.withdraw,
            ContractMethod::Repay => self.repay,
            ContractMethod::Quote | ContractMethod::LendPositions | ContractMethod::BorrowPositions => {
                return None;
            }
        };
        Some(U256::from(gas))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStage {
    Estimating,
    Submitting,
    Submitted,
    Failed,
}

impl TxStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStage::Estimating => "estimating",
            TxStage::Submitting => "submitting",
            TxStage::Submitted => "submitted",
            TxStage::Failed => "failed",
        }
    }
}

/// Outcome status. Confirmation is not tracked, so a returned hash means `Submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Submitted,
    Reverted,
    Failed,
}

impl TxStatus {
    pub fn for_error(err: &VaultError) -> Self {
        match err {
            VaultError::SubmissionReverted(_) => TxStatus::Reverted,
            _ => TxStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionOutcome {
    pub operation_id: String,
    pub method: ContractMethod,
    pub hash: H256,
    pub status: TxStatus,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub value: U256,
}

pub struct Submitter {
    policy: GasPolicy,
    default_gas_price: U256,
    last_success: Mutex<HashMap<ContractMethod, U256>>,
    broadcaster: Arc<EventBroadcaster>,
}

impl Submitter {
    pub fn new(policy: GasPolicy, default_gas_price: U256, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            policy,
            default_gas_price,
            last_success: Mutex::new(HashMap::new()),
            broadcaster,
        }
    }

    /// Ceiling actually submitted. Buffered estimate (or the fallback), never
    /// below the caller's hint or the last ceiling that went through.
    pub fn gas_ceiling(
        &self,
        method: ContractMethod,
        estimate: Option<U256>,
        hint: Option<U256>,
    ) -> Result<U256, VaultError> {
        let fallback = self.policy.fallback(method).ok_or_else(|| {
            VaultError::InvalidArguments(format!("{} is read-only and cannot be submitted", method))
        })?;

        let mut gas = match estimate {
            Some(estimate) => estimate.saturating_mul(U256::from(120u64)) / 100,
            None => fallback,
        };
        if let Some(hint) = hint {
            gas = gas.max(hint);
        }
        if let Some(last) = self.last_success.lock().get(&method) {
            gas = gas.max(*last);
        }
        Ok(gas)
    }

    fn stage(&self, operation_id: &str, method: ContractMethod, stage: TxStage) {
        log::info!("[pipeline] {} {} -> {}", operation_id, method, stage.as_str());
        self.broadcaster
            .broadcast(ClientEvent::tx_stage(operation_id, method.abi_name(), stage.as_str()));
    }

    fn fail(&self, operation_id: &str, method: ContractMethod, err: VaultError) -> VaultError {
        log::error!(
            "[pipeline] {} {} {:?}: {}",
            operation_id,
            method,
            TxStatus::for_error(&err),
            err
        );
        self.stage(operation_id, method, TxStage::Failed);
        self.broadcaster.broadcast(ClientEvent::tx_failed(
            operation_id,
            method.abi_name(),
            err.kind(),
            &err.to_string(),
        ));
        err
    }

    pub async fn submit(
        &self,
        session: &SessionHandle,
        to: Address,
        descriptor: &CallDescriptor,
        data: Bytes,
    ) -> Result<TransactionOutcome, VaultError> {
        let snapshot = session.snapshot();
        let account = snapshot.address.ok_or(VaultError::NotConnected)?;
        let from: Address = account.parse().map_err(|_| {
            VaultError::InvalidArguments(format!("Session account '{}' is not an address", account))
        })?;
        let provider = session.provider().ok_or(VaultError::ProviderUnavailable)?;
        let epoch = snapshot.epoch;
        let method = descriptor.method;
        let operation_id = Uuid::new_v4().to_string();

        let mut request = CallRequest {
            from: Some(from),
            to: Some(to),
            value: Some(descriptor.native_value),
            data: Some(data),
            ..Default::default()
        };

        self.stage(&operation_id, method, TxStage::Estimating);
        let estimate = match provider
            .request(methods::ESTIMATE_GAS, json!([request]))
            .await
            .and_then(|v| parse_quantity(&v))
        {
            Ok(gas) => {
                log::info!("[pipeline] {} estimated gas {}", method, gas);
                Some(gas)
            }
            Err(e) => {
                let err = VaultError::EstimationFailed(e.message);
                log::warn!("[pipeline] {}, using fallback ceiling for {}", err, method);
                None
            }
        };

        let gas = self
            .gas_ceiling(method, estimate, descriptor.gas_limit_hint)
            .map_err(|e| self.fail(&operation_id, method, e))?;

        let gas_price = match provider
            .request(methods::GAS_PRICE, json!([]))
            .await
            .and_then(|v| parse_quantity(&v))
        {
            Ok(price) => price,
            Err(e) => {
                log::warn!(
                    "[pipeline] eth_gasPrice failed ({}), using default {}",
                    e,
                    self.default_gas_price
                );
                self.default_gas_price
            }
        };

        if !session.is_current(epoch) {
            return Err(self.fail(&operation_id, method, VaultError::StaleChain { hash: None }));
        }

        request.gas = Some(gas);
        request.gas_price = Some(gas_price);

        self.stage(&operation_id, method, TxStage::Submitting);
        log::debug!("[pipeline] eth_sendTransaction {}", json!(request));
        let result = provider
            .request(methods::SEND_TRANSACTION, json!([request]))
            .await;

        let hash = match result {
            Ok(value) => match value.as_str().and_then(|s| s.parse::<H256>().ok()) {
                Some(hash) => hash,
                None => {
                    let err = VaultError::UnknownFailure(format!("Malformed transaction hash: {}", value));
                    return Err(self.fail(&operation_id, method, err));
                }
            },
            Err(e) => {
                let err = if session.is_current(epoch) {
                    VaultError::from_submission(&e)
                } else {
                    VaultError::StaleChain { hash: None }
                };
                return Err(self.fail(&operation_id, method, err));
            }
        };

        if !session.is_current(epoch) {
            return Err(self.fail(&operation_id, method, VaultError::StaleChain { hash: Some(hash) }));
        }

        self.last_success.lock().insert(method, gas);
        self.stage(&operation_id, method, TxStage::Submitted);
        self.broadcaster.broadcast(ClientEvent::tx_submitted(
            &operation_id,
            method.abi_name(),
            &format!("{:?}", hash),
            &gas.to_string(),
        ));

        Ok(TransactionOutcome {
            operation_id,
            method,
            hash,
            status: TxStatus::Submitted,
            gas_limit: gas,
            gas_price,
            value: descriptor.native_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submitter() -> Submitter {
        Submitter::new(
            GasPolicy::default(),
            U256::from(1_000_000_000u64),
            Arc::new(EventBroadcaster::new()),
        )
    }

    #[test]
    fn test_fallback_when_estimate_missing() {
        let s = submitter();
        assert_eq!(
            s.gas_ceiling(ContractMethod::Borrow, None, None).unwrap(),
            U256::from(400_000u64)
        );
        assert_eq!(
            s.gas_ceiling(ContractMethod::Withdraw, None, None).unwrap(),
            U256::from(150_000u64)
        );
    }

    #[test]
    fn test_estimate_is_buffered() {
        let s = submitter();
        assert_eq!(
            s.gas_ceiling(ContractMethod::Lend, Some(U256::from(100_000u64)), None)
                .unwrap(),
            U256::from(120_000u64)
        );
    }

    #[test]
    fn test_oversized_estimate_does_not_overflow() {
        let s = submitter();
        assert_eq!(
            s.gas_ceiling(ContractMethod::Swap, Some(U256::MAX), None).unwrap(),
            U256::MAX / 100
        );
    }

    #[test]
    fn test_hint_and_last_success_are_floors() {
        let s = submitter();
        let hint = Some(U256::from(500_000u64));
        assert_eq!(
            s.gas_ceiling(ContractMethod::Swap, Some(U256::from(100_000u64)), hint)
                .unwrap(),
            U256::from(500_000u64)
        );

        s.last_success
            .lock()
            .insert(ContractMethod::Swap, U256::from(320_000u64));
        assert_eq!(
            s.gas_ceiling(ContractMethod::Swap, Some(U256::from(100_000u64)), None)
                .unwrap(),
            U256::from(320_000u64)
        );
        // other methods are unaffected
        assert_eq!(
            s.gas_ceiling(ContractMethod::Lend, Some(U256::from(100_000u64)), None)
                .unwrap(),
            U256::from(120_000u64)
        );
    }

    #[test]
    fn test_view_methods_have_no_ceiling() {
        let s = submitter();
        assert!(matches!(
            s.gas_ceiling(ContractMethod::Quote, None, None),
            Err(VaultError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_gas_policy_partial_ron() {
        let policy: GasPolicy = ron::from_str("(swap: 350000)").unwrap();
        assert_eq!(policy.swap, 350_000);
        assert_eq!(policy.borrow, 400_000);
    }

    #[test]
    fn test_status_for_error() {
        assert_eq!(
            TxStatus::for_error(&VaultError::SubmissionReverted("x".into())),
            TxStatus::Reverted
        );
        assert_eq!(TxStatus::for_error(&VaultError::UserRejected), TxStatus::Failed);
    }
}
