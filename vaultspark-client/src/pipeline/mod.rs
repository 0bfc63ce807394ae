//! High-level vault operations
//!
//! Each operation converts decimal amounts with the token's precision,
//! decides the native value to attach, binds the contract call and hands it
//! to the gateway. Steps run strictly in that order.

pub mod submit;

pub use submit::{GasPolicy, Submitter, TransactionOutcome, TxStage, TxStatus};

use ethers::types::{Address, U256};
use std::sync::Arc;

use crate::amount::{from_base_units, to_base_units};
use crate::contract::{
    BorrowPosition, CallArg, CallDescriptor, ContractGateway, ContractMethod, LendPosition,
};
use crate::error::VaultError;
use crate::network::NetworkGuard;
use crate::session::SessionHandle;
use crate::tokens::TokenRegistry;

/// Collateral required per unit borrowed, in percent
pub const COLLATERAL_RATIO_PERCENT: u64 = 150;

pub struct TransactionPipeline {
    gateway: Arc<ContractGateway>,
    tokens: Arc<TokenRegistry>,
    guard: NetworkGuard,
    session: SessionHandle,
}

impl TransactionPipeline {
    pub fn new(
        gateway: Arc<ContractGateway>,
        tokens: Arc<TokenRegistry>,
        guard: NetworkGuard,
        session: SessionHandle,
    ) -> Self {
        Self {
            gateway,
            tokens,
            guard,
            session,
        }
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Decimal amount of `symbol` in base units
    pub fn base_units(&self, symbol: &str, amount: &str) -> Result<U256, VaultError> {
        to_base_units(amount, self.tokens.decimals_of(symbol))
            .map_err(|e| VaultError::InvalidAmount(format!("{} {}: {}", amount, symbol, e)))
    }

    /// Native value for a leg: the amount when the token is the native asset, zero otherwise
    fn native_value(&self, symbol: &str, amount: U256) -> U256 {
        if self.tokens.is_native(symbol) {
            amount
        } else {
            U256::zero()
        }
    }

    async fn execute(&self, descriptor: CallDescriptor) -> Result<TransactionOutcome, VaultError> {
        let session = self.session.snapshot();
        if !session.connected {
            return Err(VaultError::NotConnected);
        }
        self.guard.check(&session)?;
        self.gateway.invoke(&descriptor).await
    }

    pub async fn swap(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: &str,
        gas_limit: Option<U256>,
    ) -> Result<TransactionOutcome, VaultError> {
        let amount = self.base_units(token_in, amount_in)?;
        let token_in_address = self.tokens.resolve_address(token_in)?;
        let token_out_address = self.tokens.resolve_address(token_out)?;

        log::info!(
            "[pipeline] swap {} {} -> {} ({:?} -> {:?})",
            amount_in,
            token_in,
            token_out,
            token_in_address,
            token_out_address
        );

        let descriptor = self
            .gateway
            .bind(
                ContractMethod::Swap,
                vec![
                    CallArg::Address(token_in_address),
                    CallArg::Address(token_out_address),
                    CallArg::Uint(amount),
                ],
            )?
            .with_value(self.native_value(token_in, amount))
            .with_gas_limit(gas_limit);
        self.execute(descriptor).await
    }

    pub async fn lend(
        &self,
        token: &str,
        amount: &str,
        gas_limit: Option<U256>,
    ) -> Result<TransactionOutcome, VaultError> {
        let base = self.base_units(token, amount)?;
        let token_address = self.tokens.resolve_address(token)?;

        let descriptor = self
            .gateway
            .bind(
                ContractMethod::Lend,
                vec![CallArg::Address(token_address), CallArg::Uint(base)],
            )?
            .with_value(self.native_value(token, base))
            .with_gas_limit(gas_limit);
        self.execute(descriptor).await
    }

    /// The collateral leg decides the attached value; the borrowed leg never attaches any
    pub async fn borrow(
        &self,
        borrow_token: &str,
        collateral_token: &str,
        amount: &str,
        collateral: &str,
        gas_limit: Option<U256>,
    ) -> Result<TransactionOutcome, VaultError> {
        let borrow_base = self.base_units(borrow_token, amount)?;
        let collateral_base = self.base_units(collateral_token, collateral)?;
        let borrow_address = self.tokens.resolve_address(borrow_token)?;
        let collateral_address = self.tokens.resolve_address(collateral_token)?;

        let descriptor = self
            .gateway
            .bind(
                ContractMethod::Borrow,
                vec![
                    CallArg::Address(borrow_address),
                    CallArg::Address(collateral_address),
                    CallArg::Uint(borrow_base),
                    CallArg::Uint(collateral_base),
                ],
            )?
            .with_value(self.native_value(collateral_token, collateral_base))
            .with_gas_limit(gas_limit);
        self.execute(descriptor).await
    }

    pub async fn withdraw(&self, index: u64, gas_limit: Option<U256>) -> Result<TransactionOutcome, VaultError> {
        let descriptor = self
            .gateway
            .bind(ContractMethod::Withdraw, vec![CallArg::Uint(U256::from(index))])?
            .with_gas_limit(gas_limit);
        self.execute(descriptor).await
    }

    pub async fn repay(
        &self,
        index: u64,
        token: &str,
        amount: &str,
        gas_limit: Option<U256>,
    ) -> Result<TransactionOutcome, VaultError> {
        let base = self.base_units(token, amount)?;
        let descriptor = self
            .gateway
            .bind(ContractMethod::Repay, vec![CallArg::Uint(U256::from(index))])?
            .with_value(self.native_value(token, base))
            .with_gas_limit(gas_limit);
        self.execute(descriptor).await
    }

    /// Expected output of a swap, as a decimal string in the output token's precision
    pub async fn quote(&self, token_in: &str, token_out: &str, amount_in: &str) -> Result<String, VaultError> {
        let amount = self.base_units(token_in, amount_in)?;
        let out = self
            .gateway
            .quote(
                self.tokens.resolve_address(token_in)?,
                self.tokens.resolve_address(token_out)?,
                amount,
            )
            .await?;
        Ok(from_base_units(out, self.tokens.decimals_of(token_out)))
    }

    /// `user` defaults to the connected account
    fn position_owner(&self, user: Option<&str>) -> Result<Address, VaultError> {
        let account = match user {
            Some(u) => u.to_string(),
            None => self.session.snapshot().address.ok_or(VaultError::NotConnected)?,
        };
        account
            .parse::<Address>()
            .map_err(|_| VaultError::InvalidArguments(format!("'{}' is not an address", account)))
    }

    pub async fn lend_positions(&self, user: Option<&str>) -> Result<Vec<LendPosition>, VaultError> {
        let owner = self.position_owner(user)?;
        self.gateway.lend_positions(owner).await
    }

    pub async fn borrow_positions(&self, user: Option<&str>) -> Result<Vec<BorrowPosition>, VaultError> {
        let owner = self.position_owner(user)?;
        self.gateway.borrow_positions(owner).await
    }

    /// Collateral needed for `amount`, rounded up to the smallest base unit
    pub fn collateral_needed(&self, token: &str, amount: &str) -> Result<String, VaultError> {
        let decimals = self.tokens.decimals_of(token);
        let base = self.base_units(token, amount)?;
        let needed = base
            .checked_mul(U256::from(COLLATERAL_RATIO_PERCENT))
            .and_then(|v| v.checked_add(U256::from(99u64)))
            .ok_or_else(|| {
                VaultError::InvalidAmount(format!("{} {}: collateral out of range", amount, token))
            })?
            / U256::from(100u64);
        Ok(from_base_units(needed, decimals))
    }
}
