//! UI-facing facade
//!
//! `VaultClient` wires the session, gateway and pipeline together. Its public
//! operations never return errors: failures become `notification` events and
//! an absent result. Transactions are limited to one in flight per client.

use ethers::types::U256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::contract::{BorrowPosition, ContractConfig, ContractGateway, LendPosition};
use crate::error::VaultError;
use crate::events::{ClientEvent, EventBroadcaster, NotificationLevel};
use crate::network::{NetworkDescriptor, NetworkGuard};
use crate::pipeline::{Submitter, TransactionOutcome, TransactionPipeline};
use crate::profile::{ProfileStore, SqliteProfileStore};
use crate::provider::{Eip1193Provider, LocalWalletProvider};
use crate::session::{SessionHandle, SessionManager, WalletSession};
use crate::tokens::TokenRegistry;

/// Everything a client is built from
pub struct ClientParts {
    pub network: NetworkDescriptor,
    pub tokens: TokenRegistry,
    pub contract: ContractConfig,
    pub default_gas_price: U256,
    pub provider: Option<Arc<dyn Eip1193Provider>>,
    pub profiles: Option<Arc<dyn ProfileStore>>,
    pub user_id: Option<String>,
}

/// Clears the loading flag when a transaction finishes, however it finishes
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct VaultClient {
    network: Arc<NetworkDescriptor>,
    session: Arc<SessionManager>,
    pipeline: TransactionPipeline,
    broadcaster: Arc<EventBroadcaster>,
    profiles: Option<Arc<dyn ProfileStore>>,
    user_id: Option<String>,
    loading: AtomicBool,
}

impl VaultClient {
    pub fn new(parts: ClientParts) -> Result<Self, VaultError> {
        parts.network.validate()?;
        let network = Arc::new(parts.network);
        let broadcaster = Arc::new(EventBroadcaster::new());
        let guard = NetworkGuard::new(network.clone());

        let session = Arc::new(SessionManager::new(parts.provider, guard.clone(), broadcaster.clone()));
        let submitter = Submitter::new(parts.contract.gas.clone(), parts.default_gas_price, broadcaster.clone());
        let gateway = ContractGateway::new(parts.contract.parsed_address()?, session.handle(), submitter)?;
        let pipeline = TransactionPipeline::new(
            Arc::new(gateway),
            Arc::new(parts.tokens),
            guard,
            session.handle(),
        );

        Ok(Self {
            network,
            session,
            pipeline,
            broadcaster,
            profiles: parts.profiles,
            user_id: parts.user_id,
            loading: AtomicBool::new(false),
        })
    }

    /// Load network, tokens and contract settings from the config directory and
    /// set up the local wallet when a private key is configured
    pub fn from_config(config: &Config) -> Result<Self, VaultError> {
        log::info!("Using config directory: {:?}", config.config_dir);
        let network = NetworkDescriptor::load(&config.config_dir)?;
        let tokens = TokenRegistry::load(&config.config_dir)?;
        let contract = ContractConfig::load(&config.config_dir)?;

        let provider: Option<Arc<dyn Eip1193Provider>> = match &config.wallet_private_key {
            Some(key) => {
                let rpc_url = match &config.rpc_url {
                    Some(url) => url.clone(),
                    None => network.rpc_urls.first().cloned().ok_or_else(|| {
                        VaultError::Config("No RPC URL configured".to_string())
                    })?,
                };
                let wallet = LocalWalletProvider::new(key, &rpc_url, config.wallet_preauthorized)
                    .map_err(|e| VaultError::Config(e.message))?;
                Some(Arc::new(wallet))
            }
            None => {
                log::warn!("WALLET_PRIVATE_KEY not set, no wallet available");
                None
            }
        };

        let profiles: Option<Arc<dyn ProfileStore>> = match &config.user_id {
            Some(_) => {
                log::info!("Initializing profile store at {}", config.database_url);
                Some(Arc::new(SqliteProfileStore::new(&config.database_url)?))
            }
            None => None,
        };

        Self::new(ClientParts {
            network,
            tokens,
            contract,
            default_gas_price: config.gas_price_wei,
            provider,
            profiles,
            user_id: config.user_id.clone(),
        })
    }

    pub fn session(&self) -> SessionHandle {
        self.session.handle()
    }

    pub fn network(&self) -> &NetworkDescriptor {
        &self.network
    }

    pub fn tokens(&self) -> &TokenRegistry {
        self.pipeline.tokens()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.broadcaster.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    fn report(&self, label: &str, err: &VaultError) {
        self.broadcaster
            .notify(NotificationLevel::Error, format!("{} failed: {}", label, err));
    }

    pub async fn connect(&self) -> Option<WalletSession> {
        match self.session.connect().await {
            Ok(session) => {
                self.link_profile(&session);
                self.broadcaster.notify(
                    NotificationLevel::Success,
                    format!(
                        "Wallet connected: {}",
                        session.short_address().unwrap_or_default()
                    ),
                );
                Some(session)
            }
            Err(e) => {
                self.report("Wallet connection", &e);
                None
            }
        }
    }

    /// Silent reconnect for a wallet that already authorized this client
    pub async fn restore(&self) -> Option<WalletSession> {
        match self.session.restore().await {
            Ok(Some(session)) => {
                self.check_profile(&session);
                Some(session)
            }
            Ok(None) => None,
            Err(e) => {
                self.report("Wallet reconnection", &e);
                None
            }
        }
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
        self.broadcaster
            .notify(NotificationLevel::Info, "Wallet disconnected");
    }

    pub async fn switch_network(&self) -> Option<()> {
        match self.session.ensure_network().await {
            Ok(()) => {
                self.broadcaster.notify(
                    NotificationLevel::Success,
                    format!("Switched to {}", self.network.name),
                );
                Some(())
            }
            Err(e) => {
                self.report("Network switch", &e);
                None
            }
        }
    }

    async fn run_tx<F>(&self, label: &str, operation: F) -> Option<TransactionOutcome>
    where
        F: std::future::Future<Output = Result<TransactionOutcome, VaultError>>,
    {
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.report(label, &VaultError::OperationInFlight("transaction"));
            return None;
        }
        let _loading = LoadingGuard(&self.loading);

        match operation.await {
            Ok(outcome) => {
                let hash = format!("{:?}", outcome.hash);
                let message = match self.network.explorer_tx_url(&hash) {
                    Some(url) => format!("{} submitted! Transaction: {} ({})", label, hash, url),
                    None => format!("{} submitted! Transaction: {}", label, hash),
                };
                self.broadcaster.notify(NotificationLevel::Success, message);
                Some(outcome)
            }
            Err(e) => {
                self.report(label, &e);
                None
            }
        }
    }

    pub async fn swap(&self, token_in: &str, token_out: &str, amount_in: &str) -> Option<TransactionOutcome> {
        self.run_tx("Swap", self.pipeline.swap(token_in, token_out, amount_in, None))
            .await
    }

    pub async fn lend(&self, token: &str, amount: &str) -> Option<TransactionOutcome> {
        self.run_tx("Lending", self.pipeline.lend(token, amount, None)).await
    }

    pub async fn borrow(
        &self,
        borrow_token: &str,
        collateral_token: &str,
        amount: &str,
        collateral: &str,
    ) -> Option<TransactionOutcome> {
        self.run_tx(
            "Borrowing",
            self.pipeline
                .borrow(borrow_token, collateral_token, amount, collateral, None),
        )
        .await
    }

    pub async fn withdraw(&self, index: u64) -> Option<TransactionOutcome> {
        self.run_tx("Withdrawal", self.pipeline.withdraw(index, None)).await
    }

    /// `token` defaults to the native asset
    pub async fn repay(&self, index: u64, amount: &str, token: Option<&str>) -> Option<TransactionOutcome> {
        let native = self.network.native_currency.symbol.clone();
        let token = token.unwrap_or(&native);
        self.run_tx("Repayment", self.pipeline.repay(index, token, amount, None))
            .await
    }

    pub async fn quote(&self, token_in: &str, token_out: &str, amount_in: &str) -> Option<String> {
        match self.pipeline.quote(token_in, token_out, amount_in).await {
            Ok(out) => Some(out),
            Err(e) => {
                self.report("Quote", &e);
                None
            }
        }
    }

    pub async fn lend_positions(&self, user: Option<&str>) -> Option<Vec<LendPosition>> {
        match self.pipeline.lend_positions(user).await {
            Ok(positions) => Some(positions),
            Err(e) => {
                self.report("Loading lend positions", &e);
                None
            }
        }
    }

    pub async fn borrow_positions(&self, user: Option<&str>) -> Option<Vec<BorrowPosition>> {
        match self.pipeline.borrow_positions(user).await {
            Ok(positions) => Some(positions),
            Err(e) => {
                self.report("Loading borrow positions", &e);
                None
            }
        }
    }

    pub fn collateral_needed(&self, token: &str, amount: &str) -> Option<String> {
        match self.pipeline.collateral_needed(token, amount) {
            Ok(needed) => Some(needed),
            Err(e) => {
                self.report("Collateral calculation", &e);
                None
            }
        }
    }

    fn link_profile(&self, session: &WalletSession) {
        let (Some(store), Some(user_id), Some(address)) =
            (&self.profiles, &self.user_id, &session.address)
        else {
            return;
        };
        if let Err(e) = store.set_wallet_address(user_id, address) {
            log::error!("[profile] Failed to link wallet for {}: {}", user_id, e);
            self.report("Saving wallet to profile", &e);
        }
    }

    fn check_profile(&self, session: &WalletSession) {
        let (Some(store), Some(user_id), Some(address)) =
            (&self.profiles, &self.user_id, &session.address)
        else {
            return;
        };
        match store.get_wallet_address(user_id) {
            Ok(Some(stored)) if !stored.eq_ignore_ascii_case(address) => {
                log::warn!(
                    "[profile] Stored wallet {} differs from connected wallet {}",
                    stored,
                    address
                );
                self.broadcaster.notify(
                    NotificationLevel::Info,
                    format!(
                        "Connected wallet {} differs from the wallet saved in your profile ({})",
                        address, stored
                    ),
                );
            }
            Ok(Some(_)) => {}
            Ok(None) => self.link_profile(session),
            Err(e) => log::error!("[profile] Failed to read profile for {}: {}", user_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::provider::methods;
    use crate::provider::mock::{MockProvider, MOCK_ACCOUNT};
    use crate::provider::ProviderError;
    use tokio::sync::Notify;

    fn client_with(provider: Option<Arc<MockProvider>>, profiles: Option<Arc<SqliteProfileStore>>) -> VaultClient {
        VaultClient::new(ClientParts {
            network: NetworkDescriptor::builtin(),
            tokens: TokenRegistry::builtin(),
            contract: ContractConfig::builtin(),
            default_gas_price: U256::from(1_000_000_000u64),
            provider: provider.map(|p| p as Arc<dyn Eip1193Provider>),
            profiles: profiles.map(|p| p as Arc<dyn ProfileStore>),
            user_id: Some("alice".to_string()),
        })
        .unwrap()
    }

    fn notifications(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.is(EventType::Notification) {
                out.push((
                    event.data["level"].as_str().unwrap_or_default().to_string(),
                    event.data["message"].as_str().unwrap_or_default().to_string(),
                ));
            }
        }
        out
    }

    #[tokio::test]
    async fn test_connect_without_wallet_notifies() {
        let client = client_with(None, None);
        let mut rx = client.subscribe();

        assert!(client.connect().await.is_none());
        let notes = notifications(&mut rx);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, "error");
        assert!(notes[0].1.contains("No wallet detected"));
    }

    #[tokio::test]
    async fn test_single_transaction_in_flight() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(MockProvider::new().with_chain("0x413").with_send_gate(gate.clone()));
        let client = client_with(Some(provider.clone()), None);
        client.connect().await.unwrap();
        assert!(!client.is_loading());

        let (first, second) = tokio::join!(client.lend("BDAG", "10"), async {
            tokio::task::yield_now().await;
            assert!(client.is_loading());
            let second = client.lend("BDAG", "10").await;
            gate.notify_one();
            second
        });

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(!client.is_loading());
        assert_eq!(provider.calls(methods::SEND_TRANSACTION), 1);
    }

    #[tokio::test]
    async fn test_loading_cleared_after_failure() {
        let provider = Arc::new(
            MockProvider::new()
                .with_chain("0x413")
                .with_send_error(ProviderError::internal("execution reverted")),
        );
        let client = client_with(Some(provider), None);
        client.connect().await.unwrap();
        let mut rx = client.subscribe();

        assert!(client.swap("USDT", "USDC", "1").await.is_none());
        assert!(!client.is_loading());

        let notes = notifications(&mut rx);
        assert_eq!(notes.last().map(|n| n.0.as_str()), Some("error"));
        assert!(notes.last().unwrap().1.starts_with("Swap failed"));
    }

    #[tokio::test]
    async fn test_success_notification_links_explorer() {
        let provider = Arc::new(MockProvider::new().with_chain("0x413"));
        let client = client_with(Some(provider), None);
        client.connect().await.unwrap();
        let mut rx = client.subscribe();

        let outcome = client.withdraw(0).await.unwrap();
        let notes = notifications(&mut rx);
        let (level, message) = notes.last().unwrap();
        assert_eq!(level, "success");
        assert!(message.contains(&format!("{:?}", outcome.hash)));
        assert!(message.contains("https://primordial.bdagscan.com/tx/"));
    }

    #[tokio::test]
    async fn test_repay_defaults_to_native() {
        let provider = Arc::new(MockProvider::new().with_chain("0x413"));
        let client = client_with(Some(provider), None);
        client.connect().await.unwrap();

        let outcome = client.repay(1, "2", None).await.unwrap();
        assert_eq!(outcome.value, U256::from(2_000_000_000_000_000_000u64));

        let outcome = client.repay(1, "2", Some("USDT")).await.unwrap();
        assert!(outcome.value.is_zero());
    }

    #[tokio::test]
    async fn test_connect_links_profile() {
        let store = Arc::new(SqliteProfileStore::in_memory().unwrap());
        let provider = Arc::new(MockProvider::new().with_chain("0x413"));
        let client = client_with(Some(provider), Some(store.clone()));

        client.connect().await.unwrap();
        assert_eq!(
            store.get_wallet_address("alice").unwrap().as_deref(),
            Some(MOCK_ACCOUNT)
        );
    }

    #[tokio::test]
    async fn test_restore_reports_profile_mismatch() {
        let store = Arc::new(SqliteProfileStore::in_memory().unwrap());
        store
            .set_wallet_address("alice", "0x0000000000000000000000000000000000000001")
            .unwrap();
        let provider = Arc::new(MockProvider::new().with_chain("0x413"));
        let client = client_with(Some(provider), Some(store.clone()));
        let mut rx = client.subscribe();

        assert!(client.restore().await.is_some());
        let notes = notifications(&mut rx);
        assert!(notes.iter().any(|(_, m)| m.contains("differs")));
        // stored link is left alone
        assert_eq!(
            store.get_wallet_address("alice").unwrap().as_deref(),
            Some("0x0000000000000000000000000000000000000001")
        );
    }

    #[test]
    fn test_collateral_helper() {
        let client = client_with(None, None);
        assert_eq!(client.collateral_needed("USDT", "10").as_deref(), Some("15"));
        assert_eq!(client.collateral_needed("USDT", "x"), None);
    }

    #[tokio::test]
    async fn test_quote_failure_returns_none() {
        let provider = Arc::new(
            MockProvider::new().with_call_error(ProviderError::internal("connection refused")),
        );
        let client = client_with(Some(provider), None);
        assert_eq!(client.quote("BDAG", "USDT", "1").await, None);
    }
}
