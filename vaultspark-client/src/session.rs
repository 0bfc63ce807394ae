//! Wallet session ownership
//!
//! `SessionManager` is the only writer of `WalletSession`. Direct operations
//! (connect, disconnect, restore) and wallet events both funnel through
//! `SessionCore::apply`; wallet events are queued by the provider's broadcast
//! channel and drained by one listener task per provider instance.
//!
//! Everything else reads the session through a cloneable `SessionHandle`.
//! A chain change bumps `epoch`; operations capture the epoch when they start
//! and discard results once it has moved on.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, watch};

use crate::error::VaultError;
use crate::events::{ClientEvent, EventBroadcaster};
use crate::network::{NetworkDescriptor, NetworkGuard};
use crate::provider::{methods, parse_accounts, Eip1193Provider, ProviderError, ProviderEvent, ProviderId};

/// Connection state of the wallet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalletSession {
    pub address: Option<String>,
    pub chain_id: Option<String>,
    pub connected: bool,
    pub connecting: bool,
    /// Generation counter, incremented on every chain change
    pub epoch: u64,
}

impl WalletSession {
    pub fn is_on_network(&self, network: &NetworkDescriptor) -> bool {
        self.chain_id
            .as_deref()
            .map(|c| network.matches(c))
            .unwrap_or(false)
    }

    /// `0x1234...abcd` display form
    pub fn short_address(&self) -> Option<String> {
        self.address.as_deref().map(|a| {
            let chars: Vec<char> = a.chars().collect();
            if chars.len() > 10 {
                let head: String = chars[..6].iter().collect();
                let tail: String = chars[chars.len() - 4..].iter().collect();
                format!("{}...{}", head, tail)
            } else {
                a.to_string()
            }
        })
    }
}

/// Messages that mutate the session
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionUpdate {
    ConnectStarted,
    ConnectFinished,
    Connected {
        address: String,
        chain_id: Option<String>,
    },
    AccountsChanged(Vec<String>),
    ChainChanged(String),
    Reset,
}

/// Owner of the session state; `apply` is the single write path
struct SessionCore {
    state: watch::Sender<WalletSession>,
    broadcaster: Arc<EventBroadcaster>,
}

impl SessionCore {
    fn apply(&self, update: SessionUpdate) {
        let mut emitted: Vec<ClientEvent> = Vec::new();

        self.state.send_modify(|session| match update {
            SessionUpdate::ConnectStarted => session.connecting = true,
            SessionUpdate::ConnectFinished => session.connecting = false,
            SessionUpdate::Connected { address, chain_id } => {
                log::info!("[session] Connected {} on {:?}", address, chain_id);
                emitted.push(ClientEvent::wallet_connected(&address, chain_id.as_deref()));
                session.address = Some(address);
                session.chain_id = chain_id;
                session.connected = true;
            }
            SessionUpdate::AccountsChanged(accounts) => match accounts.into_iter().next() {
                None => {
                    log::info!("[session] Wallet exposed no accounts, disconnecting");
                    if session.connected {
                        emitted.push(ClientEvent::wallet_disconnected());
                    }
                    reset(session);
                }
                Some(first) => {
                    if session.address.as_deref() != Some(first.as_str()) {
                        log::info!("[session] Account changed to {}", first);
                        emitted.push(ClientEvent::wallet_account_changed(&first));
                    }
                    session.address = Some(first);
                    session.connected = true;
                }
            },
            SessionUpdate::ChainChanged(chain_id) => {
                session.epoch += 1;
                log::warn!(
                    "[session] Chain changed to {} (epoch {}), in-flight results are now stale",
                    chain_id,
                    session.epoch
                );
                emitted.push(ClientEvent::network_changed(&chain_id, session.epoch));
                session.chain_id = Some(chain_id);
            }
            SessionUpdate::Reset => {
                if session.connected {
                    emitted.push(ClientEvent::wallet_disconnected());
                }
                reset(session);
            }
        });

        for event in emitted {
            self.broadcaster.broadcast(event);
        }
    }
}

/// Empty the session. The epoch survives so stale results stay detectable.
fn reset(session: &mut WalletSession) {
    session.address = None;
    session.chain_id = None;
    session.connected = false;
}

type SharedProvider = Arc<RwLock<Option<Arc<dyn Eip1193Provider>>>>;

/// Read-only view of the session, cheap to clone
#[derive(Clone)]
pub struct SessionHandle {
    rx: watch::Receiver<WalletSession>,
    provider: SharedProvider,
}

impl SessionHandle {
    pub fn snapshot(&self) -> WalletSession {
        self.rx.borrow().clone()
    }

    pub fn epoch(&self) -> u64 {
        self.rx.borrow().epoch
    }

    /// Whether an operation started at `epoch` may still act on its result
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    pub fn provider(&self) -> Option<Arc<dyn Eip1193Provider>> {
        self.provider.read().clone()
    }

    /// Wait until the session satisfies `predicate`
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&WalletSession) -> bool,
    ) -> Result<WalletSession, VaultError> {
        self.rx
            .wait_for(predicate)
            .await
            .map(|s| s.clone())
            .map_err(|_| VaultError::UnknownFailure("Session closed".to_string()))
    }

    /// Wait for the next session change
    pub async fn changed(&mut self) -> Result<WalletSession, VaultError> {
        self.rx
            .changed()
            .await
            .map_err(|_| VaultError::UnknownFailure("Session closed".to_string()))?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

struct ListenerHandle {
    provider_id: ProviderId,
    shutdown: oneshot::Sender<()>,
}

/// Releases the `connecting` flag when a connect attempt ends, however it ends
struct ConnectAttempt<'a> {
    manager: &'a SessionManager,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        self.manager.core.apply(SessionUpdate::ConnectFinished);
        self.manager.connecting.store(false, Ordering::Release);
    }
}

pub struct SessionManager {
    core: Arc<SessionCore>,
    rx: watch::Receiver<WalletSession>,
    provider: SharedProvider,
    guard: NetworkGuard,
    connecting: AtomicBool,
    listener: Mutex<Option<ListenerHandle>>,
}

impl SessionManager {
    /// Create an empty session. `provider` is the detected wallet, if any; its
    /// events are followed from here on, connected or not.
    pub fn new(
        provider: Option<Arc<dyn Eip1193Provider>>,
        guard: NetworkGuard,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        let (state, rx) = watch::channel(WalletSession::default());
        let manager = Self {
            core: Arc::new(SessionCore { state, broadcaster }),
            rx,
            provider: Arc::new(RwLock::new(provider.clone())),
            guard,
            connecting: AtomicBool::new(false),
            listener: Mutex::new(None),
        };
        if let Some(provider) = provider {
            manager.install_listener(&provider);
        }
        manager
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            rx: self.rx.clone(),
            provider: self.provider.clone(),
        }
    }

    pub fn snapshot(&self) -> WalletSession {
        self.rx.borrow().clone()
    }

    pub fn network_guard(&self) -> &NetworkGuard {
        &self.guard
    }

    pub fn provider(&self) -> Option<Arc<dyn Eip1193Provider>> {
        self.provider.read().clone()
    }

    /// Replace the wallet. Listeners bound to the previous instance are torn down
    /// and the session is reset.
    pub fn set_provider(&self, provider: Option<Arc<dyn Eip1193Provider>>) {
        let same = match (&*self.provider.read(), &provider) {
            (Some(old), Some(new)) => old.id() == new.id(),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }

        self.teardown_listener();
        *self.provider.write() = provider.clone();
        self.core.apply(SessionUpdate::Reset);
        if let Some(provider) = provider {
            self.install_listener(&provider);
        }
        log::info!("[session] Provider replaced, session reset");
    }

    fn begin_connect(&self) -> Result<ConnectAttempt<'_>, VaultError> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("[session] Connect already in progress, ignoring");
            return Err(VaultError::OperationInFlight("wallet connection"));
        }
        self.core.apply(SessionUpdate::ConnectStarted);
        Ok(ConnectAttempt { manager: self })
    }

    /// Prompt the wallet for accounts, record the session and force the target network
    pub async fn connect(&self) -> Result<WalletSession, VaultError> {
        let provider = match self.provider() {
            Some(p) => p,
            None => {
                log::warn!("[session] No wallet detected");
                return Err(VaultError::ProviderUnavailable);
            }
        };

        let attempt = self.begin_connect()?;

        let accounts = provider
            .request(methods::REQUEST_ACCOUNTS, json!([]))
            .await
            .and_then(parse_accounts)
            .map_err(request_error)?;

        let address = match accounts.into_iter().next() {
            Some(a) => a,
            None => {
                log::warn!("[session] Wallet approved the request but returned no accounts");
                return Err(VaultError::UnknownFailure(
                    "Wallet returned no accounts".to_string(),
                ));
            }
        };

        let chain_id = read_chain_id(provider.as_ref()).await?;
        self.core.apply(SessionUpdate::Connected {
            address,
            chain_id: Some(chain_id),
        });
        self.install_listener(&provider);

        if let Err(e) = self.guard.ensure(provider.as_ref()).await {
            log::warn!("[session] Connected, but could not reach target network: {}", e);
            self.core.broadcaster.broadcast(ClientEvent::network_switch_failed(
                &self.guard.target().chain_id,
                &e.to_string(),
            ));
        }

        drop(attempt);
        Ok(self.snapshot())
    }

    /// Restore a previously authorized session without prompting the user
    pub async fn restore(&self) -> Result<Option<WalletSession>, VaultError> {
        let provider = match self.provider() {
            Some(p) => p,
            None => return Ok(None),
        };

        let attempt = match self.begin_connect() {
            Ok(a) => a,
            Err(_) => return Ok(None),
        };

        let accounts = provider
            .request(methods::ACCOUNTS, json!([]))
            .await
            .and_then(parse_accounts)
            .map_err(request_error)?;

        let address = match accounts.into_iter().next() {
            Some(a) => a,
            None => {
                log::debug!("[session] No previously authorized account");
                return Ok(None);
            }
        };

        let chain_id = read_chain_id(provider.as_ref()).await?;
        self.core.apply(SessionUpdate::Connected {
            address,
            chain_id: Some(chain_id),
        });
        self.install_listener(&provider);

        log::info!("[session] Restored previously authorized session");
        drop(attempt);
        Ok(Some(self.snapshot()))
    }

    /// Reset the session to empty. No wallet call is made; wallet events keep
    /// being followed.
    pub fn disconnect(&self) {
        self.core.apply(SessionUpdate::Reset);
        log::info!("[session] Disconnected");
    }

    /// Run the network guard against the current wallet
    pub async fn ensure_network(&self) -> Result<(), VaultError> {
        let provider = self.provider().ok_or(VaultError::ProviderUnavailable)?;
        self.guard.ensure(provider.as_ref()).await.map(|_| ())
    }

    /// Subscribe to the provider's events, once per provider instance.
    /// Outside a runtime this is deferred to the first connect or restore.
    fn install_listener(&self, provider: &Arc<dyn Eip1193Provider>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("[session] No runtime yet, listener deferred");
            return;
        };
        let mut listener = self.listener.lock();

        if let Some(existing) = listener.as_ref() {
            if existing.provider_id == provider.id() {
                return;
            }
        }
        if let Some(old) = listener.take() {
            let _ = old.shutdown.send(());
        }

        let mut events = provider.subscribe();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let core = self.core.clone();
        let provider_id = provider.id();

        runtime.spawn(async move {
            log::debug!("[session] Listener started for provider {}", provider_id);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = events.recv() => match event {
                        Ok(ProviderEvent::AccountsChanged(accounts)) => {
                            core.apply(SessionUpdate::AccountsChanged(accounts));
                        }
                        Ok(ProviderEvent::ChainChanged(chain_id)) => {
                            core.apply(SessionUpdate::ChainChanged(chain_id));
                        }
                        Err(RecvError::Lagged(missed)) => {
                            log::warn!("[session] Listener lagged, {} wallet events dropped", missed);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            log::debug!("[session] Listener stopped for provider {}", provider_id);
        });

        *listener = Some(ListenerHandle {
            provider_id,
            shutdown: shutdown_tx,
        });
    }

    fn teardown_listener(&self) {
        if let Some(old) = self.listener.lock().take() {
            let _ = old.shutdown.send(());
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.teardown_listener();
    }
}

async fn read_chain_id(provider: &dyn Eip1193Provider) -> Result<String, VaultError> {
    let value = provider
        .request(methods::CHAIN_ID, json!([]))
        .await
        .map_err(request_error)?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| VaultError::UnknownFailure(format!("Malformed chain id: {}", value)))
}

fn request_error(e: ProviderError) -> VaultError {
    if e.is_user_rejection() {
        VaultError::UserRejected
    } else {
        VaultError::UnknownFailure(e.message)
    }
}
