//! Client events and user-visible notifications
//!
//! Everything the UI needs to react to (session changes, transaction stages,
//! toasts) goes out through one broadcaster as `{ type, event, data }` frames.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Event names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    WalletConnected,
    WalletDisconnected,
    WalletAccountChanged,
    NetworkChanged,
    NetworkSwitchFailed,
    TxStage,
    TxSubmitted,
    TxFailed,
    Notification,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WalletConnected => "wallet.connected",
            Self::WalletDisconnected => "wallet.disconnected",
            Self::WalletAccountChanged => "wallet.account_changed",
            Self::NetworkChanged => "network.changed",
            Self::NetworkSwitchFailed => "network.switch_failed",
            Self::TxStage => "tx.stage",
            Self::TxSubmitted => "tx.submitted",
            Self::TxFailed => "tx.failed",
            Self::Notification => "notification",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

/// Severity of a user-visible notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}

/// A frame pushed to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEvent {
    #[serde(rename = "type")]
    pub type_: String,
    pub event: String,
    pub data: Value,
}

impl ClientEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            type_: "event".to_string(),
            event: event.into(),
            data,
        }
    }

    pub fn is(&self, event_type: EventType) -> bool {
        self.event == event_type.as_str()
    }

    pub fn wallet_connected(address: &str, chain_id: Option<&str>) -> Self {
        Self::new(
            EventType::WalletConnected,
            json!({
                "address": address,
                "chain_id": chain_id
            }),
        )
    }

    pub fn wallet_disconnected() -> Self {
        Self::new(EventType::WalletDisconnected, json!({}))
    }

    pub fn wallet_account_changed(address: &str) -> Self {
        Self::new(EventType::WalletAccountChanged, json!({ "address": address }))
    }

    pub fn network_changed(chain_id: &str, epoch: u64) -> Self {
        Self::new(
            EventType::NetworkChanged,
            json!({
                "chain_id": chain_id,
                "epoch": epoch
            }),
        )
    }

    pub fn network_switch_failed(target: &str, error: &str) -> Self {
        Self::new(
            EventType::NetworkSwitchFailed,
            json!({
                "target": target,
                "error": error
            }),
        )
    }

    /// Per-operation stage transition
    pub fn tx_stage(operation_id: &str, method: &str, stage: &str) -> Self {
        Self::new(
            EventType::TxStage,
            json!({
                "operation_id": operation_id,
                "method": method,
                "stage": stage,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }),
        )
    }

    pub fn tx_submitted(operation_id: &str, method: &str, hash: &str, gas: &str) -> Self {
        Self::new(
            EventType::TxSubmitted,
            json!({
                "operation_id": operation_id,
                "method": method,
                "hash": hash,
                "gas": gas
            }),
        )
    }

    pub fn tx_failed(operation_id: &str, method: &str, kind: &str, error: &str) -> Self {
        Self::new(
            EventType::TxFailed,
            json!({
                "operation_id": operation_id,
                "method": method,
                "kind": kind,
                "error": error
            }),
        )
    }

    pub fn notification(level: NotificationLevel, message: &str) -> Self {
        Self::new(
            EventType::Notification,
            json!({
                "level": level,
                "message": message
            }),
        )
    }
}

/// Fan-out of client events to any number of subscribers
#[derive(Debug)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Send an event; dropped silently when nobody is listening
    pub fn broadcast(&self, event: ClientEvent) {
        log::debug!("[events] {} {}", event.event, event.data);
        let _ = self.tx.send(event);
    }

    pub fn notify(&self, level: NotificationLevel, message: impl AsRef<str>) {
        let message = message.as_ref();
        match level {
            NotificationLevel::Error => log::warn!("[notify] {}", message),
            _ => log::info!("[notify] {}", message),
        }
        self.broadcast(ClientEvent::notification(level, message));
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
