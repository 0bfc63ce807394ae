//! VaultSpark wallet client
//!
//! Wallet session management, network guarding and contract invocation for
//! the VaultSpark swap / lend / borrow contract.

pub mod amount;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod events;
pub mod network;
pub mod pipeline;
pub mod profile;
pub mod provider;
pub mod session;
pub mod tokens;

pub use client::{ClientParts, VaultClient};
pub use config::Config;
pub use error::VaultError;
pub use session::{SessionHandle, WalletSession};
