//! User profile persistence
//!
//! Only the wallet address link is consumed: read it for a user, write it
//! after a successful connect.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::VaultError;

pub trait ProfileStore: Send + Sync {
    fn get_wallet_address(&self, user_id: &str) -> Result<Option<String>, VaultError>;
    fn set_wallet_address(&self, user_id: &str, address: &str) -> Result<(), VaultError>;
}

/// SQLite-backed profile store
pub struct SqliteProfileStore {
    conn: Mutex<Connection>,
}

impl SqliteProfileStore {
    /// Open (or create) the database and initialize the schema
    pub fn new(database_url: &str) -> Result<Self, VaultError> {
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    VaultError::Storage(format!("Failed to create {:?}: {}", parent, e))
                })?;
            }
        }

        let conn = Connection::open(database_url)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        log::info!("[profile] Profile store ready at {}", database_url);
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, VaultError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), VaultError> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                wallet_address TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

impl ProfileStore for SqliteProfileStore {
    fn get_wallet_address(&self, user_id: &str) -> Result<Option<String>, VaultError> {
        let conn = self.conn.lock();
        let address: Option<Option<String>> = conn
            .query_row(
                "SELECT wallet_address FROM profiles WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(address.flatten())
    }

    fn set_wallet_address(&self, user_id: &str, address: &str) -> Result<(), VaultError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO profiles (user_id, wallet_address, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                wallet_address = excluded.wallet_address,
                updated_at = excluded.updated_at",
            params![user_id, address, now],
        )?;
        log::debug!("[profile] Linked {} to {}", user_id, address);
        Ok(())
    }
}
