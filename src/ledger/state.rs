//! World state backends
//!
//! The ledger keeps committed key/value pairs behind [`StateStore`]. Writes
//! of one transaction are applied as a single atomic unit.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::ledger::client::LedgerError;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;

    /// All entries whose key starts with `prefix`, in key order
    async fn get_state_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, LedgerError>;

    /// Apply every write or none of them
    async fn apply(&self, writes: &[(String, Vec<u8>)]) -> Result<(), LedgerError>;
}

/// Volatile world state for tests and single-process deployments
#[derive(Default)]
pub struct MemoryStateStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn get_state_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, LedgerError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn apply(&self, writes: &[(String, Vec<u8>)]) -> Result<(), LedgerError> {
        let mut entries = self.entries.write();
        for (key, value) in writes {
            entries.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// Durable world state in SQLite.
///
/// Keys are stored as BLOBs because composite keys contain NUL separators.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| LedgerError::Storage(format!("Invalid state url {}: {}", url, e)))?
            .create_if_missing(true);

        // Every in-memory connection is its own database, so keep exactly one
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to open world state: {}", e)))?;

        sqlx::raw_sql(include_str!("../../migrations/002_world_state.sql"))
            .execute(&pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("World state migration failed: {}", e)))?;

        info!("World state opened at {}", url);
        Ok(Self { pool })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        let row = sqlx::query("SELECT value FROM world_state WHERE key = ?")
            .bind(key.as_bytes())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to read state: {}", e)))?;

        Ok(row.map(|row| row.get::<Vec<u8>, _>("value")))
    }

    async fn get_state_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, LedgerError> {
        // 0xFF never occurs in UTF-8, so prefix || 0xFF bounds every key with that prefix
        let start = prefix.as_bytes().to_vec();
        let mut end = start.clone();
        end.push(0xFF);

        let rows = sqlx::query(
            "SELECT key, value FROM world_state WHERE key >= ? AND key < ? ORDER BY key",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("Failed to scan state: {}", e)))?;

        rows.into_iter()
            .map(|row| {
                let key: Vec<u8> = row.get("key");
                let key = String::from_utf8(key)
                    .map_err(|e| LedgerError::Storage(format!("Corrupt state key: {}", e)))?;
                Ok((key, row.get::<Vec<u8>, _>("value")))
            })
            .collect()
    }

    async fn apply(&self, writes: &[(String, Vec<u8>)]) -> Result<(), LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to begin commit: {}", e)))?;

        for (key, value) in writes {
            sqlx::query(
                r#"
                INSERT INTO world_state (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key.as_bytes())
            .bind(value.as_slice())
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to write state: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to commit state: {}", e)))?;
        Ok(())
    }
}
