pub mod index;
pub mod sink;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::LogChainError;

pub use index::{IndexStore, LogSearch};
pub use sink::{IndexSinkWorker, SinkKind};

/// SQLite-backed index store
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, LogChainError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Each in-memory connection would be a separate database
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            max_connections.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        info!("Index store connected at {}", database_url);
        Ok(Database { pool })
    }

    pub async fn new_in_memory() -> Result<Self, LogChainError> {
        let db = Self::new("sqlite::memory:", 1).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<(), LogChainError> {
        sqlx::raw_sql(include_str!("../../migrations/001_index_store.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
