//! Index store queries
//!
//! The store is a cache: normalized logs are searchable by time window,
//! message and hash; enriched records are looked up by log hash and by batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use crate::audit::{EnrichedLogRecord, NormalizedLog};
use crate::database::Database;
use crate::error::LogChainError;

/// Paged search over normalized logs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSearch {
    pub hash: Option<String>,
    /// Substring of the message
    pub message: Option<String>,
    pub start_ts_millis: i64,
    pub end_ts_millis: i64,
    pub page: u32,
    pub size: u32,
}

#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn index_normalized(&self, log: &NormalizedLog) -> Result<(), LogChainError>;

    async fn index_enriched(&self, record: &EnrichedLogRecord) -> Result<(), LogChainError>;

    async fn search_logs(&self, search: &LogSearch) -> Result<Vec<NormalizedLog>, LogChainError>;

    /// Most recently indexed record for `log_hash`; a log anchored again after a
    /// failed publish resolves to its latest batch
    async fn find_enriched_by_hash(&self, log_hash: &str) -> Result<Option<EnrichedLogRecord>, LogChainError>;

    /// Records of one batch in leaf order, at most `limit`
    async fn enriched_in_batch(&self, batch_id: &str, limit: u32) -> Result<Vec<EnrichedLogRecord>, LogChainError>;
}

#[async_trait]
impl IndexStore for Database {
    async fn index_normalized(&self, log: &NormalizedLog) -> Result<(), LogChainError> {
        let ts_millis = log.epoch_millis()?;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO normalized_logs
                (hash, level, timestamp, ts_millis, message, source, salt, app, env)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.hash)
        .bind(&log.level)
        .bind(&log.timestamp)
        .bind(ts_millis)
        .bind(&log.message)
        .bind(&log.source)
        .bind(&log.salt)
        .bind(&log.app)
        .bind(&log.env)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn index_enriched(&self, record: &EnrichedLogRecord) -> Result<(), LogChainError> {
        let log_json = serde_json::to_string(&record.log)?;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO anchored_logs
                (log_hash, batch_id, leaf_index, merkle_root, ledger_tx_id, anchored_at, log_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.log.hash)
        .bind(&record.batch_id)
        .bind(record.leaf_index as i64)
        .bind(&record.merkle_root)
        .bind(&record.ledger_tx_id)
        .bind(record.anchored_at.to_rfc3339())
        .bind(log_json)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn search_logs(&self, search: &LogSearch) -> Result<Vec<NormalizedLog>, LogChainError> {
        if search.end_ts_millis < search.start_ts_millis {
            return Err(LogChainError::ValidationError(
                "endTsMillis must not be before startTsMillis".to_string(),
            ));
        }

        let hash = search.hash.as_deref().filter(|h| !h.trim().is_empty());
        let message = search.message.as_deref().filter(|m| !m.trim().is_empty());
        let offset = search.page as i64 * search.size as i64;

        let rows = sqlx::query(
            r#"
            SELECT hash, level, timestamp, message, source, salt, app, env
            FROM normalized_logs
            WHERE ts_millis >= ? AND ts_millis <= ?
              AND (? IS NULL OR hash = ?)
              AND (? IS NULL OR instr(message, ?) > 0)
            ORDER BY ts_millis, id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(search.start_ts_millis)
        .bind(search.end_ts_millis)
        .bind(hash)
        .bind(hash)
        .bind(message)
        .bind(message)
        .bind(search.size as i64)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        debug!("Log search matched {} rows", rows.len());
        Ok(rows.iter().map(normalized_from_row).collect())
    }

    async fn find_enriched_by_hash(&self, log_hash: &str) -> Result<Option<EnrichedLogRecord>, LogChainError> {
        let row = sqlx::query(
            r#"
            SELECT batch_id, leaf_index, merkle_root, ledger_tx_id, anchored_at, log_json
            FROM anchored_logs
            WHERE log_hash = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(log_hash)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(enriched_from_row).transpose()
    }

    async fn enriched_in_batch(&self, batch_id: &str, limit: u32) -> Result<Vec<EnrichedLogRecord>, LogChainError> {
        let rows = sqlx::query(
            r#"
            SELECT batch_id, leaf_index, merkle_root, ledger_tx_id, anchored_at, log_json
            FROM anchored_logs
            WHERE batch_id = ?
            ORDER BY leaf_index, id
            LIMIT ?
            "#,
        )
        .bind(batch_id)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(enriched_from_row).collect()
    }
}

fn normalized_from_row(row: &SqliteRow) -> NormalizedLog {
    NormalizedLog {
        level: row.get("level"),
        timestamp: row.get("timestamp"),
        message: row.get("message"),
        source: row.get("source"),
        salt: row.get("salt"),
        hash: row.get("hash"),
        app: row.get("app"),
        env: row.get("env"),
    }
}

fn enriched_from_row(row: &SqliteRow) -> Result<EnrichedLogRecord, LogChainError> {
    let log_json: String = row.get("log_json");
    let anchored_at: String = row.get("anchored_at");
    let anchored_at = DateTime::parse_from_rfc3339(&anchored_at)
        .map_err(|e| LogChainError::IndexStoreError(format!("Corrupt anchoredAt '{}': {}", anchored_at, e)))?
        .with_timezone(&Utc);

    Ok(EnrichedLogRecord {
        log: serde_json::from_str(&log_json)?,
        batch_id: row.get("batch_id"),
        merkle_root: row.get("merkle_root"),
        ledger_tx_id: row.get("ledger_tx_id"),
        anchored_at,
        leaf_index: row.get::<i64, _>("leaf_index") as u32,
    })
}
