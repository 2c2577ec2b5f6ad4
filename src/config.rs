use serde::{Deserialize, Serialize};

pub mod loader;

/// Prefix of environment overrides, e.g. `LOGCHAIN__BUNDLER__BATCH_SIZE=10`
pub const ENV_PREFIX: &str = "LOGCHAIN";

/// Environment variable naming the TOML file when `--config` is absent
pub const CONFIG_PATH_ENV: &str = "LOGCHAIN_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub stream: StreamConfig,
    pub normalizer: NormalizerConfig,
    pub bundler: BundlerConfig,
    pub indexer: IndexerConfig,
    pub verifier: VerifierConfig,
    pub producer: ProducerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Index store (queryable cache of normalized and enriched records)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub index_url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            index_url: "sqlite://log-chain-index.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite url of the world state; in-memory when unset
    pub state_url: Option<String>,
    pub evaluate_timeout_ms: u64,
    pub endorse_timeout_ms: u64,
    pub submit_timeout_ms: u64,
    pub commit_status_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            state_url: Some("sqlite://log-chain-ledger.db".to_string()),
            evaluate_timeout_ms: 5_000,
            endorse_timeout_ms: 15_000,
            submit_timeout_ms: 5_000,
            commit_status_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub partitions: u32,
    pub max_poll_records: usize,
    pub poll_timeout_ms: u64,
    /// Upper bound on records held per partition, committed or not
    pub retention_records: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            partitions: 6,
            max_poll_records: 500,
            poll_timeout_ms: 100,
            retention_records: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub workers: usize,
    pub group_id: String,
    pub consume_topic: String,
    pub produce_topic: String,
    pub app: String,
    pub env: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            group_id: "log-normalizer".to_string(),
            consume_topic: "logs.raw".to_string(),
            produce_topic: "logs.normalized".to_string(),
            app: "my-app".to_string(),
            env: "prod".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchIdStrategy {
    /// `{millis}-{3 random letters}`
    EpochRandom,
    /// `{millis}-{uuid v4}`
    EpochUuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlerConfig {
    pub workers: usize,
    pub group_id: String,
    pub consume_topic: String,
    pub produce_topic: String,
    /// Batches that cannot be anchored land here; the worker stops when unset
    pub dead_letter_topic: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Message substrings copied into the anchor note
    pub filters: Vec<String>,
    pub batch_id_strategy: BatchIdStrategy,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            group_id: "log-bundler".to_string(),
            consume_topic: "logs.normalized".to_string(),
            produce_topic: "logs.anchored".to_string(),
            dead_letter_topic: Some("logs.anchor.dlq".to_string()),
            batch_size: 5,
            max_retries: 3,
            retry_delay_ms: 1_000,
            filters: Vec::new(),
            batch_id_strategy: BatchIdStrategy::EpochUuid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub enabled: bool,
    pub normalized_group_id: String,
    pub anchored_group_id: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            normalized_group_id: "log-indexer-normalized".to_string(),
            anchored_group_id: "log-indexer-anchored".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Upper bound on records fetched for one batch
    pub batch_limit: u32,
    /// Also require the ledger's root to match
    pub cross_check_ledger: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            batch_limit: 1_000,
            cross_check_ledger: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub source: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1_000,
            source: "booking-service".to_string(),
        }
    }
}
