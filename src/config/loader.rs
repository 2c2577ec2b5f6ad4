//! Layered configuration loading
//!
//! Built-in defaults, then an optional TOML file, then `LOGCHAIN__SECTION__FIELD`
//! environment overrides.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use tracing::info;

use crate::config::{AppConfig, ENV_PREFIX};
use crate::error::LogChainError;

impl AppConfig {
    /// Load and validate the configuration
    pub fn load(path: Option<&Path>) -> Result<Self, LogChainError> {
        let defaults = Config::try_from(&AppConfig::default())
            .map_err(|e| LogChainError::ConfigError(format!("Invalid defaults: {}", e)))?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(LogChainError::ConfigError(format!(
                    "Configuration file not found: {:?}",
                    path
                )));
            }
            info!("Loading configuration from {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("bundler.filters"),
        );

        let config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LogChainError::ConfigError(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), LogChainError> {
        if self.stream.partitions == 0 {
            return Err(invalid("stream.partitions must be > 0"));
        }
        if self.stream.max_poll_records == 0 {
            return Err(invalid("stream.max_poll_records must be > 0"));
        }
        if self.stream.retention_records == 0 {
            return Err(invalid("stream.retention_records must be > 0"));
        }

        if self.normalizer.workers == 0 {
            return Err(invalid("normalizer.workers must be > 0"));
        }
        require_topic("normalizer.consume_topic", &self.normalizer.consume_topic)?;
        require_topic("normalizer.produce_topic", &self.normalizer.produce_topic)?;
        if self.normalizer.consume_topic == self.normalizer.produce_topic {
            return Err(invalid("normalizer consume and produce topics must differ"));
        }

        if self.bundler.workers == 0 {
            return Err(invalid("bundler.workers must be > 0"));
        }
        if self.bundler.batch_size == 0 {
            return Err(invalid("bundler.batch_size must be > 0"));
        }
        if self.bundler.max_retries == 0 {
            return Err(invalid("bundler.max_retries must be > 0"));
        }
        require_topic("bundler.consume_topic", &self.bundler.consume_topic)?;
        require_topic("bundler.produce_topic", &self.bundler.produce_topic)?;
        if self.bundler.consume_topic == self.bundler.produce_topic {
            return Err(invalid("bundler consume and produce topics must differ"));
        }
        if let Some(dlq) = &self.bundler.dead_letter_topic {
            require_topic("bundler.dead_letter_topic", dlq)?;
            if dlq == &self.bundler.consume_topic {
                return Err(invalid("bundler dead letter topic must differ from its consume topic"));
            }
        }

        if self.verifier.batch_limit == 0 {
            return Err(invalid("verifier.batch_limit must be > 0"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> LogChainError {
    LogChainError::ConfigError(message.to_string())
}

fn require_topic(name: &str, topic: &str) -> Result<(), LogChainError> {
    if topic.trim().is_empty() {
        return Err(LogChainError::ConfigError(format!("{} must not be empty", name)));
    }
    Ok(())
}
