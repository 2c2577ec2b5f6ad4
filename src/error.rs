use thiserror::Error;

use crate::ledger::client::LedgerError;

impl From<serde_json::Error> for LogChainError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LogChainError {
    fn from(err: sqlx::Error) -> Self {
        Self::IndexStoreError(format!("Database error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum LogChainError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Anchor already exists for batchId={0}")]
    DuplicateAnchor(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No anchors yet")]
    EmptyLedger,

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Ledger rejected transaction: {0}")]
    LedgerRejected(String),

    #[error("Index store error: {0}")]
    IndexStoreError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl LogChainError {
    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG",
            Self::ValidationError(_) => "INVALID_ARGUMENT",
            Self::DuplicateAnchor(_) => "ALREADY_EXISTS",
            Self::NotFound(_) => "NOT_FOUND",
            Self::EmptyLedger => "EMPTY",
            Self::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            Self::LedgerRejected(_) => "LEDGER_REJECTED",
            Self::IndexStoreError(_) => "INDEX_STORE",
            Self::StreamError(_) => "STREAM",
            Self::SerializationError(_) => "SERIALIZATION",
        }
    }
}

impl From<LedgerError> for LogChainError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Contract(contract) => match contract.code.as_deref() {
                Some("ALREADY_EXISTS") => Self::DuplicateAnchor(contract.subject),
                Some("NOT_FOUND") => Self::NotFound(contract.message),
                Some("EMPTY") => Self::EmptyLedger,
                Some("INVALID_ARGUMENT") => Self::ValidationError(contract.message),
                _ => Self::LedgerRejected(contract.message),
            },
            other => Self::LedgerUnavailable(other.to_string()),
        }
    }
}
