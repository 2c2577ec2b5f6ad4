//! Ledger client capability
//!
//! Components reach the ledger only through [`LedgerClient`]: `submit` runs a
//! state-changing transaction through endorsement, ordering and commit, while
//! `evaluate` runs a read-only query. Each phase has its own deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::crypto::sha256_hex;
use crate::ledger::contract::{
    AnchorContract, ChaincodeEvent, ContractError, ReadWriteSet, TxContext, SUBMIT_FUNCTIONS,
};
use crate::ledger::state::StateStore;

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Endorsement failed: {0}")]
    Endorse(String),

    #[error("Submission failed: {0}")]
    Submit(String),

    #[error("Commit status failed: {0}")]
    CommitStatus(String),

    #[error("{phase} deadline of {after:?} exceeded")]
    Timeout { phase: &'static str, after: Duration },

    #[error("Contract error: {0}")]
    Contract(ContractError),

    #[error("World state error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Whether retrying the same transaction can succeed.
    ///
    /// Only the endorse/submit/commit-status family (including their
    /// deadlines) is transient. Contract rejections such as a duplicate batch
    /// id never succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Endorse(_) | Self::Submit(_) | Self::CommitStatus(_) | Self::Timeout { .. }
        )
    }

    /// Contract error code, if the contract rejected the transaction
    pub fn contract_code(&self) -> Option<&str> {
        match self {
            Self::Contract(contract) => contract.code.as_deref(),
            _ => None,
        }
    }
}

/// Capability to talk to the ledger network
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Endorse, order and commit a transaction; returns the contract's result bytes
    async fn submit(&self, function: &str, args: &[String]) -> Result<Vec<u8>, LedgerError>;

    /// Run a read-only query against committed state
    async fn evaluate(&self, function: &str, args: &[String]) -> Result<Vec<u8>, LedgerError>;
}

/// Independent per-phase deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerDeadlines {
    pub evaluate: Duration,
    pub endorse: Duration,
    pub submit: Duration,
    pub commit_status: Duration,
}

impl Default for LedgerDeadlines {
    fn default() -> Self {
        Self {
            evaluate: Duration::from_secs(5),
            endorse: Duration::from_secs(15),
            submit: Duration::from_secs(5),
            commit_status: Duration::from_secs(60),
        }
    }
}

impl From<&LedgerConfig> for LedgerDeadlines {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            evaluate: Duration::from_millis(config.evaluate_timeout_ms),
            endorse: Duration::from_millis(config.endorse_timeout_ms),
            submit: Duration::from_millis(config.submit_timeout_ms),
            commit_status: Duration::from_millis(config.commit_status_timeout_ms),
        }
    }
}

/// In-process ledger executing the Anchor contract over a world state.
///
/// Commits are serialized by a single ordering lock and validated against the
/// read set captured at endorsement, so two concurrent `PutAnchor` calls for
/// the same batch id can never both commit.
pub struct LocalLedger {
    store: Arc<dyn StateStore>,
    contract: AnchorContract,
    deadlines: LedgerDeadlines,
    ordering: Mutex<()>,
    events: broadcast::Sender<ChaincodeEvent>,
}

impl LocalLedger {
    pub fn new(store: Arc<dyn StateStore>, deadlines: LedgerDeadlines) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            contract: AnchorContract,
            deadlines,
            ordering: Mutex::new(()),
            events,
        }
    }

    /// Receive chaincode events of transactions committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ChaincodeEvent> {
        self.events.subscribe()
    }

    async fn simulate(&self, function: &str, args: &[String]) -> Result<(Vec<u8>, ReadWriteSet), LedgerError> {
        let mut ctx = TxContext::new(new_tx_id(), self.store.clone());
        let result = self.contract.invoke(&mut ctx, function, args).await?;
        Ok((result, ctx.into_rwset()))
    }

    async fn validate_and_apply(&self, rwset: &ReadWriteSet) -> Result<(), LedgerError> {
        for (key, read_value) in &rwset.reads {
            let current = self
                .store
                .get_state(key)
                .await
                .map_err(|e| LedgerError::CommitStatus(e.to_string()))?
                .filter(|v| !v.is_empty());
            if &current != read_value {
                return Err(LedgerError::CommitStatus(format!(
                    "MVCC_READ_CONFLICT for tx {}",
                    rwset.tx_id
                )));
            }
        }

        self.store
            .apply(&rwset.writes)
            .await
            .map_err(|e| LedgerError::CommitStatus(e.to_string()))
    }
}

#[async_trait]
impl LedgerClient for LocalLedger {
    async fn submit(&self, function: &str, args: &[String]) -> Result<Vec<u8>, LedgerError> {
        let (result, rwset) = tokio::time::timeout(self.deadlines.endorse, self.simulate(function, args))
            .await
            .map_err(|_| LedgerError::Timeout {
                phase: "endorse",
                after: self.deadlines.endorse,
            })?
            .map_err(|e| match e {
                LedgerError::Storage(msg) => LedgerError::Endorse(msg),
                other => other,
            })?;

        let _ordered = tokio::time::timeout(self.deadlines.submit, self.ordering.lock())
            .await
            .map_err(|_| LedgerError::Timeout {
                phase: "submit",
                after: self.deadlines.submit,
            })?;

        tokio::time::timeout(self.deadlines.commit_status, self.validate_and_apply(&rwset))
            .await
            .map_err(|_| LedgerError::Timeout {
                phase: "commit status",
                after: self.deadlines.commit_status,
            })??;

        debug!("Committed tx {} ({} writes)", rwset.tx_id, rwset.writes.len());
        for event in rwset.events {
            info!("Chaincode event {} from tx {}", event.name, event.tx_id);
            // No subscribers is not an error
            let _ = self.events.send(event);
        }

        Ok(result)
    }

    async fn evaluate(&self, function: &str, args: &[String]) -> Result<Vec<u8>, LedgerError> {
        if SUBMIT_FUNCTIONS.contains(&function) {
            warn!("Evaluating {}: staged writes will be discarded", function);
        }

        let (result, _) = tokio::time::timeout(self.deadlines.evaluate, self.simulate(function, args))
            .await
            .map_err(|_| LedgerError::Timeout {
                phase: "evaluate",
                after: self.deadlines.evaluate,
            })??;
        Ok(result)
    }
}

/// 64 hex chars derived from a random nonce
fn new_tx_id() -> String {
    let mut nonce = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut nonce);
    sha256_hex(&nonce)
}
