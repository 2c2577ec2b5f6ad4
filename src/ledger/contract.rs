//! Anchor Contract
//!
//! Write-once key-value state machine with two key families:
//! `("ANCHOR", batchId) -> Anchor` and `("ANCHOR", "LATEST") -> batchId`.
//!
//! The contract only reads world state and stages writes into a
//! [`ReadWriteSet`]. Atomicity and the write-once guarantee under concurrent
//! submitters come from the ledger's commit phase, which validates the read
//! set before applying the writes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::ledger::anchor::Anchor;
use crate::ledger::client::LedgerError;
use crate::ledger::keys;
use crate::ledger::state::StateStore;

/// Event name emitted after a successful `PutAnchor`
pub const ANCHORED_EVENT: &str = "Anchored";

/// Rejection raised by the contract itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    /// `ALREADY_EXISTS`, `NOT_FOUND`, `EMPTY`, `INVALID_ARGUMENT`
    pub code: Option<String>,
    pub message: String,
    /// Key argument the failure refers to (usually a batch id)
    pub subject: String,
}

impl ContractError {
    fn new(code: &str, message: String, subject: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            message,
            subject: subject.to_string(),
        }
    }

    fn invalid(message: String) -> Self {
        Self::new("INVALID_ARGUMENT", message, "")
    }
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ContractError {}

/// Notification emitted by a committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodeEvent {
    pub tx_id: String,
    pub name: String,
    pub payload: Vec<u8>,
}

/// Reads observed and writes staged by one transaction
#[derive(Debug, Clone, Default)]
pub struct ReadWriteSet {
    pub tx_id: String,
    pub reads: Vec<(String, Option<Vec<u8>>)>,
    pub writes: Vec<(String, Vec<u8>)>,
    pub events: Vec<ChaincodeEvent>,
}

/// Per-transaction view of world state
pub struct TxContext {
    tx_id: String,
    store: Arc<dyn StateStore>,
    reads: BTreeMap<String, Option<Vec<u8>>>,
    writes: BTreeMap<String, Vec<u8>>,
    events: Vec<ChaincodeEvent>,
}

impl TxContext {
    pub fn new(tx_id: String, store: Arc<dyn StateStore>) -> Self {
        Self {
            tx_id,
            store,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// Committed value of a key; empty values count as absent
    pub async fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        let value = self
            .store
            .get_state(key)
            .await?
            .filter(|v| !v.is_empty());
        self.reads.insert(key.to_string(), value.clone());
        Ok(value)
    }

    pub async fn get_state_by_prefix(
        &mut self,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, LedgerError> {
        self.store.get_state_by_prefix(prefix).await
    }

    pub fn put_state(&mut self, key: String, value: Vec<u8>) {
        self.writes.insert(key, value);
    }

    pub fn set_event(&mut self, name: &str, payload: Vec<u8>) {
        self.events.push(ChaincodeEvent {
            tx_id: self.tx_id.clone(),
            name: name.to_string(),
            payload,
        });
    }

    pub fn into_rwset(self) -> ReadWriteSet {
        ReadWriteSet {
            tx_id: self.tx_id,
            reads: self.reads.into_iter().collect(),
            writes: self.writes.into_iter().collect(),
            events: self.events,
        }
    }
}

/// Contract functions that mutate state and must go through ordering
pub const SUBMIT_FUNCTIONS: &[&str] = &["PutAnchor"];

/// Immutable log anchor contract
#[derive(Debug, Default, Clone, Copy)]
pub struct AnchorContract;

impl AnchorContract {
    /// Dispatch a contract function by name with positional string arguments
    pub async fn invoke(
        &self,
        ctx: &mut TxContext,
        function: &str,
        args: &[String],
    ) -> Result<Vec<u8>, LedgerError> {
        debug!("Invoking {} with {} args (tx {})", function, args.len(), ctx.tx_id());
        match function {
            "PutAnchor" => {
                expect_args(function, args, 8)?;
                let tx_id = self
                    .put_anchor(
                        ctx,
                        &args[0],
                        &args[1],
                        parse_i64("count", &args[2])?,
                        parse_i64("startTsMillis", &args[3])?,
                        parse_i64("endTsMillis", &args[4])?,
                        parse_i64("processMillis", &args[5])?,
                        &args[6],
                        &args[7],
                    )
                    .await?;
                Ok(tx_id.into_bytes())
            }
            "Exists" => {
                expect_args(function, args, 1)?;
                let exists = self.exists(ctx, &args[0]).await?;
                Ok(exists.to_string().into_bytes())
            }
            "GetAnchor" => {
                expect_args(function, args, 1)?;
                serialize(&self.get_anchor(ctx, &args[0]).await?)
            }
            "ListAnchors" => {
                expect_args(function, args, 0)?;
                serialize(&self.list_anchors(ctx).await?)
            }
            "LatestAnchor" => {
                expect_args(function, args, 0)?;
                serialize(&self.latest_anchor(ctx).await?)
            }
            other => Err(LedgerError::Contract(ContractError::invalid(format!(
                "Unknown function: {}",
                other
            )))),
        }
    }

    /// Store a new anchor; fails `ALREADY_EXISTS` when the batch id is taken
    #[allow(clippy::too_many_arguments)]
    pub async fn put_anchor(
        &self,
        ctx: &mut TxContext,
        batch_id: &str,
        root: &str,
        count: i64,
        start_ts_millis: i64,
        end_ts_millis: i64,
        process_millis: i64,
        prev_root: &str,
        tx_note: &str,
    ) -> Result<String, LedgerError> {
        require_non_empty(batch_id, "batchId")?;
        require_non_empty(root, "root")?;
        if batch_id == keys::LATEST_ATTRIBUTE {
            return Err(LedgerError::Contract(ContractError::invalid(format!(
                "batchId {} is reserved",
                keys::LATEST_ATTRIBUTE
            ))));
        }
        if count <= 0 {
            return Err(LedgerError::Contract(ContractError::invalid(
                "count must be > 0".to_string(),
            )));
        }
        if end_ts_millis < start_ts_millis {
            return Err(LedgerError::Contract(ContractError::invalid(
                "endTs < startTs".to_string(),
            )));
        }

        let key = keys::anchor_key(batch_id);
        if ctx.get_state(&key).await?.is_some() {
            return Err(LedgerError::Contract(ContractError::new(
                "ALREADY_EXISTS",
                format!("Anchor already exists for batchId={}", batch_id),
                batch_id,
            )));
        }

        let anchor = Anchor {
            tx_id: ctx.tx_id().to_string(),
            batch_id: batch_id.to_string(),
            root: root.to_string(),
            count,
            start_ts_millis,
            end_ts_millis,
            prev_root: none_if_blank(prev_root),
            anchor_ts_millis: process_millis,
            tx_note: none_if_blank(tx_note),
        };
        let payload = serialize(&anchor)?;

        ctx.put_state(key, payload.clone());
        ctx.put_state(keys::latest_key(), batch_id.as_bytes().to_vec());
        ctx.set_event(ANCHORED_EVENT, payload);

        info!("Staged anchor for batch {} (tx {})", batch_id, anchor.tx_id);
        Ok(anchor.tx_id)
    }

    pub async fn exists(&self, ctx: &mut TxContext, batch_id: &str) -> Result<bool, LedgerError> {
        Ok(ctx.get_state(&keys::anchor_key(batch_id)).await?.is_some())
    }

    /// Fetch one anchor; fails `NOT_FOUND` when absent
    pub async fn get_anchor(&self, ctx: &mut TxContext, batch_id: &str) -> Result<Anchor, LedgerError> {
        match ctx.get_state(&keys::anchor_key(batch_id)).await? {
            Some(bytes) => deserialize(&bytes),
            None => Err(LedgerError::Contract(ContractError::new(
                "NOT_FOUND",
                format!("Anchor not found for batchId={}", batch_id),
                batch_id,
            ))),
        }
    }

    /// Full scan of the anchor family.
    ///
    /// Unbounded: the whole anchor set is read and returned in one response,
    /// acceptable only while the number of anchors stays small.
    pub async fn list_anchors(&self, ctx: &mut TxContext) -> Result<Vec<Anchor>, LedgerError> {
        let latest = keys::latest_key();
        let entries = ctx.get_state_by_prefix(&keys::anchor_prefix()).await?;

        let mut anchors = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            if key == latest || value.is_empty() {
                continue;
            }
            anchors.push(deserialize(&value)?);
        }
        debug!("Listed {} anchors", anchors.len());
        Ok(anchors)
    }

    /// Anchor referenced by the LATEST pointer; fails `EMPTY` when none exists
    pub async fn latest_anchor(&self, ctx: &mut TxContext) -> Result<Anchor, LedgerError> {
        let batch_id = match ctx.get_state(&keys::latest_key()).await? {
            Some(bytes) => String::from_utf8(bytes).map_err(|e| {
                LedgerError::Contract(ContractError::invalid(format!("Corrupt LATEST pointer: {}", e)))
            })?,
            None => {
                return Err(LedgerError::Contract(ContractError::new(
                    "EMPTY",
                    "No anchors yet".to_string(),
                    "",
                )))
            }
        };
        self.get_anchor(ctx, &batch_id).await
    }
}

fn expect_args(function: &str, args: &[String], expected: usize) -> Result<(), LedgerError> {
    if args.len() != expected {
        return Err(LedgerError::Contract(ContractError::invalid(format!(
            "{} expects {} arguments, got {}",
            function,
            expected,
            args.len()
        ))));
    }
    Ok(())
}

fn parse_i64(field: &str, value: &str) -> Result<i64, LedgerError> {
    value.trim().parse::<i64>().map_err(|_| {
        LedgerError::Contract(ContractError::invalid(format!(
            "{} must be an integer, got '{}'",
            field, value
        )))
    })
}

fn require_non_empty(value: &str, field: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() {
        return Err(LedgerError::Contract(ContractError::invalid(format!(
            "{} must be non-empty",
            field
        ))));
    }
    Ok(())
}

fn none_if_blank(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, LedgerError> {
    serde_json::to_vec(value).map_err(|e| {
        LedgerError::Contract(ContractError {
            code: None,
            message: format!("Serialization error: {}", e),
            subject: String::new(),
        })
    })
}

fn deserialize(bytes: &[u8]) -> Result<Anchor, LedgerError> {
    serde_json::from_slice(bytes).map_err(|e| {
        LedgerError::Contract(ContractError {
            code: None,
            message: format!("Deserialization error: {}", e),
            subject: String::new(),
        })
    })
}
