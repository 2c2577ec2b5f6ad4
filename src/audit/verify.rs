//! Batch verification
//!
//! Given one leaf hash, locate its batch in the index store, recompute the
//! Merkle root over the batch in leaf order and compare it with the root the
//! records carry. Without the ledger cross-check this only proves the index
//! store is self-consistent; with it, the ledger's anchored root must agree
//! as well.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::entry::EnrichedLogRecord;
use crate::audit::merkle::{compute_merkle_root, verify_merkle_root};
use crate::database::IndexStore;
use crate::error::LogChainError;
use crate::ledger::AnchorLedger;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub is_valid: bool,
    pub batch_id: Option<String>,
    pub root: Option<String>,
    /// The other leaves of the batch, in leaf order
    pub leaf_hash: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_root: Option<String>,
}

#[derive(Clone)]
pub struct Verifier {
    store: Arc<dyn IndexStore>,
    ledger: Option<AnchorLedger>,
    batch_limit: u32,
}

impl Verifier {
    pub fn new(store: Arc<dyn IndexStore>, batch_limit: u32) -> Self {
        Self {
            store,
            ledger: None,
            batch_limit,
        }
    }

    /// Also require the root anchored on the ledger to match
    pub fn with_ledger_cross_check(mut self, ledger: AnchorLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub async fn verify(&self, log_hash: &str) -> Result<VerifyResult, LogChainError> {
        if log_hash.trim().is_empty() {
            return Err(LogChainError::ValidationError("logHash must be non-empty".to_string()));
        }

        let Some(found) = self.store.find_enriched_by_hash(log_hash).await? else {
            debug!("No anchored record for hash {}", log_hash);
            return Ok(VerifyResult::default());
        };

        let records = self
            .store
            .enriched_in_batch(&found.batch_id, self.batch_limit)
            .await?;
        if records.len() as u32 >= self.batch_limit {
            warn!(
                "Batch {} reached the verification limit of {} records",
                found.batch_id, self.batch_limit
            );
        }

        let leaves: Vec<String> = records.iter().map(|r| r.log.hash.clone()).collect();
        let claimed_root = records
            .first()
            .map(|r| r.merkle_root.clone())
            .unwrap_or_else(|| found.merkle_root.clone());

        let roots_agree = records.iter().all(|r| r.merkle_root == claimed_root);
        let mut is_valid =
            roots_agree && !leaves.is_empty() && verify_merkle_root(&leaves, &claimed_root)?;

        let mut ledger_root = None;
        if let Some(ledger) = &self.ledger {
            match ledger.get_anchor(&found.batch_id).await {
                Ok(anchor) => {
                    is_valid = is_valid && anchor.root == claimed_root;
                    ledger_root = Some(anchor.root);
                }
                Err(LogChainError::NotFound(_)) => {
                    warn!("Batch {} is indexed but not anchored", found.batch_id);
                    is_valid = false;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Verified hash {} in batch {}: valid={} ({} leaves)",
            log_hash,
            found.batch_id,
            is_valid,
            leaves.len()
        );

        Ok(VerifyResult {
            is_valid,
            batch_id: Some(found.batch_id),
            root: Some(claimed_root),
            leaf_hash: leaves.into_iter().filter(|h| h != log_hash).collect(),
            ledger_root,
        })
    }
}

/// Offline re-check of one batch from an export of enriched records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: String,
    pub count: usize,
    /// Distinct roots carried by the batch's records
    pub recorded_roots: BTreeSet<String>,
    pub recomputed_root: String,
    /// Leaf positions below the highest index that never appeared
    pub missing_leaves: Vec<u32>,
    /// Leaves whose carried hash does not match their fields
    pub forged_leaves: Vec<u32>,
}

impl BatchReport {
    pub fn is_valid(&self) -> bool {
        self.recorded_roots.len() == 1
            && self.recorded_roots.contains(&self.recomputed_root)
            && self.missing_leaves.is_empty()
            && self.forged_leaves.is_empty()
    }
}

/// Regroup enriched records by batch and recompute every root.
///
/// Records may arrive in any order and more than once; duplicates of a leaf
/// position are ignored.
pub fn check_batches(records: &[EnrichedLogRecord]) -> Result<Vec<BatchReport>, LogChainError> {
    let mut batches: BTreeMap<&str, BTreeMap<u32, &EnrichedLogRecord>> = BTreeMap::new();
    for record in records {
        batches
            .entry(record.batch_id.as_str())
            .or_default()
            .entry(record.leaf_index)
            .or_insert(record);
    }

    let mut reports = Vec::with_capacity(batches.len());
    for (batch_id, leaves) in batches {
        let highest = leaves.keys().next_back().copied().unwrap_or(0);
        let missing_leaves = (0..=highest).filter(|i| !leaves.contains_key(i)).collect();
        let forged_leaves = leaves
            .iter()
            .filter(|(_, r)| !r.log.verify_hash())
            .map(|(i, _)| *i)
            .collect();
        let hashes: Vec<String> = leaves.values().map(|r| r.log.hash.clone()).collect();

        reports.push(BatchReport {
            batch_id: batch_id.to_string(),
            count: leaves.len(),
            recorded_roots: leaves.values().map(|r| r.merkle_root.clone()).collect(),
            recomputed_root: compute_merkle_root(&hashes)?,
            missing_leaves,
            forged_leaves,
        });
    }
    Ok(reports)
}
