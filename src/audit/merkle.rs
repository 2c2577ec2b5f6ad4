//! Merkle Engine
//!
//! Commits an ordered list of leaf hashes to a single root. The same function
//! runs when a batch is anchored and when a claim is verified, so it must stay
//! deterministic and order-sensitive.
//!
//! Each level pairs adjacent hashes left to right, concatenates their base64
//! text (not the decoded bytes) and hashes the concatenation. An odd trailing
//! element is paired with itself.

use tracing::debug;

use crate::crypto::compute_hash;
use crate::error::LogChainError;

fn next_level(current: &[String]) -> Vec<String> {
    current
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [single] => hash_pair(single, single),
            _ => unreachable!("chunks(2) yields one or two elements"),
        })
        .collect()
}

fn hash_pair(left: &str, right: &str) -> String {
    let mut combined = String::with_capacity(left.len() + right.len());
    combined.push_str(left);
    combined.push_str(right);
    compute_hash(&combined)
}

/// Compute the Merkle root of ordered leaf hashes
pub fn compute_merkle_root(leaves: &[String]) -> Result<String, LogChainError> {
    let mut current = leaves.to_vec();
    if current.is_empty() {
        return Err(LogChainError::ValidationError(
            "Cannot compute Merkle root of an empty batch".to_string(),
        ));
    }

    while current.len() > 1 {
        current = next_level(&current);
    }

    let root = current.swap_remove(0);
    debug!("Merkle root over {} leaves: {}", leaves.len(), root);
    Ok(root)
}

/// Recompute and compare against a claimed root
pub fn verify_merkle_root(leaves: &[String], claimed_root: &str) -> Result<bool, LogChainError> {
    Ok(compute_merkle_root(leaves)? == claimed_root)
}
