//! Audit trail records and integrity checks
//!
//! Normalized logs are the leaves, batches are committed with a Merkle root
//! and the Verifier recomputes that root on demand.

pub mod entry;
pub mod merkle;
pub mod verify;

pub use entry::{parse_timestamp_millis, EnrichedLogRecord, NormalizedLog};
pub use merkle::{compute_merkle_root, verify_merkle_root};
pub use verify::{check_batches, BatchReport, VerifyResult, Verifier};
