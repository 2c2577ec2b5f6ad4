//! Anchor Ledger
//!
//! Write-once key-value state machine that stores one Anchor per batch, the
//! client capability used to reach it, and a typed facade over that capability.

pub mod anchor;
pub mod client;
pub mod contract;
pub mod facade;
pub mod keys;
pub mod state;

pub use anchor::{Anchor, PutAnchorRequest};
pub use client::{LedgerClient, LedgerDeadlines, LedgerError, LocalLedger};
pub use contract::{AnchorContract, ChaincodeEvent, ContractError, ANCHORED_EVENT};
pub use facade::AnchorLedger;
pub use state::{MemoryStateStore, SqliteStateStore, StateStore};
