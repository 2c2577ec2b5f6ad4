pub mod api;
pub mod audit;
pub mod bundler;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod producer;
pub mod stream;

pub use error::LogChainError;
