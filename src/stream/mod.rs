//! Log stream transport
//!
//! Workers only see [`StreamConsumer`] and [`StreamProducer`]. The crate ships
//! an in-process partitioned broker; a networked broker would implement the
//! same two traits.

pub mod broker;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LogChainError;

pub use broker::{MemoryBroker, MemoryConsumer};

/// One delivered record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub value: Vec<u8>,
}

/// Next offset to consume, per topic partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Offsets {
    positions: BTreeMap<(String, u32), u64>,
}

impl Offsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `record` as processed
    pub fn track(&mut self, record: &Record) {
        let next = record.offset + 1;
        self.positions
            .entry((record.topic.clone(), record.partition))
            .and_modify(|pos| *pos = (*pos).max(next))
            .or_insert(next);
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32, u64)> {
        self.positions
            .iter()
            .map(|((topic, partition), next)| (topic.as_str(), *partition, *next))
    }
}

/// Partitioned, group-managed consumption of one topic
#[async_trait]
pub trait StreamConsumer: Send + Sync {
    /// Wait up to `timeout` for records from the partitions assigned to this member
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>, LogChainError>;

    /// Persist the group's position; a member that takes over resumes from here
    async fn commit(&mut self, offsets: &Offsets) -> Result<(), LogChainError>;

    /// Deliver `record` again on the next poll
    fn rewind(&mut self, record: &Record);
}

#[async_trait]
pub trait StreamProducer: Send + Sync {
    /// Append to `topic`; records with the same key land on the same partition
    async fn send(&self, topic: &str, key: Option<&str>, value: Vec<u8>) -> Result<(), LogChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(partition: u32, offset: u64) -> Record {
        Record {
            topic: "t".to_string(),
            partition,
            offset,
            key: None,
            value: Vec::new(),
        }
    }

    fn shared_across_tasks<T: Send + Sync + ?Sized>() {}

    #[test]
    fn test_consumers_can_be_held_across_await_points() {
        // workers borrow their boxed consumer inside spawned futures
        shared_across_tasks::<dyn StreamConsumer>();
        shared_across_tasks::<Box<dyn StreamConsumer>>();
        shared_across_tasks::<MemoryConsumer>();
    }

    #[test]
    fn test_offsets_keep_highest_position() {
        let mut offsets = Offsets::new();
        offsets.track(&record(0, 4));
        offsets.track(&record(0, 2));
        offsets.track(&record(1, 0));

        let positions: Vec<_> = offsets.iter().collect();
        assert_eq!(positions, vec![("t", 0, 5), ("t", 1, 1)]);

        offsets.clear();
        assert!(offsets.is_empty());
    }
}
