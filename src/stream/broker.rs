//! In-process partitioned broker
//!
//! Topics are created on first use with a fixed partition count. Members of a
//! consumer group split the partitions of a topic between them
//! (`partition % members == member index`), recomputed on every poll, and a
//! member taking over a partition starts from the group's committed offset.
//!
//! Offsets are absolute. A partition releases records once every group on the
//! topic has committed past them, and never holds more than the retention
//! bound; a member whose position fell below the oldest retained record
//! resumes from that record.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::error::LogChainError;
use crate::stream::{Offsets, Record, StreamConsumer, StreamProducer};

struct StoredRecord {
    key: Option<String>,
    value: Vec<u8>,
}

#[derive(Default)]
struct Partition {
    /// offset of the first retained record
    base: u64,
    records: VecDeque<StoredRecord>,
}

impl Partition {
    fn end_offset(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    /// Release every record below `offset`
    fn truncate_before(&mut self, offset: u64) -> usize {
        let count = offset.saturating_sub(self.base).min(self.records.len() as u64) as usize;
        self.records.drain(..count);
        self.base += count as u64;
        count
    }
}

struct Topic {
    partitions: Vec<Partition>,
    next_round_robin: usize,
}

#[derive(Default)]
struct Group {
    members: BTreeSet<u64>,
    committed: HashMap<u32, u64>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Topic>,
    /// keyed by (group id, topic)
    groups: HashMap<(String, String), Group>,
}

struct Inner {
    partitions: u32,
    max_poll_records: usize,
    retention_records: usize,
    state: Mutex<BrokerState>,
    appended: Notify,
    next_member: AtomicU64,
}

#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    /// Broker that only releases records once every group committed them
    pub fn new(partitions: u32, max_poll_records: usize) -> Self {
        Self::bounded(partitions, max_poll_records, usize::MAX)
    }

    /// Broker that also keeps at most `retention_records` per partition
    pub fn bounded(partitions: u32, max_poll_records: usize, retention_records: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                max_poll_records: max_poll_records.max(1),
                retention_records: retention_records.max(1),
                state: Mutex::new(BrokerState::default()),
                appended: Notify::new(),
                next_member: AtomicU64::new(0),
            }),
        }
    }

    /// Join `group` as a new member consuming `topic`
    pub fn subscribe(&self, group: &str, topic: &str) -> MemoryConsumer {
        let member_id = self.inner.next_member.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.inner.state.lock();
            ensure_topic(&mut state, topic, self.inner.partitions);
            state
                .groups
                .entry((group.to_string(), topic.to_string()))
                .or_default()
                .members
                .insert(member_id);
        }
        debug!("Member {} joined group {} on topic {}", member_id, group, topic);

        MemoryConsumer {
            broker: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            member_id,
            positions: HashMap::new(),
        }
    }

    /// Append a record and return its (partition, offset)
    pub fn append(&self, topic: &str, key: Option<&str>, value: Vec<u8>) -> (u32, u64) {
        let (partition, offset) = {
            let mut state = self.inner.state.lock();
            let partitions = self.inner.partitions;
            let topic_state = ensure_topic(&mut state, topic, partitions);

            let partition = match key {
                Some(key) => partition_for_key(key, partitions),
                None => {
                    let p = (topic_state.next_round_robin % partitions as usize) as u32;
                    topic_state.next_round_robin = topic_state.next_round_robin.wrapping_add(1);
                    p
                }
            };

            let log = &mut topic_state.partitions[partition as usize];
            let offset = log.end_offset();
            log.records.push_back(StoredRecord {
                key: key.map(str::to_string),
                value,
            });
            if log.records.len() > self.inner.retention_records {
                let oldest = log.end_offset() - self.inner.retention_records as u64;
                log.truncate_before(oldest);
            }
            (partition, offset)
        };

        self.inner.appended.notify_waiters();
        (partition, offset)
    }

    /// Every retained record of `topic`, partition by partition
    pub fn records(&self, topic: &str) -> Vec<Record> {
        let state = self.inner.state.lock();
        let Some(topic_state) = state.topics.get(topic) else {
            return Vec::new();
        };

        topic_state
            .partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                let base = log.base;
                log.records.iter().enumerate().map(move |(i, stored)| Record {
                    topic: topic.to_string(),
                    partition: partition as u32,
                    offset: base + i as u64,
                    key: stored.key.clone(),
                    value: stored.value.clone(),
                })
            })
            .collect()
    }

    /// Records of `topic` still held in memory
    pub fn topic_len(&self, topic: &str) -> usize {
        let state = self.inner.state.lock();
        state
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().map(|p| p.records.len()).sum())
            .unwrap_or(0)
    }

    /// Records ever appended to `topic`, released or not
    pub fn appended(&self, topic: &str) -> u64 {
        let state = self.inner.state.lock();
        state
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().map(Partition::end_offset).sum())
            .unwrap_or(0)
    }

    /// Committed position of `group` on one partition
    pub fn committed(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        let state = self.inner.state.lock();
        state
            .groups
            .get(&(group.to_string(), topic.to_string()))
            .and_then(|g| g.committed.get(&partition).copied())
    }

    /// Records appended but not yet committed by `group`
    pub fn lag(&self, group: &str, topic: &str) -> u64 {
        let state = self.inner.state.lock();
        let Some(topic_state) = state.topics.get(topic) else {
            return 0;
        };
        let group_state = state.groups.get(&(group.to_string(), topic.to_string()));

        topic_state
            .partitions
            .iter()
            .enumerate()
            .map(|(partition, log)| {
                let committed = group_state
                    .and_then(|g| g.committed.get(&(partition as u32)).copied())
                    .unwrap_or(0);
                log.end_offset().saturating_sub(committed)
            })
            .sum()
    }
}

#[async_trait]
impl StreamProducer for MemoryBroker {
    async fn send(&self, topic: &str, key: Option<&str>, value: Vec<u8>) -> Result<(), LogChainError> {
        self.append(topic, key, value);
        Ok(())
    }
}

fn ensure_topic<'a>(state: &'a mut BrokerState, topic: &str, partitions: u32) -> &'a mut Topic {
    state.topics.entry(topic.to_string()).or_insert_with(|| Topic {
        partitions: (0..partitions).map(|_| Partition::default()).collect(),
        next_round_robin: 0,
    })
}

/// Drop the records of `partition` that every group on `topic` has committed
fn release_committed(state: &mut BrokerState, topic: &str, partition: u32) {
    let floor = state
        .groups
        .iter()
        .filter(|((_, t), _)| t == topic)
        .map(|(_, group)| group.committed.get(&partition).copied().unwrap_or(0))
        .min();
    let Some(floor) = floor else {
        return;
    };

    if let Some(log) = state
        .topics
        .get_mut(topic)
        .and_then(|t| t.partitions.get_mut(partition as usize))
    {
        let released = log.truncate_before(floor);
        if released > 0 {
            debug!("Released {} committed records from {}/{}", released, topic, partition);
        }
    }
}

/// Stable partition for a key: first four bytes of its SHA-256
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % partitions.max(1)
}

/// One group member; leaves the group when dropped
pub struct MemoryConsumer {
    broker: MemoryBroker,
    group: String,
    topic: String,
    member_id: u64,
    /// fetch position of each partition currently owned
    positions: HashMap<u32, u64>,
}

impl MemoryConsumer {
    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    fn fetch(&mut self) -> Vec<Record> {
        let inner = &self.broker.inner;
        let state = inner.state.lock();
        let group_key = (self.group.clone(), self.topic.clone());
        let Some(group) = state.groups.get(&group_key) else {
            return Vec::new();
        };

        let members = group.members.len().max(1);
        let index = group
            .members
            .iter()
            .position(|id| *id == self.member_id)
            .unwrap_or(0);

        let assigned: Vec<u32> = (0..inner.partitions)
            .filter(|p| *p as usize % members == index)
            .collect();

        self.positions.retain(|p, _| assigned.contains(p));
        for partition in &assigned {
            self.positions
                .entry(*partition)
                .or_insert_with(|| group.committed.get(partition).copied().unwrap_or(0));
        }

        let Some(topic_state) = state.topics.get(&self.topic) else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for partition in assigned {
            let fetched = records.len();
            let remaining = inner.max_poll_records - fetched;
            if remaining == 0 {
                break;
            }

            let log = &topic_state.partitions[partition as usize];
            let Some(position) = self.positions.get_mut(&partition) else {
                continue;
            };
            let start = (*position).clamp(log.base, log.end_offset());
            let skip = (start - log.base) as usize;

            for (i, stored) in log.records.iter().skip(skip).take(remaining).enumerate() {
                records.push(Record {
                    topic: self.topic.clone(),
                    partition,
                    offset: start + i as u64,
                    key: stored.key.clone(),
                    value: stored.value.clone(),
                });
            }
            *position = start + (records.len() - fetched) as u64;
        }

        records
    }
}

#[async_trait]
impl StreamConsumer for MemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>, LogChainError> {
        let deadline = Instant::now() + timeout;
        let inner = self.broker.inner.clone();

        loop {
            // Register for wake-ups before looking, so an append in between is not missed
            let appended = inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let records = self.fetch();
            if !records.is_empty() {
                return Ok(records);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, appended).await;
        }
    }

    async fn commit(&mut self, offsets: &Offsets) -> Result<(), LogChainError> {
        let mut guard = self.broker.inner.state.lock();
        let state = &mut *guard;
        let group = state
            .groups
            .get_mut(&(self.group.clone(), self.topic.clone()))
            .ok_or_else(|| {
                LogChainError::StreamError(format!("Group {} is not subscribed to {}", self.group, self.topic))
            })?;

        for (topic, partition, next) in offsets.iter() {
            if topic != self.topic {
                return Err(LogChainError::StreamError(format!(
                    "Cannot commit {} offsets from a consumer of {}",
                    topic, self.topic
                )));
            }
            let committed = group.committed.entry(partition).or_insert(0);
            *committed = (*committed).max(next);
        }

        for (_, partition, _) in offsets.iter() {
            release_committed(state, &self.topic, partition);
        }
        Ok(())
    }

    fn rewind(&mut self, record: &Record) {
        if let Some(position) = self.positions.get_mut(&record.partition) {
            *position = (*position).min(record.offset);
        }
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let mut state = self.broker.inner.state.lock();
        if let Some(group) = state
            .groups
            .get_mut(&(self.group.clone(), self.topic.clone()))
        {
            group.members.remove(&self.member_id);
        }
        debug!("Member {} left group {}", self.member_id, self.group);
    }
}
