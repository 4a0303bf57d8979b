//! Consumer-group offset bookkeeping.
//!
//! The group's progress lives in an [`OffsetStore`] shared by every worker of a
//! run. Each worker talks to it through its own [`PartitionOffsets`] handle,
//! which resolves where the partition should resume and keeps the offsets it
//! asks to commit strictly increasing.
//!
//! Committed offsets follow the Kafka convention: the value is the offset of
//! the next message to consume, so acknowledging message N commits N + 1.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use rdkafka::error::KafkaError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics_consts::{OFFSET_COMMITS_REQUESTED, OFFSET_COMMIT_OUT_OF_ORDER};
use crate::types::Partition;

#[derive(Error, Debug)]
pub enum OffsetError {
    #[error("failed to fetch committed offset of group '{group}' for {partition}: {source}")]
    Fetch {
        group: String,
        partition: Partition,
        #[source]
        source: KafkaError,
    },
    #[error("failed to commit offsets of group '{group}': {source}")]
    Commit {
        group: String,
        #[source]
        source: KafkaError,
    },
    #[error("failed to create offset manager for group '{group}': {source}")]
    Setup {
        group: String,
        #[source]
        source: KafkaError,
    },
}

/// Durable per-partition progress of a consumer group.
pub trait OffsetStore: Send + Sync {
    fn group(&self) -> &str;

    /// The group's committed next-offset for `partition`, if it has one.
    fn committed(&self, partition: &Partition) -> Result<Option<i64>, OffsetError>;

    /// Queue `next_offset` for commit. Commits are asynchronous: a failure is
    /// logged by the store and never reaches the caller.
    fn commit(&self, partition: &Partition, next_offset: i64);

    /// A worker is done with `partition`. Pending requests for it may be sent.
    fn release(&self, partition: &Partition);

    /// Synchronously commit everything requested so far.
    fn flush(&self) -> Result<(), OffsetError>;
}

/// Latest requested next-offset per partition. Only ever advances.
#[derive(Debug, Default)]
pub struct CommitLedger {
    requested: DashMap<Partition, i64>,
}

impl CommitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request. Returns false when `next_offset` does not advance the
    /// partition, in which case nothing changes.
    pub fn record(&self, partition: &Partition, next_offset: i64) -> bool {
        let mut advanced = true;
        self.requested
            .entry(partition.clone())
            .and_modify(|current| {
                if next_offset > *current {
                    *current = next_offset;
                } else {
                    advanced = false;
                }
            })
            .or_insert(next_offset);
        advanced
    }

    pub fn get(&self, partition: &Partition) -> Option<i64> {
        self.requested.get(partition).map(|entry| *entry.value())
    }

    pub fn snapshot(&self) -> HashMap<Partition, i64> {
        self.requested
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }
}

/// One worker's view of the group offsets for its partition.
pub struct PartitionOffsets {
    store: Arc<dyn OffsetStore>,
    partition: Partition,
    last_requested: Option<i64>,
}

impl PartitionOffsets {
    pub fn new(store: Arc<dyn OffsetStore>, partition: Partition) -> Self {
        Self {
            store,
            partition,
            last_requested: None,
        }
    }

    /// Where the group left off, or `None` when it has never committed here.
    /// Negative values are the broker's "no offset" sentinels and count as none.
    pub fn resolve_start(&self) -> Result<Option<i64>, OffsetError> {
        Ok(self
            .store
            .committed(&self.partition)?
            .filter(|offset| *offset >= 0))
    }

    /// Ask for `next_offset` to be committed. Requests that would not move the
    /// partition forward are dropped with a warning. Returns whether the
    /// request was forwarded to the store.
    pub fn request_commit(&mut self, next_offset: i64) -> bool {
        if let Some(last) = self.last_requested {
            if next_offset <= last {
                warn!(
                    topic = self.partition.topic(),
                    partition = self.partition.partition_number(),
                    next_offset,
                    last_requested = last,
                    "Ignoring commit request that does not advance the partition"
                );
                metrics::counter!(
                    OFFSET_COMMIT_OUT_OF_ORDER,
                    "topic" => self.partition.topic().to_string(),
                    "partition" => self.partition.partition_number().to_string()
                )
                .increment(1);
                return false;
            }
        }

        debug!(
            topic = self.partition.topic(),
            partition = self.partition.partition_number(),
            next_offset,
            "Requesting offset commit"
        );
        self.store.commit(&self.partition, next_offset);
        self.last_requested = Some(next_offset);
        metrics::counter!(
            OFFSET_COMMITS_REQUESTED,
            "topic" => self.partition.topic().to_string(),
            "partition" => self.partition.partition_number().to_string()
        )
        .increment(1);
        true
    }

    pub fn last_requested(&self) -> Option<i64> {
        self.last_requested
    }

    /// Release the partition. Dropping the handle does the same.
    pub fn close(self) {}
}

impl Drop for PartitionOffsets {
    fn drop(&mut self) {
        self.store.release(&self.partition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::InMemoryOffsetStore;

    fn partition(n: i32) -> Partition {
        Partition::new("events".to_string(), n)
    }

    #[test]
    fn test_ledger_only_advances() {
        let ledger = CommitLedger::new();
        assert!(ledger.record(&partition(0), 5));
        assert!(ledger.record(&partition(0), 8));
        assert!(!ledger.record(&partition(0), 8));
        assert!(!ledger.record(&partition(0), 3));
        assert!(ledger.record(&partition(1), 1));

        assert_eq!(ledger.get(&partition(0)), Some(8));
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&partition(1)], 1);
    }

    #[test]
    fn test_resolve_start_ignores_sentinels() {
        let store = Arc::new(InMemoryOffsetStore::new("g"));
        store.set_committed(0, 42);
        store.set_committed(1, -1001);

        assert_eq!(
            PartitionOffsets::new(store.clone(), partition(0))
                .resolve_start()
                .unwrap(),
            Some(42)
        );
        assert_eq!(
            PartitionOffsets::new(store.clone(), partition(1))
                .resolve_start()
                .unwrap(),
            None
        );
        assert_eq!(
            PartitionOffsets::new(store.clone(), partition(2))
                .resolve_start()
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_request_commit_is_strictly_increasing() {
        let store = Arc::new(InMemoryOffsetStore::new("g"));
        let mut offsets = PartitionOffsets::new(store.clone(), partition(3));

        assert!(offsets.request_commit(1));
        assert!(offsets.request_commit(2));
        assert!(!offsets.request_commit(2));
        assert!(!offsets.request_commit(1));
        assert!(offsets.request_commit(5));
        assert_eq!(offsets.last_requested(), Some(5));

        offsets.close();

        assert_eq!(store.commits(), vec![(3, 1), (3, 2), (3, 5)]);
        assert_eq!(store.released(), vec![3]);
    }
}
