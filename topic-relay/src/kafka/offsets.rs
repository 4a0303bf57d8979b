use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common_kafka::kafka_consumer::ConsumerConfigBuilder;
use common_kafka::{ClusterConfig, KafkaConfig};
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::metrics_consts::OFFSET_COMMIT_FAILURES;
use crate::offsets::{CommitLedger, OffsetError, OffsetStore};
use crate::types::Partition;

/// Reports the outcome of commits once the consumer is polled.
pub struct CommitContext {
    cluster: String,
    group: String,
    failures: AtomicU64,
}

impl CommitContext {
    fn new(cluster: &str, group: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            group: group.to_string(),
            failures: AtomicU64::new(0),
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl ClientContext for CommitContext {
    fn error(&self, error: KafkaError, reason: &str) {
        error!(
            cluster = %self.cluster,
            group = %self.group,
            error = %error,
            "librdkafka error: {}",
            reason
        );
    }
}

impl ConsumerContext for CommitContext {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(
                group = %self.group,
                partitions = offsets.count(),
                "Committed offsets"
            ),
            Err(e) => {
                warn!(group = %self.group, error = %e, "Failed to commit offsets");
                self.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(OFFSET_COMMIT_FAILURES, "group" => self.group.clone())
                    .increment(1);
            }
        }
    }
}

/// Group offsets read and committed through a consumer that never subscribes,
/// so the group is never rebalanced by this process.
pub struct KafkaOffsetStore {
    group: String,
    consumer: BaseConsumer<CommitContext>,
    ledger: CommitLedger,
    timeout: Duration,
}

impl KafkaOffsetStore {
    pub fn new(
        cluster: &ClusterConfig,
        kafka: &KafkaConfig,
        group: &str,
    ) -> Result<Self, OffsetError> {
        let consumer = ConsumerConfigBuilder::for_group_offsets(cluster, kafka, group)
            .with_client_id("topic-relay-offsets")
            .build()
            .create_with_context(CommitContext::new(&cluster.name, group))
            .map_err(|source| OffsetError::Setup {
                group: group.to_string(),
                source,
            })?;

        Ok(Self {
            group: group.to_string(),
            consumer,
            ledger: CommitLedger::new(),
            timeout: kafka.operation_timeout(),
        })
    }

    /// Async commits the broker rejected so far.
    pub fn failed_commits(&self) -> u64 {
        self.consumer.context().failures()
    }

    /// Serve queued commit callbacks without blocking. The consumer has no
    /// assignment, so polling never yields messages.
    fn drain_events(&self) {
        if let Some(Err(e)) = self.consumer.poll(Duration::ZERO) {
            warn!(group = %self.group, error = %e, "Offset consumer reported an error");
        }
    }
}

impl OffsetStore for KafkaOffsetStore {
    fn group(&self) -> &str {
        &self.group
    }

    fn committed(&self, partition: &Partition) -> Result<Option<i64>, OffsetError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(partition.topic(), partition.partition_number());

        let committed = self
            .consumer
            .committed_offsets(tpl, self.timeout)
            .map_err(|source| OffsetError::Fetch {
                group: self.group.clone(),
                partition: partition.clone(),
                source,
            })?;

        let offset = committed
            .find_partition(partition.topic(), partition.partition_number())
            .and_then(|elem| match elem.offset() {
                Offset::Offset(offset) => Some(offset),
                _ => None,
            });
        Ok(offset)
    }

    fn commit(&self, partition: &Partition, next_offset: i64) {
        if !self.ledger.record(partition, next_offset) {
            return;
        }

        let mut tpl = TopicPartitionList::new();
        let result = tpl
            .add_partition_offset(
                partition.topic(),
                partition.partition_number(),
                Offset::Offset(next_offset),
            )
            .and_then(|_| self.consumer.commit(&tpl, CommitMode::Async));

        if let Err(e) = result {
            // The ledger still holds the offset, so the final flush retries it
            warn!(
                group = %self.group,
                topic = partition.topic(),
                partition = partition.partition_number(),
                next_offset,
                error = %e,
                "Failed to queue offset commit"
            );
            metrics::counter!(OFFSET_COMMIT_FAILURES, "group" => self.group.clone()).increment(1);
        }
        self.drain_events();
    }

    fn release(&self, partition: &Partition) {
        debug!(
            group = %self.group,
            topic = partition.topic(),
            partition = partition.partition_number(),
            last_requested = ?self.ledger.get(partition),
            "Released partition offsets"
        );
    }

    fn flush(&self) -> Result<(), OffsetError> {
        if self.ledger.is_empty() {
            return Ok(());
        }

        let pending = self.ledger.snapshot();
        let mut tpl = TopicPartitionList::new();
        for (partition, next_offset) in &pending {
            tpl.add_partition_offset(
                partition.topic(),
                partition.partition_number(),
                Offset::Offset(*next_offset),
            )
            .map_err(|source| OffsetError::Commit {
                group: self.group.clone(),
                source,
            })?;
        }

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|source| {
                metrics::counter!(OFFSET_COMMIT_FAILURES, "group" => self.group.clone())
                    .increment(1);
                OffsetError::Commit {
                    group: self.group.clone(),
                    source,
                }
            })?;
        self.drain_events();

        info!(
            group = %self.group,
            partitions = pending.len(),
            failed_async_commits = self.failed_commits(),
            "Committed final offsets"
        );
        Ok(())
    }
}
