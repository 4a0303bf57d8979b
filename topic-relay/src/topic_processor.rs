//! Topic Processor - fans a topic out to one worker per partition
//!
//! Workers are built one partition at a time, in partition order, and then
//! all run concurrently under a single cancellation scope. The first worker
//! to fail takes the rest of the run down with it.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::filter::{FilterError, FilterScript};
use crate::metrics_consts::{
    ACTIVE_WORKERS, PARTITIONS_SCHEDULED, PARTITIONS_SKIPPED, WORKERS_FINISHED,
};
use crate::offsets::{OffsetError, OffsetStore, PartitionOffsets};
use crate::partition_worker::{Delivery, PartitionSummary, PartitionWorker, WorkerError};
use crate::source::{SourceError, TopicSource};
use crate::types::{OffsetRange, Partition};

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Offsets(#[from] OffsetError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("partition worker panicked: {0}")]
    Panicked(#[from] JoinError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// One entry per scheduled partition, in partition order
    pub partitions: Vec<PartitionSummary>,
    pub skipped: Vec<i32>,
}

impl RunSummary {
    pub fn consumed(&self) -> u64 {
        self.partitions.iter().map(|p| p.consumed).sum()
    }

    pub fn delivered(&self) -> u64 {
        self.partitions.iter().map(|p| p.delivered).sum()
    }
}

pub struct TopicProcessor {
    topic: String,
    raw: bool,
    source: Arc<dyn TopicSource>,
    delivery: Arc<Delivery>,
    filter: Option<FilterScript>,
    offsets: Option<Arc<dyn OffsetStore>>,
}

impl TopicProcessor {
    pub fn new(
        topic: impl Into<String>,
        raw: bool,
        source: Arc<dyn TopicSource>,
        delivery: Arc<Delivery>,
    ) -> Self {
        Self {
            topic: topic.into(),
            raw,
            source,
            delivery,
            filter: None,
            offsets: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterScript) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Track progress in a consumer group: resume from its committed offsets
    /// and let the filter commit.
    pub fn with_offsets(mut self, offsets: Arc<dyn OffsetStore>) -> Self {
        self.offsets = Some(offsets);
        self
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary, ProcessorError> {
        let result = self.run_workers(cancel).await;
        self.teardown().await;
        result
    }

    async fn run_workers(&self, cancel: CancellationToken) -> Result<RunSummary, ProcessorError> {
        let (workers, skipped) = self.build_workers()?;
        let mut summary = RunSummary {
            partitions: Vec::with_capacity(workers.len()),
            skipped,
        };

        info!(
            topic = %self.topic,
            workers = workers.len(),
            skipped = summary.skipped.len(),
            "Starting partition workers"
        );
        metrics::gauge!(ACTIVE_WORKERS).set(workers.len() as f64);

        let scope = cancel.child_token();
        let mut tasks = JoinSet::new();
        for worker in workers {
            tasks.spawn(worker.process(scope.clone()));
        }

        let mut first_error: Option<ProcessorError> = None;
        while let Some(joined) = tasks.join_next().await {
            metrics::gauge!(ACTIVE_WORKERS).decrement(1.0);

            let outcome = match joined {
                Ok(Ok(partition)) => {
                    metrics::counter!(WORKERS_FINISHED, "exit" => partition.exit.as_str())
                        .increment(1);
                    summary.partitions.push(partition);
                    continue;
                }
                Ok(Err(e)) => ProcessorError::from(e),
                Err(e) => ProcessorError::from(e),
            };

            metrics::counter!(WORKERS_FINISHED, "exit" => "failed").increment(1);
            if first_error.is_none() {
                error!(
                    topic = %self.topic,
                    error = %outcome,
                    "Partition worker failed, cancelling run"
                );
                scope.cancel();
                first_error = Some(outcome);
            } else {
                warn!(topic = %self.topic, error = %outcome, "Additional worker failure");
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        summary.partitions.sort_by_key(|p| p.partition);
        Ok(summary)
    }

    /// Build a worker for every partition that has something to read.
    /// Workers already built are dropped, releasing their streams, if a later
    /// partition fails.
    fn build_workers(&self) -> Result<(Vec<PartitionWorker>, Vec<i32>), ProcessorError> {
        let partitions = self.source.partitions(&self.topic)?;
        let mut workers = Vec::with_capacity(partitions.len());
        let mut skipped = Vec::new();

        for number in partitions {
            let partition = Partition::new(self.topic.clone(), number);
            let (low, high) = self.source.watermarks(&self.topic, number)?;

            let offsets = self
                .offsets
                .as_ref()
                .map(|store| PartitionOffsets::new(store.clone(), partition.clone()));
            let committed = match &offsets {
                Some(offsets) => offsets.resolve_start()?,
                None => None,
            };
            // A committed offset below the retention floor is gone.
            let range = OffsetRange::new(committed.unwrap_or(low).max(low), high);

            if range.is_empty() {
                info!(
                    topic = %self.topic,
                    partition = number,
                    oldest = range.oldest,
                    newest = range.newest,
                    "Nothing to read in partition, skipping"
                );
                metrics::counter!(PARTITIONS_SKIPPED, "topic" => self.topic.clone()).increment(1);
                if let Some(offsets) = offsets {
                    offsets.close();
                }
                skipped.push(number);
                continue;
            }

            let stream = self.source.open_partition(&self.topic, number, range.oldest)?;
            let mut worker =
                PartitionWorker::new(partition, range, stream, self.raw, self.delivery.clone());
            if let Some(filter) = &self.filter {
                worker = worker.with_filter(filter.instantiate()?);
            }
            if let Some(offsets) = offsets {
                worker = worker.with_offsets(offsets);
            }

            metrics::counter!(PARTITIONS_SCHEDULED, "topic" => self.topic.clone()).increment(1);
            workers.push(worker);
        }

        Ok((workers, skipped))
    }

    async fn teardown(&self) {
        if let Some(publisher) = &self.delivery.publisher {
            if let Err(e) = publisher.flush().await {
                warn!(error = %e, "Failed to flush publisher");
            }
        }
        if let Some(offsets) = &self.offsets {
            if let Err(e) = offsets.flush() {
                warn!(group = offsets.group(), error = %e, "Failed to flush offsets");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterMode;
    use crate::partition_worker::WorkerExit;
    use crate::test_utils::{InMemoryOffsetStore, InMemorySource, RecordingPublisher};

    const FIVE: [&str; 5] = [
        r#"{"n":0}"#,
        r#"{"n":1}"#,
        r#"{"n":2}"#,
        r#"{"n":3}"#,
        r#"{"n":4}"#,
    ];

    fn publishing(publisher: &Arc<RecordingPublisher>) -> Arc<Delivery> {
        Arc::new(Delivery {
            publisher: Some(publisher.clone()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_empty_partitions_are_not_scheduled() {
        let source = Arc::new(
            InMemorySource::new("events")
                .with_partition(0, 0, &FIVE)
                .with_partition(1, 7, &[]),
        );
        let publisher = Arc::new(RecordingPublisher::default());

        let summary = TopicProcessor::new("events", false, source.clone(), publishing(&publisher))
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.partitions.len(), 1);
        assert_eq!(summary.partitions[0].exit, WorkerExit::BoundaryReached);
        assert_eq!(summary.skipped, vec![1]);
        assert_eq!(source.opened(), vec![(0, 0)]);
        assert_eq!(publisher.field_values("n"), vec![0, 1, 2, 3, 4]);
        assert_eq!(publisher.flushes(), 1);
    }

    #[tokio::test]
    async fn test_resumes_from_committed_offset() {
        let source = Arc::new(
            InMemorySource::new("events")
                .with_partition(0, 0, &FIVE)
                .with_partition(1, 0, &FIVE),
        );
        let store = Arc::new(InMemoryOffsetStore::new("g"));
        store.set_committed(0, 3);
        store.set_committed(1, 5);
        let publisher = Arc::new(RecordingPublisher::default());

        let summary = TopicProcessor::new("events", false, source.clone(), publishing(&publisher))
            .with_offsets(store.clone())
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.opened(), vec![(0, 3)]);
        assert_eq!(summary.skipped, vec![1]);
        assert_eq!(publisher.field_values("n"), vec![3, 4]);
        assert_eq!(store.released(), vec![0, 1]);
        assert_eq!(store.flushes(), 1);
    }

    #[tokio::test]
    async fn test_committed_offset_below_retention_starts_at_low_watermark() {
        let source = Arc::new(InMemorySource::new("events").with_partition(0, 10, &FIVE[..2]));
        let store = Arc::new(InMemoryOffsetStore::new("g"));
        store.set_committed(0, 4);

        TopicProcessor::new("events", false, source.clone(), Arc::new(Delivery::default()))
            .with_offsets(store)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.opened(), vec![(0, 10)]);
    }

    #[tokio::test]
    async fn test_filter_commits_across_partitions() {
        let source = Arc::new(
            InMemorySource::new("events")
                .with_partition(0, 0, &FIVE)
                .with_partition(1, 0, &FIVE[..2]),
        );
        let store = Arc::new(InMemoryOffsetStore::new("g"));
        let filter = FilterScript::compile("commit()", FilterMode::default()).unwrap();

        let summary =
            TopicProcessor::new("events", false, source, Arc::new(Delivery::default()))
                .with_filter(filter)
                .with_offsets(store.clone())
                .run(CancellationToken::new())
                .await
                .unwrap();

        let mut commits = store.commits();
        commits.sort();
        assert_eq!(
            commits,
            vec![(0, 1), (0, 2), (0, 3), (0, 4), (0, 5), (1, 1), (1, 2)]
        );
        assert_eq!(summary.partitions[0].last_commit, Some(5));
        assert_eq!(summary.partitions[1].last_commit, Some(2));
    }

    #[tokio::test]
    async fn test_first_error_cancels_siblings() {
        // Partition 1 never ends on its own; only cancellation can stop it
        let source = Arc::new(
            InMemorySource::new("events")
                .with_partition(0, 0, &["{not json"])
                .with_partition(1, 0, &FIVE)
                .with_high_watermark(1, 100)
                .hold_open(),
        );
        let publisher = Arc::new(RecordingPublisher::default());

        let err = TopicProcessor::new("events", false, source, publishing(&publisher))
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::Worker(WorkerError::Envelope(_))));
        assert_eq!(publisher.flushes(), 1);
    }

    #[tokio::test]
    async fn test_external_cancellation_is_not_an_error() {
        let source = Arc::new(
            InMemorySource::new("events")
                .with_partition(0, 0, &FIVE)
                .hold_open(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = TopicProcessor::new("events", false, source, Arc::new(Delivery::default()))
            .run(cancel)
            .await
            .unwrap();

        assert_eq!(summary.partitions[0].exit, WorkerExit::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_fatal() {
        let source = Arc::new(InMemorySource::new("events").with_partition(0, 0, &FIVE));

        let err = TopicProcessor::new("missing", false, source, Arc::new(Delivery::default()))
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProcessorError::Source(SourceError::UnknownTopic(_))
        ));
    }
}
