//! Partition Worker - drives the message loop of a single partition
//!
//! A worker owns everything private to its partition: the stream, the filter
//! context and the offset handle. It reads strictly in offset order and stops
//! at the first of:
//! 1. the high watermark snapshotted when the worker was built
//! 2. a message the filter marks with `stop()`
//! 3. the stream closing
//! 4. cancellation, which is only observed while waiting for the next message

use std::io;
use std::sync::Arc;

use metrics::Counter;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::envelope::{Envelope, EnvelopeError, OutgoingMessage};
use crate::filter::{FilterContext, FilterError, Verdict};
use crate::metrics_consts::{
    CONSUME_ERRORS, MESSAGES_CONSUMED, MESSAGES_FILTERED, MESSAGES_PASSED, MESSAGES_PRINTED,
    MESSAGES_PUBLISHED,
};
use crate::offsets::PartitionOffsets;
use crate::output::Printer;
use crate::publisher::{PublishError, Publisher};
use crate::source::PartitionStream;
use crate::types::{OffsetRange, Partition};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("failed to print message at offset {offset} of {partition}: {source}")]
    Print {
        partition: Partition,
        offset: i64,
        #[source]
        source: io::Error,
    },
    #[error("failed to publish message from offset {offset} of {partition}: {source}")]
    Publish {
        partition: Partition,
        offset: i64,
        #[source]
        source: PublishError,
    },
}

/// Why a worker's loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Processed the last message below the watermark snapshot
    BoundaryReached,
    /// The filter called `stop()`
    Stopped,
    /// The stream ended before the boundary
    StreamClosed,
    Cancelled,
}

impl WorkerExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerExit::BoundaryReached => "boundary",
            WorkerExit::Stopped => "stopped",
            WorkerExit::StreamClosed => "closed",
            WorkerExit::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    pub partition: i32,
    pub exit: WorkerExit,
    pub consumed: u64,
    pub delivered: u64,
    pub last_commit: Option<i64>,
}

/// Where accepted messages go. Shared by every worker of a run.
#[derive(Default)]
pub struct Delivery {
    pub printer: Option<Printer>,
    pub publisher: Option<Arc<dyn Publisher>>,
    /// Overrides the topic of every published message
    pub destination_topic: Option<String>,
}

struct WorkerMetrics {
    consumed: Counter,
    passed: Counter,
    filtered: Counter,
    printed: Counter,
    published: Counter,
    consume_errors: Counter,
}

impl WorkerMetrics {
    fn new(partition: &Partition) -> Self {
        let counter = |name: &'static str| {
            metrics::counter!(
                name,
                "topic" => partition.topic().to_string(),
                "partition" => partition.partition_number().to_string()
            )
        };
        Self {
            consumed: counter(MESSAGES_CONSUMED),
            passed: counter(MESSAGES_PASSED),
            filtered: counter(MESSAGES_FILTERED),
            printed: counter(MESSAGES_PRINTED),
            published: counter(MESSAGES_PUBLISHED),
            consume_errors: counter(CONSUME_ERRORS),
        }
    }
}

pub struct PartitionWorker {
    partition: Partition,
    range: OffsetRange,
    stream: Box<dyn PartitionStream>,
    raw: bool,
    delivery: Arc<Delivery>,
    filter: Option<FilterContext>,
    offsets: Option<PartitionOffsets>,
    metrics: WorkerMetrics,
}

impl PartitionWorker {
    pub fn new(
        partition: Partition,
        range: OffsetRange,
        stream: Box<dyn PartitionStream>,
        raw: bool,
        delivery: Arc<Delivery>,
    ) -> Self {
        let metrics = WorkerMetrics::new(&partition);
        Self {
            partition,
            range,
            stream,
            raw,
            delivery,
            filter: None,
            offsets: None,
            metrics,
        }
    }

    pub fn with_filter(mut self, filter: FilterContext) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_offsets(mut self, offsets: PartitionOffsets) -> Self {
        self.offsets = Some(offsets);
        self
    }

    /// Run the loop to completion. The stream and the offset handle are
    /// released whichever way it ends.
    pub async fn process(
        mut self,
        cancel: CancellationToken,
    ) -> Result<PartitionSummary, WorkerError> {
        info!(
            topic = self.partition.topic(),
            partition = self.partition.partition_number(),
            oldest = self.range.oldest,
            newest = self.range.newest,
            "Partition worker started"
        );

        let mut summary = PartitionSummary {
            partition: self.partition.partition_number(),
            exit: WorkerExit::Cancelled,
            consumed: 0,
            delivered: 0,
            last_commit: None,
        };
        let result = self.run_loop(&cancel, &mut summary).await;

        let PartitionWorker {
            partition,
            stream,
            offsets,
            ..
        } = self;
        drop(stream);
        if let Some(offsets) = offsets {
            summary.last_commit = offsets.last_requested();
            offsets.close();
        }

        match result {
            Ok(exit) => {
                summary.exit = exit;
                info!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    exit = exit.as_str(),
                    consumed = summary.consumed,
                    delivered = summary.delivered,
                    "Partition worker finished"
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    error = %e,
                    "Partition worker failed"
                );
                Err(e)
            }
        }
    }

    async fn run_loop(
        &mut self,
        cancel: &CancellationToken,
        summary: &mut PartitionSummary,
    ) -> Result<WorkerExit, WorkerError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(WorkerExit::Cancelled),
                next = self.stream.next_record() => next,
            };

            let record = match next {
                None => return Ok(WorkerExit::StreamClosed),
                Some(Err(e)) => {
                    warn!(
                        topic = self.partition.topic(),
                        partition = self.partition.partition_number(),
                        error = %e,
                        "Error reading from partition, skipping"
                    );
                    self.metrics.consume_errors.increment(1);
                    continue;
                }
                Some(Ok(record)) => record,
            };

            // Gaps left by compaction or transaction markers can make the
            // next readable offset land past the snapshot.
            if !self.range.contains(record.offset) {
                debug!(
                    topic = self.partition.topic(),
                    partition = self.partition.partition_number(),
                    offset = record.offset,
                    newest = self.range.newest,
                    "Reached watermark snapshot"
                );
                return Ok(WorkerExit::BoundaryReached);
            }

            summary.consumed += 1;
            self.metrics.consumed.increment(1);

            let envelope = Envelope::decode(record, self.raw)?;
            let boundary = self.range.is_last(envelope.offset);

            let (verdict, rewritten) = match &self.filter {
                Some(filter) => {
                    let evaluation = filter.evaluate(&envelope)?;
                    (evaluation.verdict, evaluation.message)
                }
                None => (Verdict::pass_through(), None),
            };

            if verdict.commit {
                if let Some(offsets) = self.offsets.as_mut() {
                    offsets.request_commit(envelope.offset + 1);
                }
            }

            if verdict.pass {
                self.metrics.passed.increment(1);
                self.delivery
                    .deliver(&self.partition, &self.metrics, &envelope, rewritten)
                    .await?;
                summary.delivered += 1;
            } else {
                self.metrics.filtered.increment(1);
            }

            if boundary {
                return Ok(WorkerExit::BoundaryReached);
            }
            if verdict.stop {
                return Ok(WorkerExit::Stopped);
            }
        }
    }
}

impl Delivery {
    async fn deliver(
        &self,
        partition: &Partition,
        metrics: &WorkerMetrics,
        envelope: &Envelope,
        rewritten: Option<OutgoingMessage>,
    ) -> Result<(), WorkerError> {
        if let (Some(printer), Some(value)) = (&self.printer, &envelope.value) {
            printer.print(value).map_err(|source| WorkerError::Print {
                partition: partition.clone(),
                offset: envelope.offset,
                source,
            })?;
            metrics.printed.increment(1);
        }

        if let Some(publisher) = &self.publisher {
            let mut message = rewritten.unwrap_or_else(|| envelope.to_outgoing());
            if let Some(topic) = &self.destination_topic {
                message = message.with_topic(topic);
            }
            publisher
                .publish(message)
                .await
                .map_err(|source| WorkerError::Publish {
                    partition: partition.clone(),
                    offset: envelope.offset,
                    source,
                })?;
            metrics.published.increment(1);
        }

        Ok(())
    }
}
