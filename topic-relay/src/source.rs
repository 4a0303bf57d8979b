use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("topic '{0}' does not exist or has no partitions")]
    UnknownTopic(String),
    #[error("kafka error during {operation} for {topic}:{partition}: {source}")]
    Kafka {
        operation: &'static str,
        topic: String,
        partition: i32,
        #[source]
        source: KafkaError,
    },
    #[error("failed to fetch metadata for topic '{topic}': {source}")]
    Metadata {
        topic: String,
        #[source]
        source: KafkaError,
    },
    #[error("failed to create consumer: {0}")]
    ConsumerCreation(#[source] KafkaError),
}

/// One message exactly as read from a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, Option<Vec<u8>>)>,
}

/// The consumption side of a cluster: partition discovery, watermarks, and
/// ordered per-partition streams. Shared by every worker of a run.
pub trait TopicSource: Send + Sync {
    fn partitions(&self, topic: &str) -> Result<Vec<i32>, SourceError>;

    /// `(low, high)`: oldest retained offset and the offset the next produced
    /// message will get.
    fn watermarks(&self, topic: &str, partition: i32) -> Result<(i64, i64), SourceError>;

    fn open_partition(
        &self,
        topic: &str,
        partition: i32,
        start_offset: i64,
    ) -> Result<Box<dyn PartitionStream>, SourceError>;
}

#[async_trait]
pub trait PartitionStream: Send {
    /// Next record in offset order. `None` once the stream is closed, which
    /// includes having drained everything the broker had at the time.
    /// Errors are transient: the stream can keep being polled after one.
    async fn next_record(&mut self) -> Option<Result<ConsumedRecord, SourceError>>;
}
