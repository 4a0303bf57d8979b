use std::time::Duration;

use async_trait::async_trait;
use common_kafka::kafka_consumer::ConsumerConfigBuilder;
use common_kafka::kafka_producer::KafkaContext;
use common_kafka::{ClusterConfig, KafkaConfig};
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use tracing::debug;

use crate::source::{ConsumedRecord, PartitionStream, SourceError, TopicSource};

/// Reads a topic partition by partition. Metadata and watermark lookups go
/// through one shared client; every opened partition gets its own
/// assign-only consumer.
pub struct KafkaTopicSource {
    cluster: ClusterConfig,
    kafka: KafkaConfig,
    metadata: BaseConsumer<KafkaContext>,
    timeout: Duration,
}

impl KafkaTopicSource {
    pub fn new(cluster: &ClusterConfig, kafka: &KafkaConfig) -> Result<Self, SourceError> {
        let metadata = ConsumerConfigBuilder::for_partition_reader(cluster, kafka)
            .with_client_id("topic-relay-metadata")
            .build()
            .create_with_context(KafkaContext::new(&cluster.name))
            .map_err(SourceError::ConsumerCreation)?;

        Ok(Self {
            cluster: cluster.clone(),
            kafka: kafka.clone(),
            metadata,
            timeout: kafka.operation_timeout(),
        })
    }
}

impl TopicSource for KafkaTopicSource {
    fn partitions(&self, topic: &str) -> Result<Vec<i32>, SourceError> {
        let metadata = self
            .metadata
            .fetch_metadata(Some(topic), self.timeout)
            .map_err(|source| SourceError::Metadata {
                topic: topic.to_string(),
                source,
            })?;

        let Some(topic_metadata) = metadata.topics().iter().find(|t| t.name() == topic) else {
            return Err(SourceError::UnknownTopic(topic.to_string()));
        };
        if topic_metadata.error().is_some() || topic_metadata.partitions().is_empty() {
            return Err(SourceError::UnknownTopic(topic.to_string()));
        }

        let mut partitions: Vec<i32> = topic_metadata
            .partitions()
            .iter()
            .map(|p| p.id())
            .collect();
        partitions.sort_unstable();
        Ok(partitions)
    }

    fn watermarks(&self, topic: &str, partition: i32) -> Result<(i64, i64), SourceError> {
        self.metadata
            .fetch_watermarks(topic, partition, self.timeout)
            .map_err(|source| SourceError::Kafka {
                operation: "fetch_watermarks",
                topic: topic.to_string(),
                partition,
                source,
            })
    }

    fn open_partition(
        &self,
        topic: &str,
        partition: i32,
        start_offset: i64,
    ) -> Result<Box<dyn PartitionStream>, SourceError> {
        let consumer: StreamConsumer<KafkaContext> =
            ConsumerConfigBuilder::for_partition_reader(&self.cluster, &self.kafka)
                .with_client_id(&format!("topic-relay-{topic}-{partition}"))
                .build()
                .create_with_context(KafkaContext::new(&self.cluster.name))
                .map_err(SourceError::ConsumerCreation)?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, partition, Offset::Offset(start_offset))
            .and_then(|_| consumer.assign(&assignment))
            .map_err(|source| SourceError::Kafka {
                operation: "assign",
                topic: topic.to_string(),
                partition,
                source,
            })?;

        debug!(topic, partition, start_offset, "Opened partition stream");

        Ok(Box::new(KafkaPartitionStream {
            consumer,
            topic: topic.to_string(),
            partition,
        }))
    }
}

pub struct KafkaPartitionStream {
    consumer: StreamConsumer<KafkaContext>,
    topic: String,
    partition: i32,
}

#[async_trait]
impl PartitionStream for KafkaPartitionStream {
    async fn next_record(&mut self) -> Option<Result<ConsumedRecord, SourceError>> {
        match self.consumer.recv().await {
            Ok(message) => Some(Ok(to_record(&message))),
            // Everything the broker had when we got here has been read
            Err(KafkaError::PartitionEOF(_)) => None,
            Err(source) => Some(Err(SourceError::Kafka {
                operation: "consume",
                topic: self.topic.clone(),
                partition: self.partition,
                source,
            })),
        }
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> ConsumedRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| (header.key.to_string(), header.value.map(<[u8]>::to_vec)))
                .collect()
        })
        .unwrap_or_default();

    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message.timestamp().to_millis(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
        headers,
    }
}
