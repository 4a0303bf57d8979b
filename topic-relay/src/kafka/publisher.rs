use std::time::Duration;

use async_trait::async_trait;
use common_kafka::kafka_producer::{create_kafka_producer, KafkaContext};
use common_kafka::{ClusterConfig, KafkaConfig};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::error;

use crate::envelope::OutgoingMessage;
use crate::publisher::{PublishError, Publisher};

/// Publishes to the destination cluster, waiting for every acknowledgement.
/// The destination partition is left to the producer's partitioner.
pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    flush_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(cluster: &ClusterConfig, kafka: &KafkaConfig) -> Result<Self, PublishError> {
        let producer = create_kafka_producer(cluster, kafka).map_err(PublishError::Setup)?;
        Ok(Self {
            producer,
            flush_timeout: kafka.flush_timeout(),
        })
    }
}

fn to_headers(message: &OutgoingMessage) -> Option<OwnedHeaders> {
    if message.headers.is_empty() {
        return None;
    }
    let headers = OwnedHeaders::new_with_capacity(message.headers.len());
    Some(message.headers.iter().fold(headers, |headers, (key, value)| {
        headers.insert(Header {
            key: key.as_str(),
            value: Some(value.as_bytes()),
        })
    }))
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, message: OutgoingMessage) -> Result<(), PublishError> {
        let record = FutureRecord {
            topic: &message.topic,
            partition: None,
            payload: message.value.as_deref(),
            key: message.key.as_deref(),
            timestamp: None,
            headers: to_headers(&message),
        };

        let delivery = match self.producer.send_result::<[u8], [u8]>(record) {
            Ok(delivery) => delivery,
            Err((source, _)) => {
                return Err(PublishError::Delivery {
                    topic: message.topic.clone(),
                    source,
                })
            }
        };

        match delivery.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((source, _))) => {
                error!(topic = %message.topic, error = %source, "Failed to publish message");
                Err(PublishError::Delivery {
                    topic: message.topic,
                    source,
                })
            }
            // The producer dropped the delivery before it was acknowledged
            Err(_) => Err(PublishError::Delivery {
                topic: message.topic,
                source: KafkaError::Canceled,
            }),
        }
    }

    async fn flush(&self) -> Result<(), PublishError> {
        self.producer
            .flush(self.flush_timeout)
            .map_err(PublishError::Flush)
    }
}
