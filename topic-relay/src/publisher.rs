use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::envelope::OutgoingMessage;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to create producer: {0}")]
    Setup(#[source] KafkaError),
    #[error("failed to publish to '{topic}': {source}")]
    Delivery {
        topic: String,
        #[source]
        source: KafkaError,
    },
    #[error("failed to flush producer: {0}")]
    Flush(#[source] KafkaError),
}

/// Destination for messages a filter accepted. Shared by all workers.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send one message and wait for the broker to acknowledge it.
    async fn publish(&self, message: OutgoingMessage) -> Result<(), PublishError>;

    /// Wait for anything still in flight.
    async fn flush(&self) -> Result<(), PublishError>;
}
