use std::time::Duration;

use metrics::gauge;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use crate::cluster::ClusterConfig;
use crate::config::KafkaConfig;

pub struct KafkaContext {
    cluster: String,
}

impl KafkaContext {
    pub fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
        }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        gauge!("topic_relay_kafka_producer_queue_depth", "cluster" => self.cluster.clone())
            .set(stats.msg_cnt as f64);
        gauge!("topic_relay_kafka_producer_queue_bytes", "cluster" => self.cluster.clone())
            .set(stats.msg_size as f64);
        gauge!("topic_relay_kafka_callback_queue_depth", "cluster" => self.cluster.clone())
            .set(stats.replyq as f64);
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!(cluster = %self.cluster, error = %error, "librdkafka error: {}", reason);
    }
}

// Readers and the offset manager share the context for its error logging.
impl ConsumerContext for KafkaContext {}

pub fn producer_client_config(cluster: &ClusterConfig, config: &KafkaConfig) -> ClientConfig {
    let mut client_config = cluster.client_config();
    client_config
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        )
        .set(
            "queue.buffering.max.messages",
            config.kafka_producer_queue_messages.to_string(),
        );
    client_config
}

pub fn create_kafka_producer(
    cluster: &ClusterConfig,
    config: &KafkaConfig,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let client_config = producer_client_config(cluster, config);

    debug!(cluster = %cluster.name, "creating producer for {}", cluster.bootstrap_servers());
    let api: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext::new(&cluster.name))?;

    // "Ping" the Kafka brokers by requesting metadata
    match api
        .client()
        .fetch_metadata(None, Duration::from_millis(config.kafka_operation_timeout_ms as u64))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka cluster '{}'. Found {} topics.",
                cluster.name,
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}
