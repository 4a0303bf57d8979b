use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "10000")]
    pub kafka_operation_timeout_ms: u32, // Metadata, watermark and committed offset lookups

    #[envconfig(default = "10000")]
    pub kafka_socket_timeout_ms: u32,

    #[envconfig(default = "1048576")]
    pub kafka_max_partition_fetch_bytes: u32,

    #[envconfig(default = "30000")]
    pub kafka_flush_timeout_ms: u32, // Upper bound for producer flush and final offset commit on shutdown
}

impl KafkaConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_operation_timeout_ms as u64)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_flush_timeout_ms as u64)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            kafka_producer_linger_ms: 20,
            kafka_producer_queue_mib: 400,
            kafka_producer_queue_messages: 10_000_000,
            kafka_message_timeout_ms: 20_000,
            kafka_compression_codec: "none".to_string(),
            kafka_operation_timeout_ms: 10_000,
            kafka_socket_timeout_ms: 10_000,
            kafka_max_partition_fetch_bytes: 1_048_576,
            kafka_flush_timeout_ms: 30_000,
        }
    }
}
