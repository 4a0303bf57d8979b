use rdkafka::ClientConfig;

use crate::cluster::ClusterConfig;
use crate::config::KafkaConfig;

/// Consumer configuration builder for the two kinds of consumers a topic run
/// needs.
///
/// - `for_partition_reader`: assign-only consumer reading one partition from an
///   explicit offset. Never joins or commits to a group; `group.id` is still
///   required by rdkafka so a throwaway one is used.
/// - `for_group_offsets`: consumer carrying the real group id, used only to
///   read and commit that group's offsets. Auto commit and auto store are off,
///   commits are always explicit.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    pub fn for_partition_reader(cluster: &ClusterConfig, kafka: &KafkaConfig) -> Self {
        let mut config = cluster.client_config();

        config
            .set("group.id", format!("topic-relay-reader-{}", std::process::id()))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            // Lets a reader notice that it has drained everything the broker had
            .set("enable.partition.eof", "true")
            .set("socket.timeout.ms", kafka.kafka_socket_timeout_ms.to_string())
            .set(
                "max.partition.fetch.bytes",
                kafka.kafka_max_partition_fetch_bytes.to_string(),
            );

        Self { config }
    }

    pub fn for_group_offsets(cluster: &ClusterConfig, kafka: &KafkaConfig, group_id: &str) -> Self {
        let mut config = cluster.client_config();

        config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("socket.timeout.ms", kafka.kafka_socket_timeout_ms.to_string());

        Self { config }
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.config.set("client.id", client_id);
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterConfig {
        ClusterConfig {
            name: "local".to_string(),
            brokers: vec!["localhost:9092".to_string()],
            tls: None,
            sasl: None,
        }
    }

    #[test]
    fn test_partition_reader_never_commits() {
        let config = ConsumerConfigBuilder::for_partition_reader(&cluster(), &KafkaConfig::default())
            .build();

        assert_eq!(config.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("enable.partition.eof"), Some("true"));
        assert!(config
            .get("group.id")
            .unwrap()
            .starts_with("topic-relay-reader-"));
    }

    #[test]
    fn test_group_offsets_uses_group_id() {
        let config =
            ConsumerConfigBuilder::for_group_offsets(&cluster(), &KafkaConfig::default(), "relay")
                .with_client_id("relay-offsets")
                .build();

        assert_eq!(config.get("group.id"), Some("relay"));
        assert_eq!(config.get("client.id"), Some("relay-offsets"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
    }
}
