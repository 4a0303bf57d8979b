pub mod cluster;
pub mod config;
pub mod kafka_consumer;
pub mod kafka_producer;

pub use cluster::{ClusterConfig, ClusterError, ClusterFile, SaslConfig, SaslMechanism, TlsConfig};
pub use config::KafkaConfig;
