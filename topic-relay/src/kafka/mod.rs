//! rdkafka-backed implementations of the source, offset store and publisher.

pub mod offsets;
pub mod publisher;
pub mod source;

pub use offsets::KafkaOffsetStore;
pub use publisher::KafkaPublisher;
pub use source::KafkaTopicSource;
