//! In-memory stand-ins for the Kafka-backed collaborators.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};

use crate::envelope::OutgoingMessage;
use crate::offsets::{OffsetError, OffsetStore};
use crate::publisher::{PublishError, Publisher};
use crate::source::{ConsumedRecord, PartitionStream, SourceError, TopicSource};
use crate::types::Partition;

pub fn record(partition: i32, offset: i64, payload: &str) -> ConsumedRecord {
    ConsumedRecord {
        topic: "events".to_string(),
        partition,
        offset,
        timestamp: Some(1_700_000_000_000 + offset),
        key: None,
        payload: Some(payload.as_bytes().to_vec()),
        headers: Vec::new(),
    }
}

pub fn transient_error(partition: i32) -> SourceError {
    SourceError::Kafka {
        operation: "consume",
        topic: "events".to_string(),
        partition,
        source: KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure),
    }
}

pub struct InMemoryStream {
    items: VecDeque<Result<ConsumedRecord, SourceError>>,
    hold_open: bool,
}

impl InMemoryStream {
    pub fn new(items: Vec<Result<ConsumedRecord, SourceError>>) -> Self {
        Self {
            items: items.into(),
            hold_open: false,
        }
    }

    /// Block forever once drained instead of reporting the stream closed.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait]
impl PartitionStream for InMemoryStream {
    async fn next_record(&mut self) -> Option<Result<ConsumedRecord, SourceError>> {
        match self.items.pop_front() {
            Some(item) => Some(item),
            None if self.hold_open => std::future::pending().await,
            None => None,
        }
    }
}

struct InMemoryPartition {
    low: i64,
    high: i64,
    payloads: Vec<String>,
}

/// A topic whose partitions hold JSON payloads at consecutive offsets.
#[derive(Default)]
pub struct InMemorySource {
    topic: String,
    partitions: BTreeMap<i32, InMemoryPartition>,
    hold_open: bool,
    opened: Mutex<Vec<(i32, i64)>>,
}

impl InMemorySource {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            ..Default::default()
        }
    }

    /// Add a partition whose first retained offset is `low`.
    pub fn with_partition(mut self, partition: i32, low: i64, payloads: &[&str]) -> Self {
        self.partitions.insert(
            partition,
            InMemoryPartition {
                low,
                high: low + payloads.len() as i64,
                payloads: payloads.iter().map(|p| p.to_string()).collect(),
            },
        );
        self
    }

    /// Pretend the broker has more than was added, so reading never reaches
    /// the boundary.
    pub fn with_high_watermark(mut self, partition: i32, high: i64) -> Self {
        if let Some(data) = self.partitions.get_mut(&partition) {
            data.high = high;
        }
        self
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// `(partition, start offset)` for every stream handed out.
    pub fn opened(&self) -> Vec<(i32, i64)> {
        self.opened.lock().unwrap().clone()
    }
}

impl TopicSource for InMemorySource {
    fn partitions(&self, topic: &str) -> Result<Vec<i32>, SourceError> {
        if topic != self.topic || self.partitions.is_empty() {
            return Err(SourceError::UnknownTopic(topic.to_string()));
        }
        Ok(self.partitions.keys().copied().collect())
    }

    fn watermarks(&self, topic: &str, partition: i32) -> Result<(i64, i64), SourceError> {
        self.partitions
            .get(&partition)
            .map(|p| (p.low, p.high))
            .ok_or_else(|| SourceError::Kafka {
                operation: "fetch_watermarks",
                topic: topic.to_string(),
                partition,
                source: KafkaError::MetadataFetch(RDKafkaErrorCode::UnknownPartition),
            })
    }

    fn open_partition(
        &self,
        topic: &str,
        partition: i32,
        start_offset: i64,
    ) -> Result<Box<dyn PartitionStream>, SourceError> {
        let Some(data) = self.partitions.get(&partition) else {
            return Err(SourceError::UnknownTopic(topic.to_string()));
        };
        self.opened.lock().unwrap().push((partition, start_offset));

        let records = data
            .payloads
            .iter()
            .enumerate()
            .map(|(i, payload)| record(partition, data.low + i as i64, payload))
            .filter(|r| r.offset >= start_offset)
            .map(Ok)
            .collect();

        let stream = InMemoryStream::new(records);
        Ok(Box::new(if self.hold_open {
            stream.hold_open()
        } else {
            stream
        }))
    }
}

pub struct InMemoryOffsetStore {
    group: String,
    committed: Mutex<HashMap<i32, i64>>,
    commits: Mutex<Vec<(i32, i64)>>,
    released: Mutex<Vec<i32>>,
    flushes: AtomicUsize,
}

impl InMemoryOffsetStore {
    pub fn new(group: &str) -> Self {
        Self {
            group: group.to_string(),
            committed: Mutex::new(HashMap::new()),
            commits: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
        }
    }

    pub fn set_committed(&self, partition: i32, offset: i64) {
        self.committed.lock().unwrap().insert(partition, offset);
    }

    pub fn commits(&self) -> Vec<(i32, i64)> {
        self.commits.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<i32> {
        let mut released = self.released.lock().unwrap().clone();
        released.sort_unstable();
        released
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl OffsetStore for InMemoryOffsetStore {
    fn group(&self) -> &str {
        &self.group
    }

    fn committed(&self, partition: &Partition) -> Result<Option<i64>, OffsetError> {
        Ok(self
            .committed
            .lock()
            .unwrap()
            .get(&partition.partition_number())
            .copied())
    }

    fn commit(&self, partition: &Partition, next_offset: i64) {
        self.commits
            .lock()
            .unwrap()
            .push((partition.partition_number(), next_offset));
        self.set_committed(partition.partition_number(), next_offset);
    }

    fn release(&self, partition: &Partition) {
        self.released
            .lock()
            .unwrap()
            .push(partition.partition_number());
    }

    fn flush(&self) -> Result<(), OffsetError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<OutgoingMessage>>,
    fail: bool,
    flushes: AtomicUsize,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.topic).collect()
    }

    /// Integer field `name` of every published JSON value, in publish order.
    pub fn field_values(&self, name: &str) -> Vec<i64> {
        self.messages()
            .iter()
            .map(|m| {
                let value: serde_json::Value =
                    serde_json::from_slice(m.value.as_deref().unwrap()).unwrap();
                value[name].as_i64().unwrap()
            })
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, message: OutgoingMessage) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Delivery {
                topic: message.topic,
                source: KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut),
            });
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }

    async fn flush(&self) -> Result<(), PublishError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A `Write` sink whose contents can be inspected after being moved into a
/// printer.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
