use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: String, partition_number: i32) -> Self {
        Self {
            topic,
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition_number)
    }
}

/// Consumption bounds of one partition, fixed when its worker is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetRange {
    /// First offset to read (inclusive)
    pub oldest: i64,
    /// Snapshot of the high watermark (exclusive)
    pub newest: i64,
}

impl OffsetRange {
    pub fn new(oldest: i64, newest: i64) -> Self {
        Self { oldest, newest }
    }

    pub fn is_empty(&self) -> bool {
        self.oldest >= self.newest
    }

    /// Whether `offset` is the last one this run may process.
    pub fn is_last(&self, offset: i64) -> bool {
        offset >= self.newest - 1
    }

    pub fn contains(&self, offset: i64) -> bool {
        offset < self.newest
    }
}
