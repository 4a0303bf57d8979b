//! Typed message representations on either side of the filter.
//!
//! A [`ConsumedRecord`] is what the source hands us: raw bytes straight off the
//! partition. It is decoded exactly once into an [`Envelope`] (parsing the
//! value as JSON unless raw mode is on), which is what the filter and the
//! printer look at. Whatever gets published is an [`OutgoingMessage`].

use std::collections::HashMap;

use thiserror::Error;

use crate::source::ConsumedRecord;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("message at offset {offset} of partition {partition} is not valid JSON: {source}")]
    InvalidJson {
        partition: i32,
        offset: i64,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Raw(Vec<u8>),
    /// Parsed value alongside the bytes it was parsed from
    Json {
        value: serde_json::Value,
        bytes: Vec<u8>,
    },
}

impl Payload {
    pub fn decode(bytes: &[u8], raw: bool) -> Result<Self, serde_json::Error> {
        if raw {
            return Ok(Payload::Raw(bytes.to_vec()));
        }
        let value = serde_json::from_slice(bytes)?;
        Ok(Payload::Json {
            value,
            bytes: bytes.to_vec(),
        })
    }

    /// The bytes as consumed. Parsing never feeds back into the wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Raw(bytes) | Payload::Json { bytes, .. } => bytes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Milliseconds since the epoch, when the broker reports one
    pub timestamp: Option<i64>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// `None` for tombstones
    pub value: Option<Payload>,
    pub headers: HashMap<String, String>,
}

impl Envelope {
    pub fn decode(record: ConsumedRecord, raw: bool) -> Result<Self, EnvelopeError> {
        let value = match record.payload {
            Some(bytes) => Some(Payload::decode(&bytes, raw).map_err(|source| {
                EnvelopeError::InvalidJson {
                    partition: record.partition,
                    offset: record.offset,
                    source,
                }
            })?),
            None => None,
        };

        let headers = record
            .headers
            .into_iter()
            .map(|(key, value)| {
                let value = value
                    .map(|v| String::from_utf8_lossy(&v).into_owned())
                    .unwrap_or_default();
                (key, value)
            })
            .collect();

        Ok(Envelope {
            timestamp: record.timestamp,
            topic: record.topic,
            partition: record.partition,
            offset: record.offset,
            key: record.key,
            value,
            headers,
        })
    }

    /// The message as it would be republished without any rewriting.
    pub fn to_outgoing(&self) -> OutgoingMessage {
        OutgoingMessage {
            topic: self.topic.clone(),
            key: self.key.clone(),
            value: self.value.as_ref().map(Payload::to_bytes),
            headers: self.headers.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: HashMap<String, String>,
}

impl OutgoingMessage {
    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::record;

    #[test]
    fn test_decode_parses_json_unless_raw() {
        let decoded = Envelope::decode(record(0, 3, r#"{"a":1}"#), false).unwrap();
        assert_eq!(
            decoded.value,
            Some(Payload::Json {
                value: serde_json::json!({"a": 1}),
                bytes: br#"{"a":1}"#.to_vec(),
            })
        );

        let decoded = Envelope::decode(record(0, 3, "not json"), true).unwrap();
        assert_eq!(decoded.value, Some(Payload::Raw(b"not json".to_vec())));
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = Envelope::decode(record(2, 7, "{oops"), false).unwrap_err();
        let EnvelopeError::InvalidJson {
            partition, offset, ..
        } = err;
        assert_eq!((partition, offset), (2, 7));
    }

    #[test]
    fn test_decode_headers_and_tombstones() {
        let mut rec = record(0, 1, "");
        rec.payload = None;
        rec.headers = vec![
            ("trace".to_string(), Some(b"abc".to_vec())),
            ("empty".to_string(), None),
        ];

        let decoded = Envelope::decode(rec, false).unwrap();
        assert_eq!(decoded.value, None);
        assert_eq!(decoded.headers.get("trace").map(String::as_str), Some("abc"));
        assert_eq!(decoded.headers.get("empty").map(String::as_str), Some(""));
    }

    #[test]
    fn test_pass_through_keeps_consumed_bytes() {
        let payload = r#"{ "id" : 12345678901234567890123, "price": 0.1000000000000000055511151231257827 }"#;
        let decoded = Envelope::decode(record(0, 0, payload), false).unwrap();
        let outgoing = decoded.to_outgoing();
        assert_eq!(outgoing.value.as_deref(), Some(payload.as_bytes()));
        assert_eq!(outgoing.topic, "events");
    }
}
