//! Conversions between envelopes and the Lua `msg` table.

use std::collections::HashMap;

use mlua::{Lua, LuaSerdeExt, Table, Value};
use thiserror::Error;

use crate::envelope::{Envelope, OutgoingMessage, Payload};

/// A returned `msg` that cannot be published. Names the first field that is
/// wrong, what it should have been, and what the script left there.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("field '{field}' must be {expected}, found {found}")]
pub struct MessageDecodeError {
    pub field: String,
    pub expected: &'static str,
    pub found: String,
}

impl MessageDecodeError {
    fn new(field: impl Into<String>, expected: &'static str, found: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            expected,
            found: found.into(),
        }
    }
}

pub(super) fn envelope_to_table(lua: &Lua, envelope: &Envelope) -> mlua::Result<Table> {
    let msg = lua.create_table()?;
    msg.set("timestamp", envelope.timestamp)?;
    msg.set("topic", envelope.topic.as_str())?;
    msg.set("partition", envelope.partition)?;
    msg.set("offset", envelope.offset)?;

    let key = match &envelope.key {
        Some(key) => Value::String(lua.create_string(key)?),
        None => Value::Nil,
    };
    msg.set("key", key)?;

    let value = match &envelope.value {
        Some(Payload::Raw(bytes)) => Value::String(lua.create_string(bytes)?),
        Some(Payload::Json { value, .. }) => lua.to_value(value)?,
        None => Value::Nil,
    };
    msg.set("value", value)?;

    let headers = lua.create_table()?;
    for (name, value) in &envelope.headers {
        headers.set(name.as_str(), value.as_str())?;
    }
    msg.set("headers", headers)?;

    Ok(msg)
}

/// Turn the script's `msg` back into something the publisher can send.
pub(super) fn table_to_outgoing(
    lua: &Lua,
    msg: Value,
    raw: bool,
) -> Result<OutgoingMessage, MessageDecodeError> {
    let Value::Table(msg) = msg else {
        return Err(MessageDecodeError::new("msg", "a table", msg.type_name()));
    };

    let topic = match field(&msg, "topic")? {
        Value::String(topic) => topic
            .to_str()
            .map_err(|_| MessageDecodeError::new("topic", "a string", "non-UTF-8 bytes"))?
            .to_string(),
        other => return Err(MessageDecodeError::new("topic", "a string", other.type_name())),
    };

    let key = match field(&msg, "key")? {
        Value::Nil => None,
        Value::String(key) => Some(key.as_bytes().to_vec()),
        other => {
            return Err(MessageDecodeError::new(
                "key",
                "a string or nil",
                other.type_name(),
            ))
        }
    };

    let value = match (field(&msg, "value")?, raw) {
        (Value::Nil, _) => None,
        (Value::String(value), true) => Some(value.as_bytes().to_vec()),
        (other, true) => {
            return Err(MessageDecodeError::new(
                "value",
                "a string or nil",
                other.type_name(),
            ))
        }
        (other, false) => {
            let type_name = other.type_name();
            let json: serde_json::Value = lua.from_value(other).map_err(|e| {
                MessageDecodeError::new(
                    "value",
                    "a JSON-convertible value",
                    format!("{type_name} ({e})"),
                )
            })?;
            Some(json.to_string().into_bytes())
        }
    };

    let headers = match field(&msg, "headers")? {
        Value::Nil => HashMap::new(),
        Value::Table(table) => decode_headers(table)?,
        other => {
            return Err(MessageDecodeError::new(
                "headers",
                "a table or nil",
                other.type_name(),
            ))
        }
    };

    Ok(OutgoingMessage {
        topic,
        key,
        value,
        headers,
    })
}

fn field(msg: &Table, name: &str) -> Result<Value, MessageDecodeError> {
    msg.raw_get::<Value>(name)
        .map_err(|e| MessageDecodeError::new(name, "a readable field", e.to_string()))
}

fn decode_headers(table: Table) -> Result<HashMap<String, String>, MessageDecodeError> {
    let mut headers = HashMap::new();
    for pair in table.pairs::<Value, Value>() {
        let (name, value) =
            pair.map_err(|e| MessageDecodeError::new("headers", "a table", e.to_string()))?;

        let name = match name {
            Value::String(name) => name.to_string_lossy().to_string(),
            other => {
                return Err(MessageDecodeError::new(
                    "headers",
                    "a table with string keys",
                    other.type_name(),
                ))
            }
        };
        let value = match value {
            Value::String(value) => value.to_string_lossy().to_string(),
            other => {
                return Err(MessageDecodeError::new(
                    format!("headers.{name}"),
                    "a string",
                    other.type_name(),
                ))
            }
        };
        headers.insert(name, value);
    }
    Ok(headers)
}
