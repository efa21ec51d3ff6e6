use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur while encoding or decoding a message payload.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("empty payload")]
    EmptyPayload,

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Direction of a message relative to the simulated endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A field value.
///
/// Only [`Value::Simple`] takes part in field-equality matching; every other
/// kind is treated as a mismatch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Kind was never set.
    #[default]
    #[serde(rename = "unset")]
    Unset,

    #[serde(rename = "null_value")]
    Null,

    #[serde(rename = "simple_value")]
    Simple(String),

    #[serde(rename = "message_value")]
    Message(Message),

    #[serde(rename = "list_value")]
    List(Vec<Value>),
}

static NULL_VALUE: Value = Value::Null;

impl Value {
    /// The scalar content, if this is a simple value.
    pub fn as_simple(&self) -> Option<&str> {
        match self {
            Value::Simple(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub fn is_structured(&self) -> bool {
        matches!(self, Value::Message(_) | Value::List(_))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Simple(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Simple(s)
    }
}

impl From<Message> for Value {
    fn from(m: Message) -> Self {
        Value::Message(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::List(values)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

macro_rules! simple_from_display {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Simple(v.to_string())
                }
            }
        )*
    };
}

simple_from_display!(i32, i64, u32, u64, f64, bool, char);

/// Message header.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Declared type name, e.g. `NewOrderSingle`.
    pub message_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_alias: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Structured protocol message: a typed header plus named fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    pub metadata: MessageMetadata,

    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Message {
    /// Create an empty message of the given type.
    pub fn new(message_type: impl Into<String>) -> Self {
        Message {
            metadata: MessageMetadata {
                message_type: message_type.into(),
                ..Default::default()
            },
            fields: BTreeMap::new(),
        }
    }

    /// Declared type name.
    pub fn message_type(&self) -> &str {
        &self.metadata.message_type
    }

    pub fn set_message_type(&mut self, message_type: impl Into<String>) {
        self.metadata.message_type = message_type.into();
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Field value, with an absent field reported as [`Value::Null`].
    pub fn field_or_null(&self, key: &str) -> &Value {
        self.fields.get(key).unwrap_or(&NULL_VALUE)
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn add_fields<K, V>(&mut self, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in fields {
            self.add_field(key, value);
        }
    }

    /// Copy the named fields from `source`; fields it lacks are set to null.
    pub fn copy_fields(&mut self, source: &Message, keys: &[&str]) {
        for key in keys {
            let value = source.field_or_null(key).clone();
            self.fields.insert((*key).to_string(), value);
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_field(key, value);
        self
    }

    pub fn with_copied_fields(mut self, source: &Message, keys: &[&str]) -> Self {
        self.copy_fields(source, keys);
        self
    }

    pub fn with_session_alias(mut self, alias: impl Into<String>) -> Self {
        self.metadata.session_alias = Some(alias.into());
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.metadata.direction = Some(direction);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.metadata.timestamp = Some(timestamp);
        self
    }

    /// Encode to the wire payload.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a wire payload.
    pub fn decode(payload: &[u8]) -> Result<Message, CodecError> {
        if payload.is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        Ok(serde_json::from_slice(payload)?)
    }
}
