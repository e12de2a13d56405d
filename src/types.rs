//! Wire and domain types shared by the API client and the controller.
//!
//! DESIGN
//! ======
//! List endpoints return arrays whose elements arrive either as JSON objects
//! or as JSON-encoded strings (the backend stores published payloads as raw
//! text). [`WireRecord`] captures both shapes explicitly and
//! [`WireRecord::into_record`] normalizes them, so the rest of the crate
//! only ever sees JSON objects.
//!
//! Elements that do not normalize to an object are dropped by the decoders
//! here; nothing is surfaced per element.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Display name for messages published without a user.
pub const ANONYMOUS: &str = "Anonymous";

// =============================================================================
// WIRE RECORD
// =============================================================================

/// One element of a list response, before normalization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireRecord {
    /// Embedded JSON text that still needs parsing.
    RawText(String),
    /// An element the transport already decoded.
    Parsed(Value),
}

impl WireRecord {
    /// Normalize to a JSON object, or `None` when the element is not a record.
    #[must_use]
    pub fn into_record(self) -> Option<Map<String, Value>> {
        let value = match self {
            Self::RawText(text) => serde_json::from_str::<Value>(&text).ok()?,
            Self::Parsed(value) => value,
        };
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Whether this element normalizes to a structured record.
    #[must_use]
    pub fn is_valid_record(&self) -> bool {
        match self {
            Self::RawText(text) => serde_json::from_str::<Value>(text).is_ok_and(|v| v.is_object()),
            Self::Parsed(value) => value.is_object(),
        }
    }
}

impl From<Value> for WireRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Self::RawText(text),
            other => Self::Parsed(other),
        }
    }
}

// =============================================================================
// USERS
// =============================================================================

/// A user record as stored by the backend and persisted locally as the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl User {
    /// Build a user from any normalized record. Fields of the wrong type
    /// read as empty; a numeric `user_id` is kept in its decimal form.
    #[must_use]
    pub fn from_record(record: &Map<String, Value>) -> Self {
        Self {
            user_id: record.get("user_id").and_then(scalar_text).unwrap_or_default(),
            name: record.get("name").and_then(Value::as_str).unwrap_or_default().to_owned(),
            avatar: record.get("avatar").and_then(Value::as_str).map(ToOwned::to_owned),
        }
    }

    /// Interpret a lookup response. Anything other than an object carrying
    /// a `user_id` is "no such user".
    #[must_use]
    pub fn from_lookup(value: Value) -> Option<Self> {
        let map = WireRecord::from(value).into_record()?;
        map.get("user_id").and_then(scalar_text)?;
        Some(Self::from_record(&map))
    }
}

/// Author reference embedded in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAuthor {
    pub user_id: Option<String>,
    pub name: Option<String>,
}

impl MessageAuthor {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        Some(Self {
            user_id: map.get("user_id").or_else(|| map.get("id")).and_then(scalar_text),
            name: map.get("name").and_then(Value::as_str).map(ToOwned::to_owned),
        })
    }
}

/// String form of a string or number; `None` for anything else.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// A feed entry, with the display name and timestamp already derived.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<Value>,
    pub text: String,
    /// Publication time; `None` when the backend sent no usable timestamp.
    pub created: Option<OffsetDateTime>,
    pub user: Option<MessageAuthor>,
    pub username: String,
}

impl Message {
    /// Build a message from a normalized record. Every record becomes a
    /// message: a non-string text reads as empty, a non-numeric `created`
    /// as no timestamp, and an author without a usable name as anonymous.
    #[must_use]
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let text = record
            .get("text")
            .or_else(|| record.get("message_data"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let user = record.get("user").and_then(MessageAuthor::from_value);
        let username = user
            .as_ref()
            .and_then(|user| user.name.clone())
            .unwrap_or_else(|| ANONYMOUS.to_owned());
        Self {
            id: record.get("id").filter(|id| !id.is_null()).cloned(),
            text,
            created: record.get("created").and_then(Value::as_f64).and_then(epoch_seconds_to_datetime),
            user,
            username,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn epoch_seconds_to_datetime(secs: f64) -> Option<OffsetDateTime> {
    if !secs.is_finite() {
        return None;
    }
    let nanos = (secs * 1_000_000_000.0).round() as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}

// =============================================================================
// DECODERS
// =============================================================================

/// Keep every element that normalizes to a message, in server order.
#[must_use]
pub fn decode_messages(items: Vec<WireRecord>) -> Vec<Message> {
    items
        .into_iter()
        .filter_map(WireRecord::into_record)
        .map(|record| Message::from_record(&record))
        .collect()
}

/// Keep every element that normalizes to a user record, in server order.
#[must_use]
pub fn decode_users(items: Vec<WireRecord>) -> Vec<User> {
    items
        .into_iter()
        .filter_map(WireRecord::into_record)
        .map(|record| User::from_record(&record))
        .collect()
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
