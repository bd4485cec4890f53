//! Change feed events and validation of raw feed payloads.
//!
//! The backing store publishes row changes as JSON objects of the shape
//!
//! ```json
//! {"eventType": "INSERT", "new": {"id": "...", "title": "...", "url": "...", "created_at": "..."}, "old": {}}
//! {"eventType": "DELETE", "new": {}, "old": {"id": "..."}}
//! ```
//!
//! [`FeedEvent::from_payload`] turns one of those into a typed event or an
//! [`EventError`] describing what was wrong with it.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::bookmark::Bookmark;
use super::errors::EventError;

/// A single insert/delete notification for one user's bookmarks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A record was created. Carries the full record.
    Insert(Bookmark),
    /// A record was removed. Only the id is guaranteed.
    Delete { id: String },
}

impl FeedEvent {
    /// The id of the record this event refers to.
    pub fn id(&self) -> &str {
        match self {
            FeedEvent::Insert(bookmark) => &bookmark.id,
            FeedEvent::Delete { id } => id,
        }
    }

    /// Validates a raw feed payload.
    pub fn from_payload(payload: &Value) -> Result<Self, EventError> {
        let object = payload.as_object().ok_or(EventError::NotAnObject)?;
        let event_type = object
            .get("eventType")
            .and_then(Value::as_str)
            .ok_or_else(|| EventError::MissingField("eventType".to_string()))?;

        match event_type {
            "INSERT" => {
                let record = record_object(object, "new")?;
                let bookmark = Bookmark {
                    id: required_str(record, "new", "id")?,
                    title: required_str(record, "new", "title")?,
                    url: required_str(record, "new", "url")?,
                    created_at: required_timestamp(record, "new", "created_at")?,
                };
                Ok(FeedEvent::Insert(bookmark))
            }
            "DELETE" => {
                let record = record_object(object, "old")?;
                let id = required_str(record, "old", "id")?;
                Ok(FeedEvent::Delete { id })
            }
            other => Err(EventError::UnsupportedEventType(other.to_string())),
        }
    }

    /// Encodes the event in the same shape [`FeedEvent::from_payload`] accepts.
    pub fn to_payload(&self) -> Value {
        match self {
            FeedEvent::Insert(bookmark) => json!({
                "eventType": "INSERT",
                "new": {
                    "id": bookmark.id,
                    "title": bookmark.title,
                    "url": bookmark.url,
                    "created_at": bookmark.created_at.to_rfc3339(),
                },
                "old": {},
            }),
            FeedEvent::Delete { id } => json!({
                "eventType": "DELETE",
                "new": {},
                "old": { "id": id },
            }),
        }
    }
}

fn record_object<'a>(
    object: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a Map<String, Value>, EventError> {
    match object.get(key) {
        None | Some(Value::Null) => Err(EventError::MissingField(key.to_string())),
        Some(Value::Object(record)) => Ok(record),
        Some(_) => Err(EventError::InvalidField(format!("{} is not an object", key))),
    }
}

fn required_str(record: &Map<String, Value>, section: &str, field: &str) -> Result<String, EventError> {
    match record.get(field) {
        None | Some(Value::Null) => Err(EventError::MissingField(format!("{}.{}", section, field))),
        Some(Value::String(s)) if s.is_empty() => {
            Err(EventError::InvalidField(format!("{}.{} is empty", section, field)))
        }
        Some(Value::String(s)) => Ok(s.clone()),
        // Numeric primary keys are still valid ids.
        Some(Value::Number(n)) if field == "id" => Ok(n.to_string()),
        Some(_) => Err(EventError::InvalidField(format!("{}.{} is not a string", section, field))),
    }
}

fn required_timestamp(
    record: &Map<String, Value>,
    section: &str,
    field: &str,
) -> Result<DateTime<Utc>, EventError> {
    let raw = required_str(record, section, field)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| EventError::InvalidField(format!("{}.{}: {}", section, field, e)))
}
