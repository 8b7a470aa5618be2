use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use vaa_event::{extjson, Event};

use crate::error::{Result, WatchError};
use crate::watcher::filter::{Namespace, OperationType};

/// Debezium record, with or without the schema wrapper
/// (`value.converter.schemas.enable`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    WithSchema { payload: T },
    WithoutSchema(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::WithSchema { payload } => payload,
            Envelope::WithoutSchema(payload) => payload,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MongoPayload {
    /// c/u/d/r
    op: String,
    /// Post-image as extended JSON, either a string or an inline object
    #[serde(default)]
    after: Option<Value>,
    source: MongoSource,
}

#[derive(Debug, Deserialize)]
struct MongoSource {
    db: String,
    collection: String,
    #[serde(default)]
    ts_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MongoKey {
    id: Value,
}

/// One change record from the source database, reduced to what the watcher needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub operation: OperationType,
    pub namespace: Namespace,
    pub document_key: String,
    pub full_document: Option<Value>,
    pub cluster_time: Option<DateTime<Utc>>,
}

impl ChangeNotification {
    /// Decode a Debezium MongoDB change record. Tombstones (no value) yield `None`.
    pub fn decode(key: Option<&[u8]>, value: Option<&[u8]>) -> Result<Option<Self>> {
        let value = match value {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Ok(None),
        };

        let payload = serde_json::from_slice::<Envelope<MongoPayload>>(value)
            .map_err(|e| WatchError::Notification(format!("unrecognised change record: {}", e)))?
            .into_inner();

        let operation = OperationType::from_code(&payload.op).ok_or_else(|| {
            WatchError::Notification(format!("unknown operation code '{}'", payload.op))
        })?;

        let full_document = match payload.after {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(serde_json::from_str(&text)?),
            Some(document @ Value::Object(_)) => Some(document),
            Some(other) => {
                return Err(WatchError::Notification(format!(
                    "post-image must be a document, got {}",
                    other
                )))
            }
        };

        let document_key = match key.filter(|bytes| !bytes.is_empty()) {
            Some(bytes) => {
                let key = serde_json::from_slice::<Envelope<MongoKey>>(bytes)
                    .map_err(|e| WatchError::Notification(format!("unrecognised key: {}", e)))?
                    .into_inner();
                key_text(key.id)
            }
            None => full_document
                .as_ref()
                .and_then(|doc| doc.get("_id"))
                .cloned()
                .map(key_text)
                .ok_or_else(|| WatchError::Notification("change record has no document key".to_string()))?,
        };

        let cluster_time = payload
            .source
            .ts_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Ok(Some(Self {
            operation,
            namespace: Namespace::new(payload.source.db, payload.source.collection),
            document_key,
            full_document,
            cluster_time,
        }))
    }

    /// Decode the post-image; its `_id` must equal the document key.
    pub fn into_event(self) -> Result<Event> {
        let document = self.full_document.ok_or_else(|| WatchError::MissingDocument {
            key: self.document_key.clone(),
        })?;

        let event = Event::from_document(document)?;
        if event.id != self.document_key {
            return Err(WatchError::KeyMismatch {
                key: self.document_key,
                id: event.id,
            });
        }

        Ok(event)
    }
}

/// Plain-text form of a document key. Debezium encodes the key as the JSON text of
/// `_id`, so string ids arrive quoted and ObjectIds as `{"$oid": ...}`.
fn key_text(value: Value) -> String {
    match value {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::String(inner)) => inner,
            Ok(parsed @ Value::Object(_)) => key_text(parsed),
            _ => text,
        },
        Value::Object(_) => match extjson::normalize(value.clone()) {
            Ok(Value::String(text)) => text,
            Ok(other) => other.to_string(),
            Err(_) => value.to_string(),
        },
        other => other.to_string(),
    }
}
