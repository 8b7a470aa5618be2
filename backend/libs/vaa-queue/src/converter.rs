//! Payload converters
//!
//! A converter turns the domain payload of one queue message into an [`Event`].
//! `Ok(None)` means the payload is valid but not meant for this consumer; both that
//! and an error cause the consumer to delete the message without retrying it.
//! Converters must be pure: the same payload always yields an equal event.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use vaa_event::Event;

use crate::error::ConvertError;

pub const DEFAULT_SOURCE: &str = "unknown";

pub trait Converter: Send + Sync {
    fn convert(&self, payload: &str) -> Result<Option<Event>, ConvertError>;

    /// Label recorded with the consumed metric
    fn source(&self) -> &str {
        DEFAULT_SOURCE
    }
}

impl<F> Converter for F
where
    F: Fn(&str) -> Result<Option<Event>, ConvertError> + Send + Sync,
{
    fn convert(&self, payload: &str) -> Result<Option<Event>, ConvertError> {
        self(payload)
    }
}

/// Payload is an [`Event`] serialised by the pipeline watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineEventConverter;

impl Converter for PipelineEventConverter {
    fn convert(&self, payload: &str) -> Result<Option<Event>, ConvertError> {
        Ok(Some(Event::from_json(payload)?))
    }

    fn source(&self) -> &str {
        "pipeline"
    }
}

const SIGNED_VAA_EVENT: &str = "signed-vaa";

/// Payload is a chain-event notification; only `signed-vaa` notifications are handled.
///
/// ```json
/// {
///   "trackId": "chain-event-1/0xabc/42",
///   "source": "blockchain-watcher",
///   "event": "signed-vaa",
///   "timestamp": "2023-05-01T10:00:00Z",
///   "data": {
///     "id": "1/0xabc/42",
///     "emitterChain": 1,
///     "emitterAddr": "0xabc",
///     "sequence": 42,
///     "guardianSetIndex": 3,
///     "vaa": "AQID",
///     "txHash": "0xfeed",
///     "timestamp": "2023-05-01T09:59:00Z"
///   }
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationConverter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    event: String,
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedVaa {
    id: String,
    emitter_chain: u16,
    emitter_addr: String,
    sequence: Value,
    #[serde(default)]
    guardian_set_index: u32,
    #[serde(default)]
    vaa: String,
    #[serde(default)]
    tx_hash: String,
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    version: Option<u16>,
}

impl Converter for NotificationConverter {
    fn convert(&self, payload: &str) -> Result<Option<Event>, ConvertError> {
        let notification: Notification = serde_json::from_str(payload)?;
        if notification.event != SIGNED_VAA_EVENT {
            return Ok(None);
        }

        let data: SignedVaa = serde_json::from_value(notification.data)?;
        let sequence = match data.sequence {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(ConvertError::Payload(format!(
                    "unsupported sequence value: {}",
                    other
                )))
            }
        };
        let vaa = STANDARD
            .decode(data.vaa.as_bytes())
            .map_err(|e| ConvertError::Payload(format!("invalid vaa encoding: {}", e)))?;
        let indexed_at = notification
            .timestamp
            .or(data.timestamp)
            .ok_or_else(|| ConvertError::Payload("notification has no timestamp".to_string()))?;

        let event = Event {
            id: data.id,
            chain_id: data.emitter_chain,
            emitter_address: data.emitter_addr,
            sequence,
            guardian_set_index: data.guardian_set_index,
            vaa,
            indexed_at,
            timestamp: data.timestamp,
            updated_at: None,
            tx_hash: data.tx_hash,
            version: data.version.unwrap_or(1),
            revision: 0,
        };
        event.validate()?;

        Ok(Some(event))
    }

    fn source(&self) -> &str {
        "chain-event"
    }
}
