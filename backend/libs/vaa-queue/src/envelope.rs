use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Transport envelope carried in a queue message body.
///
/// Matches the SNS-to-SQS notification shape: the domain payload sits in `Message`,
/// usually as a JSON-encoded string. An inline JSON object is accepted as well and
/// re-serialised so converters always receive text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqsEnvelope {
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "MessageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(rename = "Message", deserialize_with = "message_text")]
    pub message: String,
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl SqsEnvelope {
    pub fn parse(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }

    /// Envelope for publishing a payload directly to the queue.
    pub fn wrap(payload: impl Into<String>) -> Self {
        Self {
            kind: Some("Notification".to_string()),
            message_id: None,
            message: payload.into(),
            timestamp: None,
        }
    }

    pub fn to_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn message_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Null => Err(serde::de::Error::custom("Message must not be null")),
        other => Ok(other.to_string()),
    }
}
