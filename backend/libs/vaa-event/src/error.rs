//! Error types for the cross-chain event model

use thiserror::Error;

/// Result type for event model operations
pub type Result<T> = std::result::Result<T, EventError>;

#[derive(Error, Debug)]
pub enum EventError {
    /// Event ID does not follow `<chainID>/<emitterAddress>/<sequence>`
    #[error("Invalid event ID '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    /// Event ID disagrees with the record's own chain/emitter/sequence fields
    #[error("Event ID {id} does not match record fields: {field}")]
    IdMismatch { id: String, field: &'static str },

    /// Document could not be decoded into an event
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Decode(err.to_string())
    }
}
