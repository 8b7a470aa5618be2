//! Error types for the durable queue consumer

use thiserror::Error;
use vaa_event::EventError;

/// Result type for queue transport operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by the queue transport
#[derive(Error, Debug)]
pub enum QueueError {
    /// Fetch/delete/send against the external queue failed
    #[error("Queue transport error: {0}")]
    Transport(String),

    /// Receipt handle was rejected (already deleted or visibility expired)
    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    /// Transport envelope could not be parsed or produced
    #[error("Envelope error: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// Errors raised by a [`crate::Converter`]; the message is considered permanently unprocessable
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Invalid payload: {0}")]
    Payload(String),

    #[error("Invalid event: {0}")]
    Event(#[from] EventError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
