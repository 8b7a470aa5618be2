use thiserror::Error;
use vaa_event::EventError;
use vaa_queue::QueueError;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
    /// Static change filter could not be parsed. Fatal at startup.
    #[error("Invalid change filter: {0}")]
    InvalidFilter(String),

    /// Subscription could not be established
    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Kafka error: {0}")]
    Kafka(String),

    /// Change record envelope is not a recognised notification
    #[error("Invalid change notification: {0}")]
    Notification(String),

    #[error("Change notification for {key} has no post-image")]
    MissingDocument { key: String },

    #[error("Document key {key} does not match event id {id}")]
    KeyMismatch { key: String, id: String },

    #[error("Event decode error: {0}")]
    Event(#[from] EventError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<rdkafka::error::KafkaError> for WatchError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        WatchError::Kafka(e.to_string())
    }
}
