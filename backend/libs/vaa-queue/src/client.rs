use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::QueueResult;

/// One message as returned by the queue, before envelope parsing.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Opaque handle used to delete the message
    pub receipt_handle: String,
    pub body: String,
    /// Queue-reported approximate receive count (1 on first delivery)
    pub receive_count: Option<u32>,
    /// Time the queue accepted the message
    pub sent_timestamp: Option<DateTime<Utc>>,
}

/// Polling client for an external durable queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Fetch the next batch, blocking for the queue's own long-poll period.
    async fn receive_messages(&self) -> QueueResult<Vec<RawMessage>>;

    /// Delete by receipt handle. Unknown or expired handles return an error.
    async fn delete_message(&self, receipt_handle: &str) -> QueueResult<()>;

    /// Time a received message stays hidden from other consumers.
    fn visibility_timeout(&self) -> Duration;

    fn queue_url(&self) -> &str;
}
