use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};
use vaa_event::Event;

use crate::barrier::BarrierSlot;
use crate::client::QueueClient;
use crate::metrics::QueueMetrics;

/// Lifecycle contract of one dequeued message.
///
/// Exactly one of [`done`](ConsumerMessage::done) or [`failed`](ConsumerMessage::failed)
/// is called per message; both consume the message.
#[async_trait]
pub trait ConsumerMessage: Send {
    fn data(&self) -> &Event;

    /// Processing succeeded: remove the message from the queue.
    async fn done(self);

    /// Processing failed: leave the message for redelivery after its deadline.
    async fn failed(self);

    /// True once the visibility deadline has passed and a duplicate may be in flight.
    fn is_expired(&self) -> bool;

    /// Number of previous deliveries of this payload.
    fn retry(&self) -> u8;

    fn sent_timestamp(&self) -> Option<DateTime<Utc>>;
}

/// Message emitted by [`crate::EventQueue`].
///
/// Dropping it without acknowledgment releases its batch slot and leaves it in the
/// queue, the same as `failed` minus the metric.
pub struct QueueMessage {
    data: Event,
    receipt_handle: String,
    expires_at: DateTime<Utc>,
    sent_timestamp: Option<DateTime<Utc>>,
    retry: u8,
    client: Arc<dyn QueueClient>,
    metrics: Arc<dyn QueueMetrics>,
    slot: Option<BarrierSlot>,
    acknowledged: bool,
}

impl QueueMessage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        data: Event,
        receipt_handle: String,
        expires_at: DateTime<Utc>,
        sent_timestamp: Option<DateTime<Utc>>,
        retry: u8,
        client: Arc<dyn QueueClient>,
        metrics: Arc<dyn QueueMetrics>,
        slot: BarrierSlot,
    ) -> Self {
        Self {
            data,
            receipt_handle,
            expires_at,
            sent_timestamp,
            retry,
            client,
            metrics,
            slot: Some(slot),
            acknowledged: false,
        }
    }

    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn acknowledge(&mut self) {
        self.acknowledged = true;
        if let Some(slot) = self.slot.take() {
            slot.release();
        }
    }
}

#[async_trait]
impl ConsumerMessage for QueueMessage {
    fn data(&self) -> &Event {
        &self.data
    }

    async fn done(self) {
        let mut message = self;
        if let Err(e) = message.client.delete_message(&message.receipt_handle).await {
            error!(
                vaa_id = %message.data.id,
                is_expired = message.is_expired(),
                expired_at = %message.expires_at,
                error = %e,
                "Error deleting message from queue"
            );
        }
        message
            .metrics
            .inc_processed(message.data.chain_id, message.retry);
        message.acknowledge();
    }

    async fn failed(self) {
        let mut message = self;
        message
            .metrics
            .inc_failed(message.data.chain_id, message.retry);
        message.acknowledge();
    }

    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    fn retry(&self) -> u8 {
        self.retry
    }

    fn sent_timestamp(&self) -> Option<DateTime<Utc>> {
        self.sent_timestamp
    }
}

impl Drop for QueueMessage {
    fn drop(&mut self) {
        if !self.acknowledged {
            warn!(
                vaa_id = %self.data.id,
                expired_at = %self.expires_at,
                "Queue message dropped without acknowledgment, it will be redelivered"
            );
        }
    }
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMessage")
            .field("id", &self.data.id)
            .field("receipt_handle", &self.receipt_handle)
            .field("expires_at", &self.expires_at)
            .field("retry", &self.retry)
            .field("acknowledged", &self.acknowledged)
            .finish()
    }
}
