use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};
use vaa_event::Event;
use vaa_queue::{SqsEnvelope, SqsQueueClient};

use crate::error::Result;
use crate::watcher::EventHandler;

/// Forwards watched events to the VAA queue, in the envelope the queue consumer expects.
pub struct SqsEventPublisher {
    client: Arc<SqsQueueClient>,
}

impl SqsEventPublisher {
    pub fn new(client: Arc<SqsQueueClient>) -> Self {
        Self { client }
    }

    async fn publish(&self, event: &Event) -> Result<String> {
        let body = message_body(event)?;
        Ok(self.client.send_message(body).await?)
    }
}

#[async_trait]
impl EventHandler for SqsEventPublisher {
    async fn handle(&self, event: Event) {
        match self.publish(&event).await {
            Ok(message_id) => {
                debug!(vaa_id = %event.id, %message_id, "Published event to queue");
            }
            Err(e) => {
                error!(
                    vaa_id = %event.id,
                    chain_id = event.chain_id,
                    error = %e,
                    "Failed to publish event to queue"
                );
            }
        }
    }
}

/// Queue body for one event.
pub fn message_body(event: &Event) -> Result<String> {
    let payload = serde_json::to_string(event)?;
    Ok(SqsEnvelope::wrap(payload).to_body()?)
}
