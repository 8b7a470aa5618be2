//! Amazon SQS transport
//!
//! Uses AWS credentials from the default provider chain (environment, profile,
//! instance profile or IRSA).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use aws_sdk_sqs::Client as SqsClient;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

use crate::client::{QueueClient, RawMessage};
use crate::error::{QueueError, QueueResult};

/// SQS caps a single receive at 10 messages.
const MAX_MESSAGES_PER_RECEIVE: i32 = 10;

#[derive(Debug, Clone)]
pub struct SqsConfig {
    pub queue_url: String,
    /// Messages per receive (1..=10)
    pub max_messages: i32,
    /// Long-poll wait time
    pub wait_time: Duration,
    pub visibility_timeout: Duration,
}

impl SqsConfig {
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            max_messages: MAX_MESSAGES_PER_RECEIVE,
            wait_time: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(60),
        }
    }
}

pub struct SqsQueueClient {
    client: SqsClient,
    config: SqsConfig,
}

impl SqsQueueClient {
    /// Create a client with the default AWS configuration
    pub async fn from_env(config: SqsConfig) -> Self {
        let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        info!(
            queue_url = %config.queue_url,
            visibility_timeout_secs = config.visibility_timeout.as_secs(),
            "Initialized SQS client"
        );
        Self::new(SqsClient::new(&aws_config), config)
    }

    pub fn new(client: SqsClient, config: SqsConfig) -> Self {
        Self { client, config }
    }

    /// Publish a raw body to the queue, returning the SQS message id.
    pub async fn send_message(&self, body: String) -> QueueResult<String> {
        let output = self
            .client
            .send_message()
            .queue_url(&self.config.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Transport(DisplayErrorContext(&e).to_string()))?;

        Ok(output.message_id.unwrap_or_default())
    }

    fn to_raw_message(message: aws_sdk_sqs::types::Message) -> Option<RawMessage> {
        let receipt_handle = message.receipt_handle?;
        let attributes = message.attributes.unwrap_or_default();

        let receive_count = attributes
            .get(&MessageSystemAttributeName::ApproximateReceiveCount)
            .and_then(|v| v.parse::<u32>().ok());
        let sent_timestamp = attributes
            .get(&MessageSystemAttributeName::SentTimestamp)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Some(RawMessage {
            receipt_handle,
            body: message.body.unwrap_or_default(),
            receive_count,
            sent_timestamp,
        })
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn receive_messages(&self) -> QueueResult<Vec<RawMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.config.queue_url)
            .max_number_of_messages(self.config.max_messages.clamp(1, MAX_MESSAGES_PER_RECEIVE))
            .wait_time_seconds(self.config.wait_time.as_secs() as i32)
            .visibility_timeout(self.config.visibility_timeout.as_secs() as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_system_attribute_names(MessageSystemAttributeName::SentTimestamp)
            .send()
            .await
            .map_err(|e| QueueError::Transport(DisplayErrorContext(&e).to_string()))?;

        let messages: Vec<RawMessage> = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(Self::to_raw_message)
            .collect();

        debug!(count = messages.len(), "Received SQS batch");
        Ok(messages)
    }

    async fn delete_message(&self, receipt_handle: &str) -> QueueResult<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| {
                let error_msg = DisplayErrorContext(&e).to_string();
                if error_msg.contains("ReceiptHandleIsInvalid") {
                    QueueError::InvalidReceipt(receipt_handle.to_string())
                } else {
                    QueueError::Transport(error_msg)
                }
            })?;

        Ok(())
    }

    fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }

    fn queue_url(&self) -> &str {
        &self.config.queue_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_sqs::types::Message;

    #[test]
    fn test_raw_message_extracts_system_attributes() {
        let message = Message::builder()
            .receipt_handle("handle-1")
            .body("{}")
            .attributes(MessageSystemAttributeName::ApproximateReceiveCount, "3")
            .attributes(MessageSystemAttributeName::SentTimestamp, "1682935200000")
            .build();

        let raw = SqsQueueClient::to_raw_message(message).unwrap();
        assert_eq!(raw.receipt_handle, "handle-1");
        assert_eq!(raw.receive_count, Some(3));
        assert_eq!(raw.sent_timestamp.unwrap().timestamp_millis(), 1682935200000);
    }

    #[test]
    fn test_raw_message_without_handle_is_skipped() {
        let message = Message::builder().body("{}").build();
        assert!(SqsQueueClient::to_raw_message(message).is_none());
    }

    #[test]
    fn test_default_config() {
        let config = SqsConfig::new("https://sqs.us-east-1.amazonaws.com/1/vaas");
        assert_eq!(config.max_messages, 10);
        assert_eq!(config.wait_time, Duration::from_secs(20));
        assert_eq!(config.visibility_timeout, Duration::from_secs(60));
    }
}
