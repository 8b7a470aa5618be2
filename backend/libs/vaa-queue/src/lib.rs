//! Durable queue consumer for VAA events
//!
//! Polls an external queue with visibility-timeout semantics (Amazon SQS), decodes
//! each message into a [`vaa_event::Event`] and hands it to the caller together with
//! an explicit acknowledgment contract:
//!
//! - [`ConsumerMessage::done`] deletes the message from the queue.
//! - [`ConsumerMessage::failed`] leaves it for redelivery once its visibility expires.
//!
//! The next batch is fetched only after every message of the current batch has been
//! acknowledged (or dropped), so a slow consumer never holds more than one batch.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vaa_queue::{
//!     ConsumerMessage, EventQueue, EventQueueConfig, PipelineEventConverter,
//!     PrometheusQueueMetrics, SqsConfig, SqsQueueClient,
//! };
//!
//! let client = SqsQueueClient::from_env(SqsConfig::new(queue_url)).await;
//! let queue = EventQueue::new(
//!     Arc::new(client),
//!     Arc::new(PipelineEventConverter),
//!     Arc::new(PrometheusQueueMetrics::new("tx-tracker")),
//!     EventQueueConfig::default(),
//! );
//!
//! let mut messages = queue.consume(shutdown_rx);
//! while let Some(message) = messages.recv().await {
//!     match process(message.data()).await {
//!         Ok(()) => message.done().await,
//!         Err(_) => message.failed().await,
//!     }
//! }
//! ```

mod barrier;
pub mod client;
pub mod consumer;
pub mod converter;
pub mod envelope;
pub mod error;
pub mod message;
pub mod metrics;
pub mod sqs;

pub use client::{QueueClient, RawMessage};
pub use consumer::{EventQueue, EventQueueConfig, DEFAULT_CHANNEL_SIZE};
pub use converter::{Converter, NotificationConverter, PipelineEventConverter, DEFAULT_SOURCE};
pub use envelope::SqsEnvelope;
pub use error::{ConvertError, QueueError, QueueResult};
pub use message::{ConsumerMessage, QueueMessage};
pub use metrics::{NoopQueueMetrics, PrometheusQueueMetrics, QueueMetrics};
pub use sqs::{SqsConfig, SqsQueueClient};
