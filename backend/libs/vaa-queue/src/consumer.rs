//! Polling consumer for the durable VAA queue
//!
//! One background poller per [`EventQueue::consume`] call:
//!
//! 1. Fetch a batch (long poll). Fetch errors back off exponentially.
//! 2. Stamp every message with `expires_at = now + visibility timeout`.
//! 3. Decode envelope and payload. Undecodable or skipped messages are deleted.
//! 4. Emit each decoded message on the channel.
//! 5. Wait until every emitted message of the batch is acknowledged, then fetch again.
//!
//! Cancellation (shutdown signal or [`EventQueue::close`]) stops the poller at the
//! next suspension point and closes the output channel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::barrier::BatchBarrier;
use crate::client::{QueueClient, RawMessage};
use crate::converter::Converter;
use crate::envelope::SqsEnvelope;
use crate::message::QueueMessage;
use crate::metrics::QueueMetrics;

/// Default capacity of the output channel
pub const DEFAULT_CHANNEL_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct EventQueueConfig {
    /// Output channel capacity
    pub channel_size: usize,
    /// Upper bound on waiting for a batch to be acknowledged. `None` waits forever.
    pub batch_timeout: Option<Duration>,
    /// First delay after a fetch error
    pub min_backoff: Duration,
    /// Cap for the fetch error delay
    pub max_backoff: Duration,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self {
            channel_size: DEFAULT_CHANNEL_SIZE,
            batch_timeout: None,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Consumer of VAA events from a durable queue with at-least-once delivery.
pub struct EventQueue {
    client: Arc<dyn QueueClient>,
    converter: Arc<dyn Converter>,
    metrics: Arc<dyn QueueMetrics>,
    config: EventQueueConfig,
    close_tx: watch::Sender<bool>,
}

impl EventQueue {
    pub fn new(
        client: Arc<dyn QueueClient>,
        converter: Arc<dyn Converter>,
        metrics: Arc<dyn QueueMetrics>,
        config: EventQueueConfig,
    ) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            client,
            converter,
            metrics,
            config,
            close_tx,
        }
    }

    pub fn with_channel_size(mut self, channel_size: usize) -> Self {
        self.config.channel_size = channel_size;
        self
    }

    pub fn config(&self) -> &EventQueueConfig {
        &self.config
    }

    /// Start polling in the background and return the stream of decoded messages.
    ///
    /// The stream ends when `shutdown` flips to `true` (or its sender is dropped),
    /// when [`close`](Self::close) is called, or when the receiver is dropped.
    pub fn consume(&self, shutdown: watch::Receiver<bool>) -> mpsc::Receiver<QueueMessage> {
        let (tx, rx) = mpsc::channel(self.config.channel_size.max(1));

        let poller = Poller {
            client: Arc::clone(&self.client),
            converter: Arc::clone(&self.converter),
            metrics: Arc::clone(&self.metrics),
            config: self.config.clone(),
            tx,
            stop: StopSignals {
                shutdown,
                closed: self.close_tx.subscribe(),
                closed_open: true,
            },
        };

        info!(
            queue_url = %self.client.queue_url(),
            channel_size = self.config.channel_size,
            "Starting queue consumer"
        );
        tokio::spawn(poller.run());

        rx
    }

    /// Stop every poller started by this queue. Idempotent.
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }
}

/// Exponential delay between failed fetches: `min * 2^(n-1)` capped at `max`.
#[derive(Debug)]
struct FetchBackoff {
    min: Duration,
    max: Duration,
    consecutive_errors: u32,
}

impl FetchBackoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            consecutive_errors: 0,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    fn record_error(&mut self) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.delay()
    }

    fn delay(&self) -> Duration {
        if self.consecutive_errors == 0 {
            return self.min;
        }
        let factor = 2u32.saturating_pow(self.consecutive_errors - 1);
        self.min.saturating_mul(factor).min(self.max)
    }
}

/// Combined shutdown and close signals of one poller.
struct StopSignals {
    shutdown: watch::Receiver<bool>,
    closed: watch::Receiver<bool>,
    closed_open: bool,
}

impl StopSignals {
    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow() || *self.closed.borrow()
    }

    /// Resolves once either signal is raised. A dropped shutdown sender counts as raised;
    /// a dropped queue handle does not.
    async fn stopped(&mut self) {
        loop {
            if self.is_stopped() {
                return;
            }
            if self.closed_open {
                tokio::select! {
                    changed = self.shutdown.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    changed = self.closed.changed() => {
                        if changed.is_err() {
                            self.closed_open = false;
                        }
                    }
                }
            } else if self.shutdown.changed().await.is_err() {
                return;
            }
        }
    }
}

struct Poller {
    client: Arc<dyn QueueClient>,
    converter: Arc<dyn Converter>,
    metrics: Arc<dyn QueueMetrics>,
    config: EventQueueConfig,
    tx: mpsc::Sender<QueueMessage>,
    stop: StopSignals,
}

impl Poller {
    async fn run(mut self) {
        let mut backoff = FetchBackoff::new(self.config.min_backoff, self.config.max_backoff);
        let batch_timeout = self.config.batch_timeout;

        loop {
            let fetched = tokio::select! {
                _ = self.stop.stopped() => break,
                _ = self.tx.closed() => {
                    debug!("Queue message receiver dropped, stopping consumer");
                    break;
                }
                result = self.client.receive_messages() => result,
            };

            let messages = match fetched {
                Ok(messages) => {
                    backoff.record_success();
                    messages
                }
                Err(e) => {
                    let delay = backoff.record_error();
                    error!(
                        error = %e,
                        consecutive_errors = backoff.consecutive_errors,
                        retry_in_ms = delay.as_millis() as u64,
                        "Error receiving messages from queue"
                    );
                    tokio::select! {
                        _ = self.stop.stopped() => break,
                        _ = self.tx.closed() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            if messages.is_empty() {
                continue;
            }

            let visibility = chrono::Duration::from_std(self.client.visibility_timeout())
                .unwrap_or_else(|_| chrono::Duration::zero());
            let expires_at = Utc::now() + visibility;
            let barrier = BatchBarrier::new();

            debug!(count = messages.len(), %expires_at, "Received batch from queue");

            for raw in messages {
                let Some(message) = self.decode(raw, expires_at, &barrier).await else {
                    continue;
                };

                let sent = tokio::select! {
                    _ = self.stop.stopped() => None,
                    result = self.tx.send(message) => Some(result),
                };
                match sent {
                    Some(Ok(())) => {}
                    Some(Err(_)) => {
                        debug!("Queue message receiver dropped, stopping consumer");
                        return;
                    }
                    None => {
                        info!("Queue consumer stopped while emitting batch");
                        return;
                    }
                }
            }

            tokio::select! {
                _ = self.stop.stopped() => break,
                _ = wait_for_batch(&barrier, batch_timeout) => {}
            }
        }

        info!(queue_url = %self.client.queue_url(), "Queue consumer stopped");
    }

    /// Decode one raw message. Messages that can never be processed are deleted here.
    async fn decode(
        &self,
        raw: RawMessage,
        expires_at: DateTime<Utc>,
        barrier: &Arc<BatchBarrier>,
    ) -> Option<QueueMessage> {
        let envelope = match SqsEnvelope::parse(&raw.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Error decoding message envelope, deleting message");
                self.discard(&raw.receipt_handle).await;
                return None;
            }
        };

        let event = match self.converter.convert(&envelope.message) {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!(
                    message_id = envelope.message_id.as_deref().unwrap_or_default(),
                    "Skipping message not handled by this consumer"
                );
                self.discard(&raw.receipt_handle).await;
                return None;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    message_id = envelope.message_id.as_deref().unwrap_or_default(),
                    "Error converting message payload, deleting message"
                );
                self.discard(&raw.receipt_handle).await;
                return None;
            }
        };

        self.metrics
            .inc_consumed(event.chain_id, self.converter.source());

        Some(QueueMessage::new(
            event,
            raw.receipt_handle,
            expires_at,
            raw.sent_timestamp,
            retry_count(raw.receive_count),
            Arc::clone(&self.client),
            Arc::clone(&self.metrics),
            barrier.register(),
        ))
    }

    async fn discard(&self, receipt_handle: &str) {
        if let Err(e) = self.client.delete_message(receipt_handle).await {
            error!(error = %e, "Error deleting unprocessable message from queue");
        }
    }
}

async fn wait_for_batch(barrier: &BatchBarrier, limit: Option<Duration>) {
    match limit {
        Some(limit) => {
            if tokio::time::timeout(limit, barrier.wait()).await.is_err() {
                warn!(
                    outstanding = barrier.outstanding(),
                    timeout_ms = limit.as_millis() as u64,
                    "Batch acknowledgment timed out, fetching next batch"
                );
            }
        }
        None => barrier.wait().await,
    }
}

/// Previous deliveries derived from the queue's receive count (1 on first delivery).
pub(crate) fn retry_count(receive_count: Option<u32>) -> u8 {
    let previous = receive_count.unwrap_or(1).saturating_sub(1);
    u8::try_from(previous).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_count_from_receive_count() {
        assert_eq!(retry_count(None), 0);
        assert_eq!(retry_count(Some(0)), 0);
        assert_eq!(retry_count(Some(1)), 0);
        assert_eq!(retry_count(Some(4)), 3);
        assert_eq!(retry_count(Some(10_000)), u8::MAX);
    }

    #[test]
    fn test_fetch_backoff_doubles_and_caps() {
        let mut backoff = FetchBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(backoff.delay(), Duration::from_secs(1));

        let delays: Vec<u64> = (0..8).map(|_| backoff.record_error().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);

        backoff.record_success();
        assert_eq!(backoff.record_error(), Duration::from_secs(1));
    }

    #[test]
    fn test_fetch_backoff_survives_long_outage() {
        let mut backoff = FetchBackoff::new(Duration::from_millis(10), Duration::from_secs(5));
        for _ in 0..200 {
            backoff.record_error();
        }
        assert_eq!(backoff.delay(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stop_signals_shutdown_and_close() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let (close_tx, closed) = watch::channel(false);
        let mut stop = StopSignals {
            shutdown,
            closed,
            closed_open: true,
        };
        assert!(!stop.is_stopped());

        drop(close_tx);
        let pending = tokio::time::timeout(Duration::from_millis(30), stop.stopped()).await;
        assert!(pending.is_err(), "dropped close handle must not stop the poller");

        shutdown_tx.send_replace(true);
        tokio::time::timeout(Duration::from_millis(100), stop.stopped())
            .await
            .expect("shutdown should stop the poller");
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops() {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let (_close_tx, closed) = watch::channel(false);
        let mut stop = StopSignals {
            shutdown,
            closed,
            closed_open: true,
        };

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_millis(100), stop.stopped())
            .await
            .expect("dropped shutdown sender counts as shutdown");
    }
}
