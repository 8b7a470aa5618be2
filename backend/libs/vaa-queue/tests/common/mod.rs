//! Shared fixtures for queue consumer tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vaa_event::Event;
use tracing_subscriber::fmt::MakeWriter;
use vaa_queue::{QueueClient, QueueError, QueueMetrics, QueueResult, RawMessage, SqsEnvelope};

struct StoredMessage {
    id: String,
    body: String,
    receive_count: u32,
    visible_at: Instant,
    sent_at: DateTime<Utc>,
}

impl StoredMessage {
    fn receipt_handle(&self) -> String {
        format!("{}-{}", self.id, self.receive_count)
    }
}

/// In-process queue with visibility-timeout semantics.
///
/// Each receive hands out a new receipt handle; handles from earlier deliveries are
/// rejected on delete, as SQS does once a message became visible again.
pub struct InMemoryQueue {
    messages: Mutex<Vec<StoredMessage>>,
    next_id: AtomicUsize,
    visibility_timeout: Duration,
    max_messages: usize,
    receive_calls: AtomicUsize,
    fail_next: AtomicUsize,
    empty_poll: Duration,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            visibility_timeout,
            max_messages: 10,
            receive_calls: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            empty_poll: Duration::from_millis(20),
        }
    }

    /// Enqueue a raw body and return its message id.
    pub fn push(&self, body: impl Into<String>) -> String {
        self.push_with_count(body, 0)
    }

    /// Enqueue a body that has already been received `receive_count` times.
    pub fn push_with_count(&self, body: impl Into<String>, receive_count: u32) -> String {
        let id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.messages.lock().unwrap().push(StoredMessage {
            id: id.clone(),
            body: body.into(),
            receive_count,
            visible_at: Instant::now(),
            sent_at: Utc::now(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.lock().unwrap().iter().any(|m| m.id == id)
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` receives fail with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn receive_messages(&self) -> QueueResult<Vec<RawMessage>> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::Transport("connection reset".to_string()));
        }

        let batch: Vec<RawMessage> = {
            let now = Instant::now();
            let mut messages = self.messages.lock().unwrap();
            messages
                .iter_mut()
                .filter(|m| m.visible_at <= now)
                .take(self.max_messages)
                .map(|m| {
                    m.receive_count += 1;
                    m.visible_at = now + self.visibility_timeout;
                    RawMessage {
                        receipt_handle: m.receipt_handle(),
                        body: m.body.clone(),
                        receive_count: Some(m.receive_count),
                        sent_timestamp: Some(m.sent_at),
                    }
                })
                .collect()
        };

        if batch.is_empty() {
            tokio::time::sleep(self.empty_poll).await;
        }
        Ok(batch)
    }

    async fn delete_message(&self, receipt_handle: &str) -> QueueResult<()> {
        let mut messages = self.messages.lock().unwrap();
        match messages
            .iter()
            .position(|m| m.receipt_handle() == receipt_handle)
        {
            Some(index) => {
                messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::InvalidReceipt(receipt_handle.to_string())),
        }
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    fn queue_url(&self) -> &str {
        "memory://vaa-queue-test"
    }
}

/// Metrics sink that records every increment for assertions.
#[derive(Default)]
pub struct RecordingMetrics {
    consumed: Mutex<HashMap<(u16, String), u64>>,
    processed: Mutex<HashMap<(u16, u8), u64>>,
    failed: Mutex<HashMap<(u16, u8), u64>>,
}

impl RecordingMetrics {
    pub fn consumed(&self, chain_id: u16, source: &str) -> u64 {
        *self
            .consumed
            .lock()
            .unwrap()
            .get(&(chain_id, source.to_string()))
            .unwrap_or(&0)
    }

    pub fn total_consumed(&self) -> u64 {
        self.consumed.lock().unwrap().values().sum()
    }

    pub fn processed(&self, chain_id: u16, retry: u8) -> u64 {
        *self.processed.lock().unwrap().get(&(chain_id, retry)).unwrap_or(&0)
    }

    pub fn total_processed(&self) -> u64 {
        self.processed.lock().unwrap().values().sum()
    }

    pub fn failed(&self, chain_id: u16, retry: u8) -> u64 {
        *self.failed.lock().unwrap().get(&(chain_id, retry)).unwrap_or(&0)
    }

    pub fn total_failed(&self) -> u64 {
        self.failed.lock().unwrap().values().sum()
    }
}

impl QueueMetrics for RecordingMetrics {
    fn inc_consumed(&self, chain_id: u16, source: &str) {
        *self
            .consumed
            .lock()
            .unwrap()
            .entry((chain_id, source.to_string()))
            .or_default() += 1;
    }

    fn inc_processed(&self, chain_id: u16, retry: u8) {
        *self
            .processed
            .lock()
            .unwrap()
            .entry((chain_id, retry))
            .or_default() += 1;
    }

    fn inc_failed(&self, chain_id: u16, retry: u8) {
        *self.failed.lock().unwrap().entry((chain_id, retry)).or_default() += 1;
    }
}

pub fn event(chain_id: u16, emitter: &str, sequence: u64) -> Event {
    Event::new(chain_id, emitter, sequence, Utc::now())
}

/// Queue body carrying a serialised event inside the transport envelope.
pub fn event_body(event: &Event) -> String {
    let payload = serde_json::to_string(event).unwrap();
    SqsEnvelope::wrap(payload).to_body().unwrap()
}

/// Queue body whose envelope is valid but whose payload is not an event.
pub fn garbage_payload_body() -> String {
    SqsEnvelope::wrap(r#"{"unexpected":true}"#).to_body().unwrap()
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Await a future with a generous upper bound so a hung test fails instead of blocking.
pub async fn within<T>(limit: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(limit, future)
        .await
        .expect("operation timed out")
}

/// Collects formatted log output of the current thread while installed.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Captured lines containing `needle`
    pub fn lines_with(&self, needle: &str) -> Vec<String> {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer)
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(Arc::clone(&self.buffer))
    }
}
