//! Change watcher
//!
//! Subscribes to insert notifications on the VAA collections and hands every decoded
//! [`Event`] to an [`EventHandler`]:
//!
//! 1. `start` parses the change filter and opens the subscription; both failures are
//!    returned to the caller.
//! 2. A background task reads change records until shutdown or end of stream.
//! 3. Each matching record is decoded and dispatched on its own task, bounded by
//!    `max_in_flight`. Decode failures are logged and skipped.
//! 4. A record's position is stored once its handler has finished and every earlier
//!    record of the same partition is finished too. Skipped records finish at once.
//!    A restart therefore resumes after the last fully handled change (at-least-once).

pub mod filter;
pub mod notification;
mod offsets;
pub mod source;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use vaa_event::Event;

use crate::error::Result;
use crate::metrics::WatcherMetrics;
use offsets::PositionTracker;

pub use filter::{ChangeFilter, Namespace, OperationType, DEFAULT_PIPELINE_TEMPLATE, VAA_COLLECTIONS};
pub use notification::ChangeNotification;
pub use source::{
    ChangePosition, ChangeSource, ChangeStream, KafkaChangeSource, KafkaSourceConfig, RawChange,
};

/// Receives every event observed by the watcher.
///
/// Fire-and-forget: failures must be handled inside the handler. Notifications are
/// delivered at least once, so handling must be idempotent on `Event::id`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event);
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debezium `topic.prefix`
    pub topic_prefix: String,
    /// Aggregation-pipeline filter; `{db}` is replaced with the database name
    pub pipeline: String,
    /// Maximum concurrently running handler tasks
    pub max_in_flight: usize,
    /// Pause after a change stream read error
    pub error_backoff: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "explorer".to_string(),
            pipeline: DEFAULT_PIPELINE_TEMPLATE.to_string(),
            max_in_flight: 32,
            error_backoff: Duration::from_secs(1),
        }
    }
}

pub struct Watcher {
    source: Arc<dyn ChangeSource>,
    database: String,
    handler: Arc<dyn EventHandler>,
    config: WatcherConfig,
    metrics: WatcherMetrics,
}

impl Watcher {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        database: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            source,
            database: database.into(),
            handler,
            config,
            metrics: WatcherMetrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: WatcherMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Establish the subscription and start delivering events in the background.
    ///
    /// Returns once the subscription is open. The returned task finishes after
    /// `shutdown` flips to `true` (or its sender is dropped) and every dispatched
    /// handler has completed.
    pub async fn start(self, shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        let filter = ChangeFilter::from_template(&self.config.pipeline, &self.database)?;
        let topics = filter.topics(&self.config.topic_prefix);
        let stream = self.source.open(&topics).await?;

        let max_in_flight = self.config.max_in_flight.max(1);
        info!(
            database = %self.database,
            ?topics,
            max_in_flight,
            "Change watcher started"
        );

        let watch_loop = WatchLoop {
            stream,
            filter,
            handler: self.handler,
            metrics: self.metrics,
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            error_backoff: self.config.error_backoff,
            shutdown,
            tasks: JoinSet::new(),
            positions: PositionTracker::new(),
        };

        Ok(tokio::spawn(watch_loop.run()))
    }
}

struct WatchLoop {
    stream: Box<dyn ChangeStream>,
    filter: ChangeFilter,
    handler: Arc<dyn EventHandler>,
    metrics: WatcherMetrics,
    semaphore: Arc<Semaphore>,
    error_backoff: Duration,
    shutdown: watch::Receiver<bool>,
    tasks: JoinSet<(ChangePosition, std::result::Result<(), JoinError>)>,
    positions: PositionTracker,
}

impl WatchLoop {
    async fn run(mut self) {
        loop {
            let next = tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.reap(joined);
                    continue;
                }
                next = self.stream.next() => next,
            };

            let change = match next {
                None => {
                    info!("Change stream ended");
                    break;
                }
                Some(Err(e)) => {
                    self.metrics.stream_errors_total.inc();
                    error!(
                        error = %e,
                        backoff_ms = self.error_backoff.as_millis() as u64,
                        "Change stream error (will retry)"
                    );
                    tokio::select! {
                        _ = wait_for_shutdown(&mut self.shutdown) => break,
                        _ = tokio::time::sleep(self.error_backoff) => continue,
                    }
                }
                Some(Ok(change)) => change,
            };

            self.metrics.received_total.inc();
            let position = change.position.clone();
            self.positions.begin(&position);

            match self.decode(change) {
                Some(event) => {
                    let Some(permit) = self.acquire_slot().await else {
                        break;
                    };
                    self.dispatch(event, position, permit);
                }
                None => self.finish(&position),
            }
        }

        self.drain().await;
        let unfinished = self.positions.pending();
        if unfinished > 0 {
            info!(unfinished, "Leaving positions of unhandled changes unstored");
        }
        info!("Change watcher stopped");
    }

    fn decode(&self, change: RawChange) -> Option<Event> {
        let position = &change.position;
        let notification =
            match ChangeNotification::decode(change.key.as_deref(), change.value.as_deref()) {
                Ok(Some(notification)) => notification,
                Ok(None) => {
                    self.metrics.skipped_total.inc();
                    debug!(offset = position.offset, "Skipping tombstone record");
                    return None;
                }
                Err(e) => {
                    self.metrics.decode_failed_total.inc();
                    warn!(
                        topic = %position.topic,
                        partition = position.partition,
                        offset = position.offset,
                        error = %e,
                        "Failed to decode change record, skipping"
                    );
                    return None;
                }
            };

        if !self
            .filter
            .matches(notification.operation, &notification.namespace)
        {
            self.metrics.skipped_total.inc();
            debug!(
                operation = %notification.operation,
                namespace = %notification.namespace,
                "Skipping change outside filter"
            );
            return None;
        }

        let key = notification.document_key.clone();
        match notification.into_event() {
            Ok(event) => Some(event),
            Err(e) => {
                self.metrics.decode_failed_total.inc();
                warn!(
                    document_key = %key,
                    error = %e,
                    "Failed to decode post-image, skipping"
                );
                None
            }
        }
    }

    /// Wait for handler capacity. `None` if shutdown was requested meanwhile.
    async fn acquire_slot(&mut self) -> Option<OwnedSemaphorePermit> {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::select! {
            _ = wait_for_shutdown(&mut self.shutdown) => None,
            permit = semaphore.acquire_owned() => permit.ok(),
        }
    }

    /// Run the handler on its own task. The outer task outlives a handler panic so the
    /// record's position is always reported back.
    fn dispatch(&mut self, event: Event, position: ChangePosition, permit: OwnedSemaphorePermit) {
        debug!(vaa_id = %event.id, chain_id = event.chain_id, "Dispatching event");

        let handler = Arc::clone(&self.handler);
        self.metrics.in_flight.inc();
        self.metrics.dispatched_total.inc();
        self.tasks.spawn(async move {
            let _permit = permit;
            let outcome = tokio::spawn(async move { handler.handle(event).await }).await;
            (position, outcome)
        });
    }

    fn reap(
        &mut self,
        joined: std::result::Result<(ChangePosition, std::result::Result<(), JoinError>), JoinError>,
    ) {
        self.metrics.in_flight.dec();
        let (position, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                // Position stays unstored; the change is redelivered after a restart.
                warn!(error = %e, "Event dispatch task cancelled");
                return;
            }
        };

        if let Err(e) = outcome {
            if e.is_panic() {
                self.metrics.handler_panics_total.inc();
                error!(offset = position.offset, error = %e, "Event handler panicked");
            } else {
                warn!(offset = position.offset, error = %e, "Event handler task cancelled");
            }
        }
        self.finish(&position);
    }

    /// Mark a record finished and store the partition's new resume position, if any.
    fn finish(&mut self, position: &ChangePosition) {
        let Some(resume) = self.positions.finish(position) else {
            return;
        };
        if let Err(e) = self.stream.commit(&resume) {
            warn!(
                topic = %resume.topic,
                partition = resume.partition,
                offset = resume.offset,
                error = %e,
                "Failed to store change stream position"
            );
        }
    }

    async fn drain(&mut self) {
        if !self.tasks.is_empty() {
            info!(in_flight = self.tasks.len(), "Waiting for in-flight handlers");
        }
        while let Some(joined) = self.tasks.join_next().await {
            self.reap(joined);
        }
    }
}

/// Resolves once `shutdown` is `true` or its sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
