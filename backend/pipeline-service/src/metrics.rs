use prometheus::{IntCounter, IntGauge};

/// Metrics for change watcher monitoring
#[derive(Clone)]
pub struct WatcherMetrics {
    /// Change records read from the stream
    pub received_total: IntCounter,
    /// Records outside the filter (wrong operation or namespace, tombstones)
    pub skipped_total: IntCounter,
    /// Records whose envelope or post-image could not be decoded
    pub decode_failed_total: IntCounter,
    /// Events handed to the handler
    pub dispatched_total: IntCounter,
    /// Handler tasks that panicked
    pub handler_panics_total: IntCounter,
    /// Errors reading from the change stream
    pub stream_errors_total: IntCounter,
    /// Handler tasks currently running
    pub in_flight: IntGauge,
}

impl WatcherMetrics {
    pub fn new() -> Self {
        let registry = prometheus::default_registry();

        let received_total = IntCounter::new(
            "watcher_changes_received_total",
            "Total number of change records read from the change stream",
        )
        .expect("valid metric for watcher_changes_received_total");

        let skipped_total = IntCounter::new(
            "watcher_changes_skipped_total",
            "Total number of change records ignored by the filter",
        )
        .expect("valid metric for watcher_changes_skipped_total");

        let decode_failed_total = IntCounter::new(
            "watcher_decode_failed_total",
            "Total number of change records that could not be decoded",
        )
        .expect("valid metric for watcher_decode_failed_total");

        let dispatched_total = IntCounter::new(
            "watcher_events_dispatched_total",
            "Total number of events dispatched to the handler",
        )
        .expect("valid metric for watcher_events_dispatched_total");

        let handler_panics_total = IntCounter::new(
            "watcher_handler_panics_total",
            "Total number of handler tasks that panicked",
        )
        .expect("valid metric for watcher_handler_panics_total");

        let stream_errors_total = IntCounter::new(
            "watcher_stream_errors_total",
            "Total number of errors reading from the change stream",
        )
        .expect("valid metric for watcher_stream_errors_total");

        let in_flight = IntGauge::new(
            "watcher_handlers_in_flight",
            "Number of handler tasks currently running",
        )
        .expect("valid metric for watcher_handlers_in_flight");

        for metric in [
            Box::new(received_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(skipped_total.clone()),
            Box::new(decode_failed_total.clone()),
            Box::new(dispatched_total.clone()),
            Box::new(handler_panics_total.clone()),
            Box::new(stream_errors_total.clone()),
            Box::new(in_flight.clone()),
        ] {
            let _ = registry.register(metric);
        }

        Self {
            received_total,
            skipped_total,
            decode_failed_total,
            dispatched_total,
            handler_panics_total,
            stream_errors_total,
            in_flight,
        }
    }
}

impl Default for WatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}
