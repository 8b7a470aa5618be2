use prometheus::{IntCounterVec, Opts};
use tracing::warn;

/// Sink for consumer counters. Implementations must never block or fail.
pub trait QueueMetrics: Send + Sync {
    fn inc_consumed(&self, chain_id: u16, source: &str);
    fn inc_processed(&self, chain_id: u16, retry: u8);
    fn inc_failed(&self, chain_id: u16, retry: u8);
}

#[derive(Clone)]
pub struct PrometheusQueueMetrics {
    pub consumed: IntCounterVec,
    pub processed: IntCounterVec,
    pub failed: IntCounterVec,
}

impl PrometheusQueueMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let consumed = IntCounterVec::new(
            Opts::new(
                "vaa_queue_consumed_total",
                "Total number of VAA events decoded from the queue",
            )
            .const_label("service", service.to_string()),
            &["chain", "source"],
        )
        .expect("valid metric opts for vaa_queue_consumed_total");

        let processed = IntCounterVec::new(
            Opts::new(
                "vaa_queue_processed_total",
                "Total number of queue messages acknowledged as processed",
            )
            .const_label("service", service.to_string()),
            &["chain", "retry"],
        )
        .expect("valid metric opts for vaa_queue_processed_total");

        let failed = IntCounterVec::new(
            Opts::new(
                "vaa_queue_failed_total",
                "Total number of queue messages acknowledged as failed",
            )
            .const_label("service", service.to_string()),
            &["chain", "retry"],
        )
        .expect("valid metric opts for vaa_queue_failed_total");

        for metric in [
            Box::new(consumed.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(processed.clone()),
            Box::new(failed.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register queue metric: {}", e);
            }
        }

        Self {
            consumed,
            processed,
            failed,
        }
    }
}

impl QueueMetrics for PrometheusQueueMetrics {
    fn inc_consumed(&self, chain_id: u16, source: &str) {
        self.consumed
            .with_label_values(&[&chain_id.to_string(), source])
            .inc();
    }

    fn inc_processed(&self, chain_id: u16, retry: u8) {
        self.processed
            .with_label_values(&[&chain_id.to_string(), &retry.to_string()])
            .inc();
    }

    fn inc_failed(&self, chain_id: u16, retry: u8) {
        self.failed
            .with_label_values(&[&chain_id.to_string(), &retry.to_string()])
            .inc();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopQueueMetrics;

impl QueueMetrics for NoopQueueMetrics {
    fn inc_consumed(&self, _chain_id: u16, _source: &str) {}
    fn inc_processed(&self, _chain_id: u16, _retry: u8) {}
    fn inc_failed(&self, _chain_id: u16, _retry: u8) {}
}
