//! VAA ingestion pipeline
//!
//! Watches the VAA collections of the explorer database through Debezium change
//! records on Kafka and forwards every inserted VAA to the durable queue consumed by
//! downstream trackers.

pub mod config;
pub mod error;
pub mod metrics;
pub mod publisher;
pub mod watcher;

pub use config::{Config, LogFormat};
pub use error::{Result, WatchError};
pub use metrics::WatcherMetrics;
pub use publisher::SqsEventPublisher;
pub use watcher::{EventHandler, Watcher, WatcherConfig};
