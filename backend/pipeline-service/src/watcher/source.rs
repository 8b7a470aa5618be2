//! Change record sources
//!
//! The watcher reads change records through [`ChangeSource`]. Production uses the
//! Debezium MongoDB connector's Kafka topics; the consumer group offset is the
//! durable resume point, stored only after a record has been fully handled.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::{Result, WatchError};

/// Position of a change record in its stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// One undecoded change record
#[derive(Debug, Clone)]
pub struct RawChange {
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub position: ChangePosition,
}

#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Establish the subscription. Failures here are reported to the caller of
    /// `Watcher::start`.
    async fn open(&self, topics: &[String]) -> Result<Box<dyn ChangeStream>>;
}

#[async_trait]
pub trait ChangeStream: Send {
    /// Next record; `None` once the subscription has ended.
    async fn next(&mut self) -> Option<Result<RawChange>>;

    /// Mark everything up to and including `position` as processed.
    fn commit(&mut self, position: &ChangePosition) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    /// Kafka brokers (comma-separated)
    pub brokers: String,
    /// Consumer group ID
    pub group_id: String,
    /// Upper bound for the topic metadata check made while opening
    pub metadata_timeout: Duration,
}

pub struct KafkaChangeSource {
    config: KafkaSourceConfig,
}

impl KafkaChangeSource {
    pub fn new(config: KafkaSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChangeSource for KafkaChangeSource {
    async fn open(&self, topics: &[String]) -> Result<Box<dyn ChangeStream>> {
        info!(
            brokers = %self.config.brokers,
            group_id = %self.config.group_id,
            "Creating change stream consumer"
        );

        // Offsets are stored by hand once handled and committed in the background.
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &self.config.group_id)
            .set("bootstrap.servers", &self.config.brokers)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "5000")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka consumer: {}", e);
                WatchError::Subscription(e.to_string())
            })?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs).map_err(|e| {
            error!("Failed to subscribe to topics: {}", e);
            WatchError::Subscription(e.to_string())
        })?;

        // librdkafka connects lazily; fetch metadata so unreachable brokers and
        // missing change topics fail here instead of as endless stream errors.
        let consumer = Arc::new(consumer);
        let checked = Arc::clone(&consumer);
        let checked_topics = topics.to_vec();
        let timeout = self.config.metadata_timeout;
        tokio::task::spawn_blocking(move || verify_topics(&checked, &checked_topics, timeout))
            .await
            .map_err(|e| WatchError::Subscription(format!("metadata check failed: {}", e)))??;

        info!(?topics, "Change stream consumer subscribed");

        Ok(Box::new(KafkaChangeStream { consumer }))
    }
}

fn verify_topics(consumer: &StreamConsumer, topics: &[String], timeout: Duration) -> Result<()> {
    for topic in topics {
        let metadata = consumer
            .fetch_metadata(Some(topic.as_str()), timeout)
            .map_err(|e| {
                error!(topic = %topic, error = %e, "Failed to fetch change topic metadata");
                WatchError::Subscription(format!("cannot reach brokers for {}: {}", topic, e))
            })?;

        let status = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic.as_str())
            .map(|t| (t.error().map(RDKafkaErrorCode::from), t.partitions().len()));
        check_topic(topic, status)?;
    }
    Ok(())
}

/// Interpret the metadata of one change topic: `(error, partition count)`, or `None`
/// when the broker did not report the topic at all.
fn check_topic(topic: &str, status: Option<(Option<RDKafkaErrorCode>, usize)>) -> Result<()> {
    match status {
        None => Err(WatchError::Subscription(format!(
            "change topic {} not reported by brokers",
            topic
        ))),
        Some((Some(code), _)) => {
            error!(topic = %topic, error = %code, "Change topic unavailable");
            Err(WatchError::Subscription(format!(
                "change topic {} unavailable: {}",
                topic, code
            )))
        }
        Some((None, 0)) => Err(WatchError::Subscription(format!(
            "change topic {} has no partitions",
            topic
        ))),
        Some((None, _)) => Ok(()),
    }
}

struct KafkaChangeStream {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl ChangeStream for KafkaChangeStream {
    async fn next(&mut self) -> Option<Result<RawChange>> {
        let result = match self.consumer.recv().await {
            Ok(message) => Ok(RawChange {
                key: message.key().map(<[u8]>::to_vec),
                value: message.payload().map(<[u8]>::to_vec),
                position: ChangePosition {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                },
            }),
            Err(e) => Err(WatchError::from(e)),
        };
        Some(result)
    }

    fn commit(&mut self, position: &ChangePosition) -> Result<()> {
        // Kafka resumes from the stored offset, i.e. the next record to read.
        self.consumer
            .store_offset(&position.topic, position.partition, position.offset + 1)?;
        Ok(())
    }
}
