use serde::Deserialize;

/// Service configuration, read from the environment (and `.env` when present).
///
/// - `KAFKA_BROKERS`: Kafka broker addresses (default: "localhost:9092")
/// - `CDC_GROUP_ID`: consumer group for the change topics (default: "vaa-pipeline")
/// - `CDC_TOPIC_PREFIX`: Debezium `topic.prefix` (default: "explorer")
/// - `MONGODB_DATABASE`: database holding the VAA collections (required)
/// - `SQS_QUEUE_URL`: queue receiving watched events (required)
/// - `KAFKA_METADATA_TIMEOUT_MS`: topic check while subscribing (default: 10000)
/// - `WATCHER_MAX_IN_FLIGHT`: concurrent handler tasks (default: 32)
/// - `LOG_FORMAT`: `text` or `json` (default: text)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,
    #[serde(default = "default_cdc_group_id")]
    pub cdc_group_id: String,
    #[serde(default = "default_cdc_topic_prefix")]
    pub cdc_topic_prefix: String,
    #[serde(default = "default_kafka_metadata_timeout_ms")]
    pub kafka_metadata_timeout_ms: u64,
    pub mongodb_database: String,
    pub sqs_queue_url: String,
    #[serde(default = "default_watcher_max_in_flight")]
    pub watcher_max_in_flight: usize,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_cdc_group_id() -> String {
    "vaa-pipeline".to_string()
}

fn default_cdc_topic_prefix() -> String {
    "explorer".to_string()
}

fn default_kafka_metadata_timeout_ms() -> u64 {
    10_000
}

fn default_watcher_max_in_flight() -> usize {
    32
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars)
    }
}
