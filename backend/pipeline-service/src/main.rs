use anyhow::{Context, Result};
use pipeline_service::watcher::{KafkaChangeSource, KafkaSourceConfig};
use pipeline_service::{Config, LogFormat, SqsEventPublisher, Watcher, WatcherConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vaa_queue::{SqsConfig, SqsQueueClient};

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,pipeline_service=debug,vaa_queue=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    tracing::info!(
        database = %config.mongodb_database,
        kafka_brokers = %config.kafka_brokers,
        queue_url = %config.sqs_queue_url,
        "Starting pipeline-service"
    );

    let sqs_client = SqsQueueClient::from_env(SqsConfig::new(config.sqs_queue_url.clone())).await;
    let publisher = Arc::new(SqsEventPublisher::new(Arc::new(sqs_client)));

    let source = Arc::new(KafkaChangeSource::new(KafkaSourceConfig {
        brokers: config.kafka_brokers.clone(),
        group_id: config.cdc_group_id.clone(),
        metadata_timeout: Duration::from_millis(config.kafka_metadata_timeout_ms),
    }));

    let watcher_config = WatcherConfig {
        topic_prefix: config.cdc_topic_prefix.clone(),
        max_in_flight: config.watcher_max_in_flight,
        ..WatcherConfig::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for ctrl+c: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let watcher = Watcher::new(
        source,
        config.mongodb_database.clone(),
        publisher,
        watcher_config,
    );
    let handle = watcher
        .start(shutdown_rx)
        .await
        .context("Failed to start change watcher")?;

    handle.await.context("Change watcher task failed")?;
    tracing::info!("pipeline-service stopped");

    Ok(())
}
