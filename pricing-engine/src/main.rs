use common_audit::NoopEventSink;
use pricing_engine::commit::outbox::OutboxPublisher;
use pricing_engine::commit::Committer;
use pricing_engine::config::EngineConfig;
use pricing_engine::prepare::{fetcher, Preparation};
use pricing_engine::Orchestrator;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter("info").init();

    match run().await {
        Ok(()) => ExitCode::from(0),
        Err(RunError::Config(e)) => {
            error!(error = %e, "configuration error");
            ExitCode::from(1)
        }
        Err(RunError::Runtime(e)) => {
            error!(error = %e, "unrecoverable runtime error");
            ExitCode::from(2)
        }
    }
}

enum RunError {
    Config(anyhow::Error),
    Runtime(anyhow::Error),
}

#[cfg(feature = "kafka-producer")]
fn build_event_sink(config: &EngineConfig) -> Result<Arc<dyn common_audit::EventSink>, RunError> {
    match &config.kafka_brokers {
        Some(brokers) => {
            let producer: rdkafka::producer::FutureProducer = rdkafka::ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .create()
                .map_err(|e| RunError::Runtime(e.into()))?;
            Ok(Arc::new(common_audit::KafkaEventSink::new(producer, config.broker_topic.clone())))
        }
        None => Ok(Arc::new(NoopEventSink)),
    }
}

#[cfg(not(feature = "kafka-producer"))]
fn build_event_sink(_config: &EngineConfig) -> Result<Arc<dyn common_audit::EventSink>, RunError> {
    Ok(Arc::new(NoopEventSink))
}

async fn run() -> Result<(), RunError> {
    let config = EngineConfig::from_env().map_err(RunError::Config)?;
    let pool = fetcher::connect(&config.database_url).await.map_err(|e| RunError::Runtime(e.into()))?;

    let metrics = Arc::new(common_observability::EngineMetrics::new());

    let preparation = Preparation::new(
        pool.clone(),
        Duration::from_secs(config.cache_ttl_secs),
        config.cache_max_entries,
        metrics.clone(),
    );
    let committer = Committer::new(
        pool.clone(),
        metrics.clone(),
        config.webhook_urls.clone(),
        config.webhook_secret.clone(),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        preparation,
        committer,
        metrics.clone(),
        config.request_deadline_ms,
        config.engine_version.clone(),
    ));

    let sink = build_event_sink(&config)?;
    let publisher = OutboxPublisher::new(
        pool.clone(),
        sink,
        metrics.clone(),
        Duration::from_secs(config.outbox_poll_interval_secs),
        config.outbox_batch_size,
        config.outbox_max_retries,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let publisher_handle = tokio::spawn(async move {
        publisher.run(shutdown_rx).await;
    });

    info!(engine_version = %config.engine_version, "pricing engine worker started");

    tokio::signal::ctrl_c().await.map_err(|e| RunError::Runtime(e.into()))?;
    info!("shutdown signal received, draining outbox publisher");
    orchestrator.shutdown();
    let _ = shutdown_tx.send(true);
    let _ = publisher_handle.await;

    Ok(())
}
