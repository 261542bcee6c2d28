use anyhow::{Context, Result};
use std::env;

/// Ops knobs the engine accepts. Everything here is a collaborator
/// concern (broker, DB, cache, timing) — never a pricing rule.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub broker_topic: String,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub outbox_poll_interval_secs: u64,
    pub outbox_batch_size: i64,
    pub outbox_max_retries: u32,
    pub request_deadline_ms: u64,
    pub webhook_secret: Option<String>,
    pub webhook_urls: Vec<String>,
    pub engine_version: String,
    /// `KAFKA_BOOTSTRAP`, when set, switches the outbox publisher from the
    /// no-op sink to a real `KafkaEventSink` (requires the `kafka-producer`
    /// feature).
    pub kafka_brokers: Option<String>,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let broker_topic =
            env::var("PRICING_BROKER_TOPIC").unwrap_or_else(|_| "calculation.completed.v1".to_string());
        let cache_ttl_secs = env::var("PRICING_CACHE_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);
        let cache_max_entries = env::var("PRICING_CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(10_000);
        let outbox_poll_interval_secs = env::var("PRICING_OUTBOX_POLL_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);
        let outbox_batch_size = env::var("PRICING_OUTBOX_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(100);
        let outbox_max_retries = env::var("PRICING_OUTBOX_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);
        let request_deadline_ms = env::var("PRICING_REQUEST_DEADLINE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5_000);
        let webhook_secret = env::var("PRICING_WEBHOOK_SECRET").ok();
        let webhook_urls = env::var("PRICING_WEBHOOK_URLS")
            .ok()
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let engine_version = env::var("PRICING_ENGINE_VERSION").unwrap_or_else(|_| "1.0.0".to_string());
        let kafka_brokers = env::var("KAFKA_BOOTSTRAP").ok();

        Ok(Self {
            database_url,
            broker_topic,
            cache_ttl_secs: cache_ttl_secs.max(1),
            cache_max_entries: cache_max_entries.max(1),
            outbox_poll_interval_secs: outbox_poll_interval_secs.max(1),
            outbox_batch_size: outbox_batch_size.max(1),
            outbox_max_retries: outbox_max_retries.max(1),
            request_deadline_ms: request_deadline_ms.max(100),
            webhook_secret,
            webhook_urls,
            engine_version,
            kafka_brokers,
        })
    }
}
