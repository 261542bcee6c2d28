use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Prometheus metrics for the pricing engine's three-stage pipeline.
#[derive(Clone)]
pub struct EngineMetrics {
    pub registry: Registry,
    pub preparation_seconds: Histogram,
    pub compute_seconds: Histogram,
    pub commit_seconds: Histogram,
    pub total_seconds: Histogram,
    pub calculations_total: IntCounterVec,
    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    pub coalesced_requests_total: IntCounter,
    pub rule_rejections_total: IntCounterVec,
    pub outbox_published_total: IntCounter,
    pub outbox_retries_total: IntCounter,
    pub outbox_dead_lettered_total: IntCounter,
    pub webhook_failures_total: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let stage_buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

        let preparation_seconds = Histogram::with_opts(
            HistogramOpts::new("pricing_preparation_seconds", "Preparation stage duration")
                .buckets(stage_buckets.clone()),
        )
        .unwrap();
        let compute_seconds = Histogram::with_opts(
            HistogramOpts::new("pricing_compute_seconds", "Pure compute stage duration")
                .buckets(stage_buckets.clone()),
        )
        .unwrap();
        let commit_seconds = Histogram::with_opts(
            HistogramOpts::new("pricing_commit_seconds", "Commit stage duration").buckets(stage_buckets.clone()),
        )
        .unwrap();
        let total_seconds = Histogram::with_opts(
            HistogramOpts::new("pricing_total_seconds", "End-to-end calculate duration").buckets(stage_buckets),
        )
        .unwrap();

        let calculations_total = IntCounterVec::new(
            Opts::new("pricing_calculations_total", "Calculations grouped by outcome"),
            &["outcome"],
        )
        .unwrap();
        let cache_hits_total =
            IntCounter::new("pricing_cache_hits_total", "Preparation cache hits").unwrap();
        let cache_misses_total =
            IntCounter::new("pricing_cache_misses_total", "Preparation cache misses").unwrap();
        let coalesced_requests_total = IntCounter::new(
            "pricing_coalesced_requests_total",
            "Requests that joined an in-flight preparation instead of fetching",
        )
        .unwrap();
        let rule_rejections_total = IntCounterVec::new(
            Opts::new("pricing_rule_rejections_total", "Modifiers discarded, grouped by reason"),
            &["reason"],
        )
        .unwrap();
        let outbox_published_total =
            IntCounter::new("pricing_outbox_published_total", "Outbox events successfully published").unwrap();
        let outbox_retries_total =
            IntCounter::new("pricing_outbox_retries_total", "Outbox publish retries").unwrap();
        let outbox_dead_lettered_total = IntCounter::new(
            "pricing_outbox_dead_lettered_total",
            "Outbox rows that exceeded max retries",
        )
        .unwrap();
        let webhook_failures_total =
            IntCounter::new("pricing_webhook_failures_total", "Webhook delivery failures").unwrap();

        for collector in [
            Box::new(preparation_seconds.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(compute_seconds.clone()),
            Box::new(commit_seconds.clone()),
            Box::new(total_seconds.clone()),
            Box::new(calculations_total.clone()),
            Box::new(cache_hits_total.clone()),
            Box::new(cache_misses_total.clone()),
            Box::new(coalesced_requests_total.clone()),
            Box::new(rule_rejections_total.clone()),
            Box::new(outbox_published_total.clone()),
            Box::new(outbox_retries_total.clone()),
            Box::new(outbox_dead_lettered_total.clone()),
            Box::new(webhook_failures_total.clone()),
        ] {
            let _ = registry.register(collector);
        }

        EngineMetrics {
            registry,
            preparation_seconds,
            compute_seconds,
            commit_seconds,
            total_seconds,
            calculations_total,
            cache_hits_total,
            cache_misses_total,
            coalesced_requests_total,
            rule_rejections_total,
            outbox_published_total,
            outbox_retries_total,
            outbox_dead_lettered_total,
            webhook_failures_total,
        }
    }

    pub fn record_success(&self, prep: f64, compute: f64, commit: f64, total: f64) {
        self.preparation_seconds.observe(prep);
        self.compute_seconds.observe(compute);
        self.commit_seconds.observe(commit);
        self.total_seconds.observe(total);
        self.calculations_total.with_label_values(&["success"]).inc();
    }

    pub fn record_failure(&self, stage: &str) {
        self.calculations_total.with_label_values(&[stage]).inc();
    }

    pub fn record_rule_rejection(&self, reason: &str) {
        self.rule_rejections_total.with_label_values(&[reason]).inc();
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
