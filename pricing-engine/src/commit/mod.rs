//! The commit stage (spec §4.4): idempotent transactional write, outbox
//! staging, and best-effort webhook fan-out.

pub mod idempotency;
pub mod lock;
pub mod outbox;
pub mod webhook;
pub mod writer;

use crate::error::CalcResult;
use crate::types::{CalcResultValue, TaxMode};
use chrono::{DateTime, Utc};
use common_audit::EventSink;
use common_observability::EngineMetrics;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub struct CommitOutcome {
    pub result: CalcResultValue,
    pub replayed: bool,
}

/// Audit/event context the commit stage can't derive from the result
/// alone — carried down from the frozen input and the orchestrator's own
/// phase timings.
pub struct CommitMeta {
    pub tenant: String,
    pub schema_version: String,
    pub tax_mode: TaxMode,
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
    pub preparation_ms: f64,
    pub compute_ms: f64,
}

pub struct Committer {
    pool: PgPool,
    metrics: Arc<EngineMetrics>,
    webhook_urls: Vec<String>,
    webhook_secret: Option<String>,
    http_client: reqwest::Client,
}

impl Committer {
    pub fn new(
        pool: PgPool,
        metrics: Arc<EngineMetrics>,
        webhook_urls: Vec<String>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            pool,
            metrics,
            webhook_urls,
            webhook_secret,
            http_client: reqwest::Client::new(),
        }
    }

    /// Commit a computed result: idempotency check, transactional write,
    /// outbox insert, and (after commit) cache + metrics + webhook
    /// fan-out. Webhook failures never change the returned outcome.
    pub async fn commit(&self, proposal_id: &str, result: CalcResultValue, meta: &CommitMeta) -> CalcResult<CommitOutcome> {
        if let Some(existing) = idempotency::lookup(&self.pool, &result.checksum).await? {
            return Ok(CommitOutcome {
                result: existing,
                replayed: true,
            });
        }

        let guard = lock::acquire(&self.pool, proposal_id).await?;
        let outcome = self.commit_locked(proposal_id, result, meta).await;
        lock::release(&self.pool, guard).await?;
        outcome
    }

    async fn commit_locked(&self, proposal_id: &str, result: CalcResultValue, meta: &CommitMeta) -> CalcResult<CommitOutcome> {
        if let Some(existing) = idempotency::lookup(&self.pool, &result.checksum).await? {
            return Ok(CommitOutcome {
                result: existing,
                replayed: true,
            });
        }

        let commit_start = Instant::now();
        let calc_id = Uuid::new_v4();
        let finished_at = Utc::now();
        // Measured up to the write itself, not including it — the write's
        // own duration isn't known until after it returns.
        let commit_ms = commit_start.elapsed().as_secs_f64() * 1000.0;
        let processing_ms = meta.preparation_ms + meta.compute_ms + commit_ms;

        writer::write_transactionally(&self.pool, proposal_id, &result, meta, calc_id, finished_at, processing_ms).await?;

        idempotency::cache(&result.checksum, &result);
        self.metrics.calculations_total.with_label_values(&["committed"]).inc();

        self.fire_webhooks(proposal_id, &result).await;

        Ok(CommitOutcome {
            result,
            replayed: false,
        })
    }

    async fn fire_webhooks(&self, proposal_id: &str, result: &CalcResultValue) {
        if self.webhook_urls.is_empty() {
            return;
        }
        let futures = self.webhook_urls.iter().map(|url| {
            webhook::send(
                &self.http_client,
                url,
                proposal_id,
                result,
                self.webhook_secret.as_deref(),
            )
        });
        let outcomes = futures_util::future::join_all(futures).await;
        for outcome in outcomes {
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "webhook delivery failed, queued for async retry");
                self.metrics.webhook_failures_total.inc();
            }
        }
    }

    pub fn event_sink(&self) -> Arc<dyn EventSink> {
        Arc::new(common_audit::NoopEventSink)
    }
}
