//! Background outbox publisher: claims due rows with `FOR UPDATE SKIP
//! LOCKED`, publishes them in order, and retires or dead-letters on
//! failure.

use common_audit::{EventSink, OutboxEvent};
use common_observability::EngineMetrics;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    event_type: String,
    aggregate_id: String,
    payload: serde_json::Value,
    metadata: serde_json::Value,
    retry_count: i32,
}

/// Re-entrancy guard: only one publisher loop instance runs per process.
static RUNNING: AtomicBool = AtomicBool::new(false);

pub struct OutboxPublisher {
    pool: PgPool,
    sink: Arc<dyn EventSink>,
    metrics: Arc<EngineMetrics>,
    poll_interval: Duration,
    batch_size: i64,
    max_retries: u32,
}

impl OutboxPublisher {
    pub fn new(
        pool: PgPool,
        sink: Arc<dyn EventSink>,
        metrics: Arc<EngineMetrics>,
        poll_interval: Duration,
        batch_size: i64,
        max_retries: u32,
    ) -> Self {
        Self {
            pool,
            sink,
            metrics,
            poll_interval,
            batch_size,
            max_retries,
        }
    }

    /// Run the publisher loop until cancelled. No-ops immediately if
    /// another instance in this process is already running.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if RUNNING.swap(true, Ordering::SeqCst) {
            tracing::warn!("outbox publisher already running in this process, skipping duplicate start");
            return;
        }
        let _guard = RunningGuard;

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.drain_once().await {
                        tracing::error!(error = %e, "outbox drain failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn drain_once(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<OutboxRow> = sqlx::query_as(
            "SELECT id, event_type, aggregate_id, payload, metadata, retry_count FROM outbox_events \
             WHERE status IN ('PENDING', 'PROCESSING') AND next_retry_at <= now() \
             ORDER BY created_at LIMIT $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(self.batch_size)
        .fetch_all(&mut *tx)
        .await?;

        for row in &rows {
            sqlx::query("UPDATE outbox_events SET status = 'PROCESSING' WHERE id = $1")
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        for row in rows {
            self.publish_one(row).await?;
        }
        Ok(())
    }

    async fn publish_one(&self, row: OutboxRow) -> Result<(), sqlx::Error> {
        let event = OutboxEvent {
            id: row.id,
            event_type: row.event_type,
            aggregate_id: row.aggregate_id,
            payload: row.payload,
            metadata: row.metadata,
            created_at: chrono::Utc::now(),
        };

        match self.sink.publish(&event).await {
            Ok(()) => {
                sqlx::query("UPDATE outbox_events SET status = 'COMPLETED' WHERE id = $1")
                    .bind(row.id)
                    .execute(&self.pool)
                    .await?;
                self.metrics.outbox_published_total.inc();
            }
            Err(e) => {
                let next_retry_count = row.retry_count + 1;
                if next_retry_count as u32 > self.max_retries {
                    sqlx::query("UPDATE outbox_events SET status = 'DEAD_LETTER', last_error = $2 WHERE id = $1")
                        .bind(row.id)
                        .bind(e.to_string())
                        .execute(&self.pool)
                        .await?;
                    tracing::error!(event_id = %row.id, error = %e, "outbox event exceeded max retries, dead-lettered");
                    self.metrics.outbox_dead_lettered_total.inc();
                } else {
                    let backoff_secs = 2i64.pow(next_retry_count.min(30) as u32);
                    sqlx::query(
                        "UPDATE outbox_events SET status = 'PENDING', retry_count = $2, \
                         next_retry_at = now() + ($3 || ' seconds')::interval, last_error = $4 \
                         WHERE id = $1",
                    )
                    .bind(row.id)
                    .bind(next_retry_count)
                    .bind(backoff_secs.to_string())
                    .bind(e.to_string())
                    .execute(&self.pool)
                    .await?;
                    tracing::warn!(event_id = %row.id, retry_count = next_retry_count, backoff_secs, error = %e, "outbox publish failed, scheduled for retry");
                    self.metrics.outbox_retries_total.inc();
                }
            }
        }
        Ok(())
    }
}

struct RunningGuard;

impl Drop for RunningGuard {
    fn drop(&mut self) {
        RUNNING.store(false, Ordering::SeqCst);
    }
}
