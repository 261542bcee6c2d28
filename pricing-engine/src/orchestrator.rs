//! Ties preparation, pure compute, and commit together (spec §4.1).

use crate::commit::{CommitMeta, Committer};
use crate::compute;
use crate::error::{CalcError, CalcResult};
use crate::prepare::Preparation;
use crate::types::{CalculateRequest, CalculateResponse, PhaseTimings};
use chrono::Utc;
use common_observability::EngineMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Orchestrator {
    preparation: Preparation,
    committer: Committer,
    metrics: Arc<EngineMetrics>,
    shutdown: AtomicBool,
    default_deadline_ms: u64,
    engine_version: String,
}

impl Orchestrator {
    pub fn new(
        preparation: Preparation,
        committer: Committer,
        metrics: Arc<EngineMetrics>,
        default_deadline_ms: u64,
        engine_version: String,
    ) -> Self {
        Self {
            preparation,
            committer,
            metrics,
            shutdown: AtomicBool::new(false),
            default_deadline_ms,
            engine_version,
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// `Calculate(request) → Result`. Not safe to call after [`Self::shutdown`].
    pub async fn calculate(&self, request: &CalculateRequest) -> CalcResult<CalculateResponse> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(CalcError::Internal("orchestrator has been shut down".to_string()));
        }

        let deadline_ms = request.deadline_ms.unwrap_or(self.default_deadline_ms);
        match tokio::time::timeout(Duration::from_millis(deadline_ms), self.calculate_inner(request)).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.calculations_total.with_label_values(&["timeout"]).inc();
                Err(CalcError::ResourceLimit("timeout".to_string()))
            }
        }
    }

    async fn calculate_inner(&self, request: &CalculateRequest) -> CalcResult<CalculateResponse> {
        let total_start = Instant::now();
        let started_at = Utc::now();

        let prep_start = Instant::now();
        let frozen = match self.preparation.prepare(request).await {
            Ok(v) => v,
            Err(e) => {
                self.metrics.calculations_total.with_label_values(&["prepare_failed"]).inc();
                return Err(e);
            }
        };
        let preparation_ms = elapsed_ms(prep_start);

        let compute_start = Instant::now();
        let result = match compute::compute(&frozen) {
            Ok(v) => v,
            Err(e) => {
                self.metrics.calculations_total.with_label_values(&["compute_failed"]).inc();
                return Err(e);
            }
        };
        let compute_ms = elapsed_ms(compute_start);

        for rejected in &result.rejected {
            let reason = if rejected.reason.starts_with("excluded_by:") {
                "excluded_by"
            } else {
                rejected.reason.as_str()
            };
            self.metrics.record_rule_rejection(reason);
        }

        let commit_meta = CommitMeta {
            tenant: frozen.tenant.clone(),
            schema_version: frozen.schema_version.clone(),
            tax_mode: frozen.config.mode,
            engine_version: self.engine_version.clone(),
            started_at,
            preparation_ms,
            compute_ms,
        };

        let commit_start = Instant::now();
        let outcome = match self.committer.commit(&frozen.proposal_id, result, &commit_meta).await {
            Ok(v) => v,
            Err(e) => {
                self.metrics.calculations_total.with_label_values(&["commit_failed"]).inc();
                return Err(e);
            }
        };
        let commit_ms = elapsed_ms(commit_start);

        let total_ms = elapsed_ms(total_start);
        self.metrics.record_success(preparation_ms / 1000.0, compute_ms / 1000.0, commit_ms / 1000.0, total_ms / 1000.0);

        Ok(CalculateResponse {
            result: outcome.result,
            timings: PhaseTimings {
                preparation_ms,
                compute_ms,
                commit_ms,
                total_ms,
            },
            replayed: outcome.replayed,
        })
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
