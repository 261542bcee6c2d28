//! The preparation stage (spec §4.2): turn a raw request into a frozen,
//! normalised, deterministic input, using cache, delta-patch, or a fresh
//! load depending on state.

pub mod cache;
pub mod coalesce;
pub mod delta;
pub mod fetcher;
pub mod freeze;
pub mod normalize;
pub mod rules_cache;

use crate::error::{CalcError, CalcResult};
use crate::types::{CalculateRequest, FrozenInput};
use cache::PreparationCache;
use coalesce::{Coalescer, Lead};
use common_canonical::fingerprint_value;
use common_observability::EngineMetrics;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub struct Preparation {
    pool: sqlx::PgPool,
    cache: PreparationCache,
    coalescer: Coalescer,
    rule_cache: rules_cache::RuleCache,
    metrics: Arc<EngineMetrics>,
}

impl Preparation {
    pub fn new(pool: sqlx::PgPool, cache_ttl: Duration, cache_max_entries: usize, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            pool,
            cache: PreparationCache::new(cache_ttl, cache_max_entries),
            coalescer: Coalescer::new(),
            rule_cache: rules_cache::RuleCache::new(),
            metrics,
        }
    }

    /// Produce a frozen input for `request`, coalescing concurrent callers
    /// for the same proposal and serving from cache where the delta
    /// decision allows it.
    pub async fn prepare(&self, request: &CalculateRequest) -> CalcResult<FrozenInput> {
        let cache_key = cache_key_for(request);

        match self.coalescer.join(&request.proposal_id).await {
            Lead::Leader => {
                let result = self.prepare_uncoalesced(request, &cache_key).await;
                self.coalescer.complete(&request.proposal_id, clone_result(&result)).await;
                result
            }
            Lead::Follower(mut rx) => {
                self.metrics.coalesced_requests_total.inc();
                tracing::debug!(proposal_id = %request.proposal_id, "joined an in-flight preparation");
                match rx.recv().await {
                    Ok(Ok(shared)) => Ok((*shared).clone()),
                    Ok(Err(msg)) => Err(CalcError::Internal(msg)),
                    Err(_) => self.prepare_uncoalesced(request, &cache_key).await,
                }
            }
        }
    }

    async fn prepare_uncoalesced(&self, request: &CalculateRequest, cache_key: &str) -> CalcResult<FrozenInput> {
        if let Some((cached, age)) = self.cache.get(cache_key) {
            self.metrics.cache_hits_total.inc();
            let can_patch = request
                .changes
                .as_ref()
                .map(|d| {
                    !delta::requires_full_rebuild(
                        &cached.schema_version,
                        Some(d),
                        &delta::DeltaContext {
                            cached_schema_version: cached.schema_version.clone(),
                            cache_age: age,
                            cache_ttl: Duration::from_secs(3600),
                            cached_item_count: cached.line_items.len() + cached.modifiers.len(),
                            dependency_cascade_depth: 0,
                            recent_failed_attempts: 0,
                        },
                    )
                })
                .unwrap_or(false);

            if can_patch {
                // `can_patch` only comes back true when `request.changes` is
                // `Some`, since `requires_full_rebuild` defaults to `true`
                // for a `None` delta.
                let delta = request.changes.as_ref().expect("can_patch implies a delta is present");
                let patched = delta::apply_patch(&cached, request, delta)?;
                if delta::patch_is_complete(&patched, delta) {
                    tracing::debug!(proposal_id = %request.proposal_id, "serving cache hit via delta patch");
                    self.cache.insert(cache_key.to_string(), patched.clone());
                    return Ok(patched);
                }
                // The request didn't actually carry every id the delta
                // claimed changed; a patch built from it can't be trusted,
                // so fall back to a full fetch instead of serving it.
                tracing::warn!(proposal_id = %request.proposal_id, "delta claimed changed ids the request didn't carry, falling back to a full fetch");
            }
            if request.changes.is_none() {
                tracing::debug!(proposal_id = %request.proposal_id, "serving cache hit unchanged");
                return Ok(cached);
            }
        } else {
            self.metrics.cache_misses_total.inc();
            tracing::debug!(proposal_id = %request.proposal_id, "cache miss");
        }

        let frozen = self.fresh_load(request).await?;
        self.cache.insert(cache_key.to_string(), frozen.clone());
        Ok(frozen)
    }

    async fn fresh_load(&self, request: &CalculateRequest) -> CalcResult<FrozenInput> {
        let fetched = fetcher::fetch_snapshot(&self.pool, &request.tenant, &request.proposal_id).await?;

        let (line_items, modifiers, dependencies) =
            normalize::normalize(fetched.line_items, fetched.modifiers, fetched.dependencies)?;

        for rule in &fetched.rules {
            let content_hash = common_canonical::fingerprint_value(&rule.expression)
                .map_err(|e| CalcError::RuleCompileError(e.to_string()))?;
            self.rule_cache
                .get_or_compile(&request.tenant, &content_hash, 1, &rule.expression)
                .map_err(CalcError::from)?;
        }

        freeze::freeze(
            request.proposal_id.clone(),
            request.tenant.clone(),
            fetched.schema_version,
            line_items,
            modifiers,
            dependencies,
            fetched.rules,
            request.config.clone(),
        )
    }
}

fn clone_result(result: &CalcResult<FrozenInput>) -> CalcResult<FrozenInput> {
    match result {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(CalcError::Internal(e.to_string())),
    }
}

/// Fingerprint the request with `changes` removed, so a delta-only field
/// doesn't change the cache key it's meant to patch against.
fn cache_key_for(request: &CalculateRequest) -> String {
    let mut value = json!({
        "proposalId": request.proposal_id,
        "tenant": request.tenant,
        "lineItems": request.line_items,
        "modifiers": request.modifiers,
        "dependencies": request.dependencies,
        "rules": request.rules,
        "config": request.config,
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("changes");
    }
    fingerprint_value(&value).unwrap_or_else(|_| request.proposal_id.clone())
}
