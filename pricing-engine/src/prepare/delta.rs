//! The delta decision: whether a cache hit can be patched in place or must
//! force a fresh load.

use crate::error::CalcResult;
use crate::prepare::{freeze, normalize};
use crate::types::{CalculateRequest, Delta, DeltaType, FrozenInput};
use std::collections::HashSet;
use std::time::Duration;

/// State the decision needs about the cached entry being considered for a
/// patch, beyond the delta itself.
pub struct DeltaContext {
    pub cached_schema_version: String,
    pub cache_age: Duration,
    pub cache_ttl: Duration,
    pub cached_item_count: usize,
    pub dependency_cascade_depth: usize,
    pub recent_failed_attempts: u32,
}

/// Mirrors spec §4.2's "Delta decision": any of these holding forces a
/// full rebuild rather than an in-place patch.
pub fn requires_full_rebuild(request_schema_version: &str, delta: Option<&Delta>, ctx: &DeltaContext) -> bool {
    if ctx.cached_schema_version != request_schema_version {
        return true;
    }
    if ctx.cache_age > ctx.cache_ttl {
        return true;
    }
    if ctx.recent_failed_attempts > 3 {
        return true;
    }

    let Some(delta) = delta else {
        return true;
    };
    if !matches!(delta.delta_type, DeltaType::ModifierOnly | DeltaType::LineItem) {
        return true;
    }
    if delta.dependencies_changed || delta.rules_changed {
        return true;
    }

    let changed = delta.changed_line_item_ids.len() + delta.changed_modifier_ids.len();
    if ctx.cached_item_count > 0 {
        let ratio = changed as f64 / ctx.cached_item_count as f64;
        if ratio > 0.30 {
            return true;
        }
    }

    if complexity_score(delta) > 5 {
        return true;
    }

    if ctx.dependency_cascade_depth > 3 {
        return true;
    }

    false
}

/// A synthetic measure of how much a delta touches: each changed item
/// counts for one point, and touching both line items and modifiers in
/// the same delta counts for an extra point since it forces re-grouping.
fn complexity_score(delta: &Delta) -> usize {
    let mut score = delta.changed_line_item_ids.len() + delta.changed_modifier_ids.len();
    if !delta.changed_line_item_ids.is_empty() && !delta.changed_modifier_ids.is_empty() {
        score += 1;
    }
    score
}

/// Apply a `MODIFIER_ONLY` or `LINE_ITEM` delta to a cached frozen input by
/// discarding entries whose id is listed as changed; the caller re-fetches
/// and re-freezes just those ids and merges them back in.
pub fn changed_ids(delta: &Delta) -> (&[String], &[String]) {
    (&delta.changed_line_item_ids, &delta.changed_modifier_ids)
}

/// True if `cached` already reflects every id named by `delta` — used by
/// the caller after a patch to decide whether a second round is needed.
pub fn patch_is_complete(cached: &FrozenInput, delta: &Delta) -> bool {
    let cached_line_ids: std::collections::HashSet<&str> =
        cached.line_items.iter().map(|li| li.id.as_str()).collect();
    let cached_modifier_ids: std::collections::HashSet<&str> =
        cached.modifiers.iter().map(|m| m.id.as_str()).collect();
    delta.changed_line_item_ids.iter().all(|id| cached_line_ids.contains(id.as_str()))
        && delta.changed_modifier_ids.iter().all(|id| cached_modifier_ids.contains(id.as_str()))
}

/// Apply a `MODIFIER_ONLY` or `LINE_ITEM` delta onto a cached frozen input:
/// re-normalise and re-freeze only the ids named as changed, splice them
/// into the cached arrays, and keep everything else (dependencies, compiled
/// rules) as-is — `requires_full_rebuild` already guarantees those did not
/// change for a delta this function is allowed to be called with.
pub fn apply_patch(cached: &FrozenInput, request: &CalculateRequest, delta: &Delta) -> CalcResult<FrozenInput> {
    let (changed_line_item_ids, changed_modifier_ids) = changed_ids(delta);
    let changed_line_ids: HashSet<&str> = changed_line_item_ids.iter().map(String::as_str).collect();
    let changed_modifier_ids: HashSet<&str> = changed_modifier_ids.iter().map(String::as_str).collect();

    let raw_changed_line_items = request
        .line_items
        .iter()
        .filter(|li| changed_line_ids.contains(li.id.as_str()))
        .cloned()
        .collect();
    let raw_changed_modifiers = request
        .modifiers
        .iter()
        .filter(|m| changed_modifier_ids.contains(m.id.as_str()))
        .cloned()
        .collect();

    let (normalized_line_items, normalized_modifiers, _) =
        normalize::normalize(raw_changed_line_items, raw_changed_modifiers, vec![])?;

    let mut line_items: Vec<_> = cached
        .line_items
        .iter()
        .filter(|li| !changed_line_ids.contains(li.id.as_str()))
        .cloned()
        .collect();
    for li in normalized_line_items {
        line_items.push(freeze::freeze_line_item(li)?);
    }
    line_items.sort_by(|a, b| a.id.cmp(&b.id));

    let mut modifiers: Vec<_> = cached
        .modifiers
        .iter()
        .filter(|m| !changed_modifier_ids.contains(m.id.as_str()))
        .cloned()
        .collect();
    for m in normalized_modifiers {
        modifiers.push(freeze::freeze_modifier(m)?);
    }
    modifiers.sort_by(|a, b| a.chain_priority.cmp(&b.chain_priority).then_with(|| a.id.cmp(&b.id)));

    Ok(FrozenInput {
        proposal_id: cached.proposal_id.clone(),
        tenant: cached.tenant.clone(),
        schema_version: cached.schema_version.clone(),
        line_items,
        modifiers,
        dependencies: cached.dependencies.clone(),
        compiled_rules: cached.compiled_rules.clone(),
        config: request.config.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_ctx() -> DeltaContext {
        DeltaContext {
            cached_schema_version: "v1".to_string(),
            cache_age: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(3600),
            cached_item_count: 100,
            dependency_cascade_depth: 0,
            recent_failed_attempts: 0,
        }
    }

    #[test]
    fn schema_mismatch_forces_rebuild() {
        let ctx = base_ctx();
        assert!(requires_full_rebuild("v2", None, &ctx));
    }

    #[test]
    fn stale_cache_forces_rebuild() {
        let mut ctx = base_ctx();
        ctx.cache_age = Duration::from_secs(4000);
        let delta = Delta {
            delta_type: DeltaType::ModifierOnly,
            changed_line_item_ids: vec![],
            changed_modifier_ids: vec!["m1".to_string()],
            dependencies_changed: false,
            rules_changed: false,
        };
        assert!(requires_full_rebuild("v1", Some(&delta), &ctx));
    }

    #[test]
    fn small_modifier_only_delta_does_not_force_rebuild() {
        let ctx = base_ctx();
        let delta = Delta {
            delta_type: DeltaType::ModifierOnly,
            changed_line_item_ids: vec![],
            changed_modifier_ids: vec!["m1".to_string()],
            dependencies_changed: false,
            rules_changed: false,
        };
        assert!(!requires_full_rebuild("v1", Some(&delta), &ctx));
    }

    #[test]
    fn dependency_changes_force_rebuild() {
        let ctx = base_ctx();
        let delta = Delta {
            delta_type: DeltaType::ModifierOnly,
            changed_line_item_ids: vec![],
            changed_modifier_ids: vec!["m1".to_string()],
            dependencies_changed: true,
            rules_changed: false,
        };
        assert!(requires_full_rebuild("v1", Some(&delta), &ctx));
    }

    #[test]
    fn over_30_percent_changed_forces_rebuild() {
        let ctx = base_ctx();
        let changed: Vec<String> = (0..40).map(|i| format!("m{i}")).collect();
        let delta = Delta {
            delta_type: DeltaType::ModifierOnly,
            changed_line_item_ids: vec![],
            changed_modifier_ids: changed,
            dependencies_changed: false,
            rules_changed: false,
        };
        assert!(requires_full_rebuild("v1", Some(&delta), &ctx));
    }
}
