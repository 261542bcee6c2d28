//! The pure compute stage: `Compute(frozenInput) -> Result`. No I/O, no
//! clocks, no randomness, no mutation of the input. Same bytes in, same
//! bytes out.

mod applicator;
mod grouper;
mod tax;
mod validator;

use crate::error::{CalcError, CalcResult};
use crate::types::*;
use bigdecimal::BigDecimal;
use common_money::{round_q2, round_q7};
use common_rules::{compile, evaluate, CompiledRule};
use std::collections::{HashMap, HashSet};

pub use grouper::group_key_for;

/// Run the pure pipeline end to end.
pub fn compute(input: &FrozenInput) -> CalcResult<CalcResultValue> {
    validator::validate(input)?;

    let subtotal_q7 = base_subtotal(input);
    let (mut taxable_subtotal, mut non_taxable_subtotal) = partition_subtotal(input);

    let resolved = resolve_modifier_tax_settings(input);
    let surviving = resolve_dependencies(input)?;
    let filtered = filter_by_rules(input, &surviving, &subtotal_q7)?;

    let groups = grouper::group_modifiers(input, &filtered, &resolved);
    validator::validate_group_count(groups.len())?;
    let ordered_groups = grouper::order_groups(input, &groups);

    let mut running = subtotal_q7.clone();
    let mut adjustments: Vec<Adjustment> = Vec::new();
    let mut taxable_adjustments_q7 = BigDecimal::from(0);
    let mut non_taxable_adjustments_q7 = BigDecimal::from(0);

    for group in ordered_groups.iter().filter(|g| g.key.application_type != ApplicationType::PostTax) {
        let (adjustment, delta) = applicator::apply_group(input, group, &running, &taxable_subtotal, &non_taxable_subtotal)?;
        running += &delta;
        match group.key.resolved_tax_setting {
            ResolvedTaxSetting::Taxable => taxable_adjustments_q7 += &delta,
            ResolvedTaxSetting::NonTaxable => non_taxable_adjustments_q7 += &delta,
        }
        adjustments.push(adjustment);
    }

    taxable_subtotal += &taxable_adjustments_q7;
    non_taxable_subtotal += &non_taxable_adjustments_q7;

    let tax_result = tax::compute_tax(input, &taxable_subtotal)?;

    running += &tax_result.retail_tax_q7;

    for group in ordered_groups.iter().filter(|g| g.key.application_type == ApplicationType::PostTax) {
        let (adjustment, delta) = applicator::apply_group(input, group, &running, &taxable_subtotal, &non_taxable_subtotal)?;
        running += &delta;
        adjustments.push(adjustment);
    }

    let customer_grand_total_q2 = round_q2(&running);
    // useTax/internalGrandTotal are emitted whenever a use tax was computed
    // at all (USE_TAX or MIXED), not only in MIXED.
    let (use_tax_q2, internal_grand_total_q2) = match &tax_result.use_tax_q7 {
        Some(use_tax) => (Some(round_q2(use_tax)), Some(round_q2(&(&running + use_tax)))),
        None => (None, None),
    };

    let modifier_total_q7 = round_q7(&(&running - &subtotal_q7 - &tax_result.retail_tax_q7));
    let modifier_total_q2 = round_q2(&modifier_total_q7);

    let rejected = collect_rejected(&filtered);

    let mut result = CalcResultValue {
        subtotal_q7: round_q7(&subtotal_q7),
        subtotal_q2: round_q2(&subtotal_q7),
        modifier_total_q7,
        modifier_total_q2,
        retail_tax_q7: round_q7(&tax_result.retail_tax_q7),
        retail_tax_q2: round_q2(&tax_result.retail_tax_q7),
        customer_grand_total_q7: round_q7(&running),
        customer_grand_total_q2,
        use_tax_q7: tax_result.use_tax_q7.clone(),
        use_tax_q2,
        internal_grand_total_q2,
        taxable_base_q7: round_q7(&taxable_subtotal),
        non_taxable_base_q7: round_q7(&non_taxable_subtotal),
        sub_taxes: tax_result.sub_taxes,
        adjustments,
        rejected,
        checksum: String::new(),
    };

    let checksum = common_canonical::fingerprint_value(&result)?;
    result.checksum = checksum;
    Ok(result)
}

fn base_subtotal(input: &FrozenInput) -> BigDecimal {
    input
        .line_items
        .iter()
        .map(|li| round_q7(&(&li.unit_price * BigDecimal::from(li.quantity))))
        .fold(BigDecimal::from(0), |acc, v| acc + v)
}

fn partition_subtotal(input: &FrozenInput) -> (BigDecimal, BigDecimal) {
    let mut taxable = BigDecimal::from(0);
    let mut non_taxable = BigDecimal::from(0);
    for li in &input.line_items {
        let line_total = round_q7(&(&li.unit_price * BigDecimal::from(li.quantity)));
        match li.tax_setting {
            LineTaxSetting::Taxable => taxable += line_total,
            LineTaxSetting::NonTaxable => non_taxable += line_total,
        }
    }
    (taxable, non_taxable)
}

/// Resolve each modifier's effective tax setting, following `inherit` back
/// to the referenced line item (defaulting to taxable when there is none).
fn resolve_modifier_tax_settings(input: &FrozenInput) -> HashMap<ModifierId, ResolvedTaxSetting> {
    let by_line: HashMap<&str, LineTaxSetting> =
        input.line_items.iter().map(|li| (li.id.as_str(), li.tax_setting)).collect();
    input
        .modifiers
        .iter()
        .map(|m| {
            let resolved = match m.tax_setting {
                ModifierTaxSetting::Taxable => ResolvedTaxSetting::Taxable,
                ModifierTaxSetting::NonTaxable => ResolvedTaxSetting::NonTaxable,
                ModifierTaxSetting::Inherit => match m.line_item_id.as_deref().and_then(|id| by_line.get(id)) {
                    Some(LineTaxSetting::Taxable) => ResolvedTaxSetting::Taxable,
                    Some(LineTaxSetting::NonTaxable) => ResolvedTaxSetting::NonTaxable,
                    None => ResolvedTaxSetting::Taxable,
                },
            };
            (m.id.clone(), resolved)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    MissingRequirement,
    ExcludedBy(ModifierId),
    RuleFailed,
}

/// Build the dependency DAG, detect cycles, topologically sort (ties by
/// `chainPriority` then `id`), drop modifiers with an absent/dropped
/// REQUIRES target, and resolve EXCLUDES so only the topologically-first
/// accepted modifier of a pair survives.
fn resolve_dependencies(input: &FrozenInput) -> CalcResult<HashMap<ModifierId, Disposition>> {
    let ids: HashSet<&str> = input.modifiers.iter().map(|m| m.id.as_str()).collect();

    // Kahn's algorithm over REQUIRES+EXCLUDES edges (modifierId depends on dependsOn).
    let mut requires: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut excludes: HashMap<&str, Vec<&str>> = HashMap::new();
    for dep in &input.dependencies {
        match dep.dependency_type {
            DependencyType::Requires => requires.entry(&dep.modifier_id).or_default().push(&dep.depends_on),
            DependencyType::Excludes => excludes.entry(&dep.modifier_id).or_default().push(&dep.depends_on),
        }
    }

    let order = topo_sort(input, &requires, &excludes)?;
    check_dependency_depth(input, &requires)?;

    let mut disposition: HashMap<ModifierId, Disposition> = HashMap::new();
    let mut accepted: HashSet<&str> = HashSet::new();

    for id in &order {
        let reqs_satisfied = requires
            .get(id)
            .map(|deps| deps.iter().all(|d| ids.contains(d) && accepted.contains(d)))
            .unwrap_or(true);
        if !reqs_satisfied {
            tracing::debug!(modifier_id = %id, "modifier excluded: required dependency missing or unaccepted");
            disposition.insert(id.to_string(), Disposition::MissingRequirement);
            continue;
        }
        let excluded_by = excludes
            .get(id)
            .and_then(|deps| deps.iter().find(|d| accepted.contains(*d)).copied());
        if let Some(winner) = excluded_by {
            tracing::debug!(modifier_id = %id, excluded_by = %winner, "modifier excluded: mutually exclusive with an already-accepted modifier");
            disposition.insert(id.to_string(), Disposition::ExcludedBy(winner.to_string()));
            continue;
        }
        accepted.insert(id);
        disposition.insert(id.to_string(), Disposition::Accepted);
    }

    Ok(disposition)
}

/// Longest REQUIRES chain ending at each modifier must not exceed
/// [`validator::MAX_DEPENDENCY_DEPTH`].
fn check_dependency_depth(input: &FrozenInput, requires: &HashMap<&str, Vec<&str>>) -> CalcResult<()> {
    fn depth_of<'a>(id: &'a str, requires: &HashMap<&'a str, Vec<&'a str>>, memo: &mut HashMap<&'a str, usize>, stack: &mut HashSet<&'a str>) -> usize {
        if let Some(&d) = memo.get(id) {
            return d;
        }
        if !stack.insert(id) {
            return 0; // cycle; reported separately by topo_sort
        }
        let depth = requires
            .get(id)
            .map(|deps| deps.iter().map(|d| depth_of(d, requires, memo, stack)).max().unwrap_or(0) + 1)
            .unwrap_or(0);
        stack.remove(id);
        memo.insert(id, depth);
        depth
    }

    let mut memo = HashMap::new();
    for m in &input.modifiers {
        let mut stack = HashSet::new();
        let depth = depth_of(m.id.as_str(), requires, &mut memo, &mut stack);
        if depth > validator::MAX_DEPENDENCY_DEPTH {
            return Err(CalcError::ResourceLimit(format!(
                "dependency chain depth {depth} exceeds {}",
                validator::MAX_DEPENDENCY_DEPTH
            )));
        }
    }
    Ok(())
}

fn topo_sort<'a>(
    input: &'a FrozenInput,
    requires: &HashMap<&'a str, Vec<&'a str>>,
    excludes: &HashMap<&'a str, Vec<&'a str>>,
) -> CalcResult<Vec<&'a str>> {
    let mut in_degree: HashMap<&str, usize> = input.modifiers.iter().map(|m| (m.id.as_str(), 0)).collect();
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    let ids: HashSet<&str> = input.modifiers.iter().map(|m| m.id.as_str()).collect();

    for (dependent, deps) in requires.iter().chain(excludes.iter()) {
        for dep in deps {
            if !ids.contains(dep) {
                continue;
            }
            edges.entry(dep).or_default().push(dependent);
            *in_degree.entry(dependent).or_insert(0) += 1;
        }
    }

    let priority_of = |id: &str| -> (i64, &str) {
        let m = input.modifiers.iter().find(|m| m.id == id).expect("id came from input");
        (m.chain_priority, m.id.as_str())
    };

    let mut ready: std::collections::BinaryHeap<std::cmp::Reverse<(i64, String)>> = input
        .modifiers
        .iter()
        .filter(|m| in_degree.get(m.id.as_str()).copied().unwrap_or(0) == 0)
        .map(|m| std::cmp::Reverse((m.chain_priority, m.id.clone())))
        .collect();

    let mut order = Vec::with_capacity(input.modifiers.len());
    let mut visited = 0usize;

    while let Some(std::cmp::Reverse((_, id))) = ready.pop() {
        visited += 1;
        let id_ref = input.modifiers.iter().find(|m| m.id == id).unwrap().id.as_str();
        order.push(id_ref);
        if let Some(dependents) = edges.get(id_ref) {
            for &dependent in dependents {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    let (cp, did) = priority_of(dependent);
                    ready.push(std::cmp::Reverse((cp, did.to_string())));
                }
            }
        }
    }

    if visited != input.modifiers.len() {
        return Err(CalcError::InvalidInput(vec!["modifier dependency graph contains a cycle".to_string()]));
    }

    Ok(order)
}

fn filter_by_rules(
    input: &FrozenInput,
    dispositions: &HashMap<ModifierId, Disposition>,
    subtotal_q7: &BigDecimal,
) -> CalcResult<HashMap<ModifierId, Disposition>> {
    let mut out = dispositions.clone();
    let context = evaluation_context(input, subtotal_q7);

    for modifier in &input.modifiers {
        if out.get(&modifier.id) != Some(&Disposition::Accepted) {
            continue;
        }
        let Some(rule_node) = input.compiled_rules.get(&modifier.id) else {
            continue;
        };
        let compiled: CompiledRule = compile(rule_node).map_err(|e| CalcError::RuleCompileError(e.to_string()))?;
        match evaluate(&compiled, &context) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(modifier_id = %modifier.id, "modifier rejected: rule evaluated to false");
                out.insert(modifier.id.clone(), Disposition::RuleFailed);
            }
            Err(e) => {
                tracing::warn!(modifier_id = %modifier.id, error = %e, "modifier rejected: rule evaluation error");
                out.insert(modifier.id.clone(), Disposition::RuleFailed);
            }
        }
    }
    Ok(out)
}

fn evaluation_context(input: &FrozenInput, subtotal_q7: &BigDecimal) -> serde_json::Value {
    serde_json::json!({
        "proposal": { "id": input.proposal_id, "tenant": input.tenant },
        "computed": { "subtotal": subtotal_q7.to_string() },
        "running": { "subtotal": subtotal_q7.to_string() },
        "customer": {},
        "project": {},
        "evaluationContext": {},
    })
}

fn collect_rejected(filtered: &HashMap<ModifierId, Disposition>) -> Vec<RejectedModifier> {
    let mut rejected = Vec::new();
    for (id, disposition) in filtered {
        let reason = match disposition {
            Disposition::Accepted => continue,
            Disposition::MissingRequirement => "missing_requirement".to_string(),
            Disposition::ExcludedBy(winner) => format!("excluded_by:{winner}"),
            Disposition::RuleFailed => "rule_failed".to_string(),
        };
        rejected.push(RejectedModifier { modifier_id: id.clone(), reason });
    }
    rejected.sort_by(|a, b| a.modifier_id.cmp(&b.modifier_id));
    rejected
}
