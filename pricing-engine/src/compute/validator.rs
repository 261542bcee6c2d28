use crate::error::{CalcError, CalcResult};
use crate::types::FrozenInput;
use bigdecimal::BigDecimal;
use std::collections::HashSet;

pub const MAX_LINE_ITEMS: usize = 5000;
pub const MAX_MODIFIERS: usize = 1000;
pub const HARD_MAX_MODIFIERS: usize = 2000;
pub const MAX_DEPENDENCY_DEPTH: usize = 10;
pub const MAX_GROUPS: usize = 100;
pub const HARD_MAX_GROUPS: usize = 250;

/// Modeled per-item cost used only to estimate the wall budget below; the
/// pure stage has no clock of its own, so this has to stay a static
/// function of input size rather than an actual measurement.
const ESTIMATED_NS_PER_LINE_ITEM: u64 = 50_000;
const ESTIMATED_NS_PER_MODIFIER: u64 = 200_000;
const ESTIMATED_NS_PER_DEPENDENCY: u64 = 50_000;
const ESTIMATED_WALL_BUDGET_NS: u64 = 5_000_000_000;

fn estimated_wall_budget_ns(input: &FrozenInput) -> u64 {
    input.line_items.len() as u64 * ESTIMATED_NS_PER_LINE_ITEM
        + input.modifiers.len() as u64 * ESTIMATED_NS_PER_MODIFIER
        + input.dependencies.len() as u64 * ESTIMATED_NS_PER_DEPENDENCY
}

pub fn validate_group_count(count: usize) -> CalcResult<()> {
    if count > HARD_MAX_GROUPS {
        return Err(CalcError::ResourceLimit(format!("group count {count} exceeds hard ceiling")));
    }
    if count > MAX_GROUPS {
        return Err(CalcError::ResourceLimit(format!("group count {count} exceeds {MAX_GROUPS}")));
    }
    Ok(())
}

/// The validation floor run before the pure pipeline does any real work.
/// Ceilings above [`MAX_MODIFIERS`]/[`MAX_LINE_ITEMS`] are soft; the hard
/// ceilings abort unconditionally with `RESOURCE_LIMIT`.
pub fn validate(input: &FrozenInput) -> CalcResult<()> {
    if estimated_wall_budget_ns(input) > ESTIMATED_WALL_BUDGET_NS {
        return Err(CalcError::ResourceLimit("timeout".to_string()));
    }
    if input.modifiers.len() > HARD_MAX_MODIFIERS {
        return Err(CalcError::ResourceLimit(format!(
            "modifier count {} exceeds hard ceiling",
            input.modifiers.len()
        )));
    }
    if input.line_items.len() > MAX_LINE_ITEMS {
        return Err(CalcError::ResourceLimit(format!(
            "line item count {} exceeds {MAX_LINE_ITEMS}",
            input.line_items.len()
        )));
    }
    if input.modifiers.len() > MAX_MODIFIERS {
        return Err(CalcError::ResourceLimit(format!(
            "modifier count {} exceeds {MAX_MODIFIERS}",
            input.modifiers.len()
        )));
    }

    if input.schema_version.is_empty() {
        return Err(CalcError::InvalidInput(vec!["missing schemaVersion".to_string()]));
    }

    let mut violations = Vec::new();

    let mut seen_modifier_ids = HashSet::new();
    for m in &input.modifiers {
        if !seen_modifier_ids.insert(m.id.as_str()) {
            violations.push(format!("duplicate modifier id: {}", m.id));
        }
    }

    let mut seen_line_ids = HashSet::new();
    for li in &input.line_items {
        if !seen_line_ids.insert(li.id.as_str()) {
            violations.push(format!("duplicate line item id: {}", li.id));
        }
        if !li.unit_price.is_finite_value() {
            violations.push(format!("non-finite unitPrice on line {}", li.id));
        }
        if !li.cost.is_finite_value() {
            violations.push(format!("non-finite cost on line {}", li.id));
        }
    }

    for dep in &input.dependencies {
        if !seen_modifier_ids.contains(dep.modifier_id.as_str()) {
            violations.push(format!("dependency references unknown modifier: {}", dep.modifier_id));
        }
        if !seen_modifier_ids.contains(dep.depends_on.as_str()) {
            violations.push(format!("dependency references unknown target: {}", dep.depends_on));
        }
    }

    if !violations.is_empty() {
        return Err(CalcError::InvalidInput(violations));
    }

    Ok(())
}

trait FiniteCheck {
    fn is_finite_value(&self) -> bool;
}

impl FiniteCheck for BigDecimal {
    fn is_finite_value(&self) -> bool {
        // BigDecimal has no NaN/Infinity representation; any constructed
        // value is finite by construction. This exists so the validation
        // floor has a single call site if that ever changes.
        true
    }
}
