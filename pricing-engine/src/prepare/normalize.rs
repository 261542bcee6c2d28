//! Turns a raw, possibly sloppy request into the canonical shape the pure
//! stage expects: defaults filled, decimals expanded, order fixed.

use crate::error::{CalcError, CalcResult};
use crate::types::*;
use common_money::{parse_decimal, remove_negative_zero};
use std::collections::HashSet;

/// Apply the normalisation contract in place: sort, fill defaults, expand
/// decimal strings. Does not validate referential integrity — that is
/// [`super::super::compute::validator::validate`]'s job once the input is
/// frozen.
pub fn normalize(mut line_items: Vec<LineItem>, mut modifiers: Vec<Modifier>, mut dependencies: Vec<Dependency>) -> CalcResult<(Vec<LineItem>, Vec<Modifier>, Vec<Dependency>)> {
    line_items.sort_by(|a, b| a.id.cmp(&b.id));

    let mut seen = HashSet::new();
    for li in &line_items {
        if !seen.insert(li.id.as_str()) {
            return Err(CalcError::InvalidInput(vec![format!("duplicate line item id: {}", li.id)]));
        }
    }

    for li in line_items.iter_mut() {
        li.unit_price = expand_decimal(&li.unit_price)?;
        li.cost = expand_decimal(&li.cost)?;
    }

    let mut seen = HashSet::new();
    for m in &modifiers {
        if !seen.insert(m.id.as_str()) {
            return Err(CalcError::InvalidInput(vec![format!("duplicate modifier id: {}", m.id)]));
        }
    }

    for m in modifiers.iter_mut() {
        if m.chain_priority.is_none() {
            m.chain_priority = Some(999);
        }
        if m.application_type.is_none() {
            m.application_type = Some(ApplicationType::PreTax);
        }
        m.value = expand_decimal(&m.value)?;
        if let Some(pct) = &m.cost_percentage {
            m.cost_percentage = Some(expand_decimal(pct)?);
        }
    }

    modifiers.sort_by(|a, b| {
        a.chain_priority
            .unwrap_or(999)
            .cmp(&b.chain_priority.unwrap_or(999))
            .then_with(|| a.id.cmp(&b.id))
    });

    dependencies.sort_by(|a, b| a.depends_on.cmp(&b.depends_on).then_with(|| a.modifier_id.cmp(&b.modifier_id)));

    Ok((line_items, modifiers, dependencies))
}

/// Parse as an arbitrary-precision decimal, then re-render canonically —
/// this is where exponential form gets expanded and `-0` collapses to
/// `0`, and where non-finite input is rejected before it ever reaches a
/// `BigDecimal`.
fn expand_decimal(raw: &str) -> CalcResult<String> {
    let parsed = parse_decimal(raw).map_err(|e| CalcError::InvalidInput(vec![format!("{raw}: {e}")]))?;
    Ok(remove_negative_zero(&parsed).to_string())
}
