//! Builds the deep-immutable [`FrozenInput`] the pure stage consumes.
//!
//! Rust gives us immutability for free once the value is owned and never
//! exposed as `&mut`: freezing here just means finishing construction and
//! handing back a plain owned value that nothing downstream can mutate
//! through, not a runtime deep-freeze pass.

use crate::error::{CalcError, CalcResult};
use crate::types::*;
use common_money::parse_decimal;
use common_rules::{compile, RuleNode};
use std::collections::BTreeMap;

pub fn freeze(
    proposal_id: String,
    tenant: String,
    schema_version: String,
    line_items: Vec<LineItem>,
    modifiers: Vec<Modifier>,
    dependencies: Vec<Dependency>,
    rules: Vec<Rule>,
    config: TaxConfig,
) -> CalcResult<FrozenInput> {
    let frozen_line_items = line_items
        .into_iter()
        .map(freeze_line_item)
        .collect::<CalcResult<Vec<_>>>()?;

    let frozen_modifiers = modifiers
        .into_iter()
        .map(freeze_modifier)
        .collect::<CalcResult<Vec<_>>>()?;

    let mut compiled_rules: BTreeMap<ModifierId, RuleNode> = BTreeMap::new();
    for rule in rules {
        compile(&rule.expression).map_err(CalcError::from)?;
        compiled_rules.insert(rule.modifier_id, rule.expression);
    }

    Ok(FrozenInput {
        proposal_id,
        tenant,
        schema_version,
        line_items: frozen_line_items,
        modifiers: frozen_modifiers,
        dependencies,
        compiled_rules,
        config,
    })
}

fn parse_money(raw: &str, field: &str, owner_id: &str) -> CalcResult<bigdecimal::BigDecimal> {
    parse_decimal(raw).map_err(|e| CalcError::InvalidInput(vec![format!("{field} on {owner_id}: {e}")]))
}

/// Freeze a single normalised line item. Exposed so a delta patch can
/// re-freeze just the changed ids without rebuilding the whole input.
pub fn freeze_line_item(li: LineItem) -> CalcResult<FrozenLineItem> {
    Ok(FrozenLineItem {
        unit_price: parse_money(&li.unit_price, "unitPrice", &li.id)?,
        cost: parse_money(&li.cost, "cost", &li.id)?,
        id: li.id,
        quantity: li.quantity,
        tax_setting: li.tax_setting,
        use_tax_eligible: li.use_tax_eligible,
        vendor_tax_collected: li.vendor_tax_collected,
    })
}

/// Freeze a single normalised modifier. Exposed so a delta patch can
/// re-freeze just the changed ids without rebuilding the whole input.
pub fn freeze_modifier(m: Modifier) -> CalcResult<FrozenModifier> {
    let cost_percentage = m
        .cost_percentage
        .as_deref()
        .map(|v| parse_money(v, "costPercentage", &m.id))
        .transpose()?;
    Ok(FrozenModifier {
        value: parse_money(&m.value, "value", &m.id)?,
        id: m.id.clone(),
        kind: m.kind,
        tax_setting: m.tax_setting,
        category: m.category,
        affects_quantity: m.affects_quantity,
        cost_percentage,
        display_mode: m.display_mode,
        application_type: m.application_type.unwrap_or(ApplicationType::PreTax),
        product_id: m.product_id,
        chain_priority: m.chain_priority.unwrap_or(999),
        line_item_id: m.line_item_id,
        missing_cost_strategy: m.missing_cost_strategy.unwrap_or(MissingCostStrategy::Skip),
        created_at: m.created_at.unwrap_or_default(),
    })
}
