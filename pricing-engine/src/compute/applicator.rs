use crate::error::{CalcError, CalcResult};
use crate::types::*;
use bigdecimal::BigDecimal;
use common_money::round_q7;

/// Apply one group to the running total, returning the group's
/// [`Adjustment`] record and the signed delta to add to the running total.
pub fn apply_group(
    input: &FrozenInput,
    group: &Group,
    running_total_q7: &BigDecimal,
    taxable_subtotal: &BigDecimal,
    non_taxable_subtotal: &BigDecimal,
) -> CalcResult<(Adjustment, BigDecimal)> {
    let base = match group.key.resolved_tax_setting {
        ResolvedTaxSetting::Taxable => taxable_subtotal,
        ResolvedTaxSetting::NonTaxable => non_taxable_subtotal,
    };
    let members: Vec<&FrozenModifier> = input
        .modifiers
        .iter()
        .filter(|m| group.modifier_ids.contains(&m.id))
        .collect();
    let lines_in_scope: Vec<&FrozenLineItem> = input
        .line_items
        .iter()
        .filter(|li| match group.key.resolved_tax_setting {
            ResolvedTaxSetting::Taxable => li.tax_setting == LineTaxSetting::Taxable,
            ResolvedTaxSetting::NonTaxable => li.tax_setting == LineTaxSetting::NonTaxable,
        })
        .collect();

    match group.key.kind {
        ModifierKind::Percentage => apply_percentage(group, base, &lines_in_scope),
        ModifierKind::Fixed | ModifierKind::Quantity => apply_fixed(input, group, &lines_in_scope),
        ModifierKind::Margin => apply_margin(&members, &lines_in_scope),
        ModifierKind::CostAdjustment => apply_cost_adjustment(group, &lines_in_scope),
    }
    .map(|(adjustment_q7, allocations)| {
        let adjustment = Adjustment {
            group_key: group.key.clone(),
            modifier_ids: group.modifier_ids.clone(),
            combined_value_q7: group.combined_value.clone(),
            amount_q7: adjustment_q7.clone(),
            amount_q2: common_money::round_q2(&adjustment_q7),
            per_line_allocations: allocations,
        };
        let _ = running_total_q7;
        (adjustment, adjustment_q7)
    })
}

/// `percentage`: adjustment = round7(base * rate/100), allocated
/// proportionally to each in-scope line's share of `base`.
fn apply_percentage(
    group: &Group,
    base: &BigDecimal,
    lines: &[&FrozenLineItem],
) -> CalcResult<(BigDecimal, Vec<LineAllocation>)> {
    let rate = &group.combined_value / BigDecimal::from(100);
    let amount = round_q7(&(base * &rate));
    let allocations = allocate_proportionally(&amount, base, lines);
    Ok((amount, allocations))
}

/// `fixed` (and `quantity`, its per-unit sibling): the combined value is the
/// group's flat adjustment; allocate proportionally by each line's share of
/// `base`, with the residual assigned to the last allocation so allocations
/// sum exactly to the adjustment.
fn apply_fixed(
    _input: &FrozenInput,
    group: &Group,
    lines: &[&FrozenLineItem],
) -> CalcResult<(BigDecimal, Vec<LineAllocation>)> {
    let amount = round_q7(&group.combined_value);
    let base: BigDecimal = lines
        .iter()
        .map(|li| round_q7(&(&li.unit_price * BigDecimal::from(li.quantity))))
        .fold(BigDecimal::from(0), |acc, v| acc + v);
    let allocations = allocate_proportionally(&amount, &base, lines);
    Ok((amount, allocations))
}

/// `cost_adjustment`: adjustment computed against the cost basis rather
/// than the price basis, allocated proportionally by each line's share of
/// total cost in scope.
fn apply_cost_adjustment(group: &Group, lines: &[&FrozenLineItem]) -> CalcResult<(BigDecimal, Vec<LineAllocation>)> {
    let cost_base: BigDecimal = lines
        .iter()
        .map(|li| round_q7(&(&li.cost * BigDecimal::from(li.quantity))))
        .fold(BigDecimal::from(0), |acc, v| acc + v);
    let rate = &group.combined_value / BigDecimal::from(100);
    let amount = round_q7(&(&cost_base * &rate));
    let allocations = allocate_cost_proportionally(&amount, &cost_base, lines);
    Ok((amount, allocations))
}

/// `margin`: drive each line's unit price up to `cost / (1 - m)`.
fn apply_margin(
    members: &[&FrozenModifier],
    lines: &[&FrozenLineItem],
) -> CalcResult<(BigDecimal, Vec<LineAllocation>)> {
    let mut total = BigDecimal::from(0);
    let mut allocations = Vec::new();

    for modifier in members {
        let m = &modifier.value / BigDecimal::from(100);
        if m < BigDecimal::from(0) || m >= BigDecimal::from(1) {
            return Err(CalcError::InvalidMargin {
                modifier_id: modifier.id.clone(),
                reason: format!("target margin must be in [0, 1), got {m}"),
            });
        }
        let scoped_lines: Vec<&&FrozenLineItem> = match &modifier.line_item_id {
            Some(id) => lines.iter().filter(|li| &li.id == id).collect(),
            None => lines.iter().collect(),
        };
        for line in scoped_lines {
            if line.cost == BigDecimal::from(0) {
                match modifier.missing_cost_strategy {
                    MissingCostStrategy::Skip => continue,
                    MissingCostStrategy::Fail => {
                        return Err(CalcError::InvalidMargin {
                            modifier_id: modifier.id.clone(),
                            reason: format!("missing cost on line {}", line.id),
                        })
                    }
                    MissingCostStrategy::UseDefault => {}
                }
            }
            let effective_cost = if line.cost == BigDecimal::from(0)
                && modifier.missing_cost_strategy == MissingCostStrategy::UseDefault
            {
                modifier
                    .cost_percentage
                    .clone()
                    .map(|pct| &line.unit_price * (&pct / BigDecimal::from(100)))
                    .unwrap_or_else(|| line.cost.clone())
            } else {
                line.cost.clone()
            };
            let new_price = round_q7(&(&effective_cost / (BigDecimal::from(1) - &m)));
            let delta = round_q7(&((&new_price - &line.unit_price) * BigDecimal::from(line.quantity)));
            total += &delta;
            allocations.push(LineAllocation {
                line_item_id: line.id.clone(),
                amount_q7: delta,
            });
        }
    }

    Ok((round_q7(&total), allocations))
}

/// Allocate `amount` across `lines` proportionally to each line's share of
/// `base` (its price extension), rounding each share to Q7 and assigning
/// the residual to the last allocation so the sum is exact.
fn allocate_proportionally(amount: &BigDecimal, base: &BigDecimal, lines: &[&FrozenLineItem]) -> Vec<LineAllocation> {
    if lines.is_empty() || base == &BigDecimal::from(0) {
        return Vec::new();
    }
    let mut allocations = Vec::with_capacity(lines.len());
    let mut running_sum = BigDecimal::from(0);
    for (i, line) in lines.iter().enumerate() {
        let line_extension = round_q7(&(&line.unit_price * BigDecimal::from(line.quantity)));
        let share = if i + 1 == lines.len() {
            amount - &running_sum
        } else {
            round_q7(&(amount * (&line_extension / base)))
        };
        running_sum += &share;
        allocations.push(LineAllocation {
            line_item_id: line.id.clone(),
            amount_q7: share,
        });
    }
    allocations
}

fn allocate_cost_proportionally(amount: &BigDecimal, cost_base: &BigDecimal, lines: &[&FrozenLineItem]) -> Vec<LineAllocation> {
    if lines.is_empty() || cost_base == &BigDecimal::from(0) {
        return Vec::new();
    }
    let mut allocations = Vec::with_capacity(lines.len());
    let mut running_sum = BigDecimal::from(0);
    for (i, line) in lines.iter().enumerate() {
        let line_cost = round_q7(&(&line.cost * BigDecimal::from(line.quantity)));
        let share = if i + 1 == lines.len() {
            amount - &running_sum
        } else {
            round_q7(&(amount * (&line_cost / cost_base)))
        };
        running_sum += &share;
        allocations.push(LineAllocation {
            line_item_id: line.id.clone(),
            amount_q7: share,
        });
    }
    allocations
}
