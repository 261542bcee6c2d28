//! End-to-end scenarios for the pure compute stage, taken straight off
//! hand-built frozen inputs — no database, no preparation stage.

use bigdecimal::BigDecimal;
use pricing_engine::compute::compute;
use pricing_engine::types::*;
use std::collections::BTreeMap;
use std::str::FromStr;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn line(id: &str, unit_price: &str, quantity: u32, tax_setting: LineTaxSetting) -> FrozenLineItem {
    FrozenLineItem {
        id: id.to_string(),
        unit_price: dec(unit_price),
        quantity,
        cost: dec("0.00"),
        tax_setting,
        use_tax_eligible: false,
        vendor_tax_collected: false,
    }
}

fn base_config(mode: TaxMode, retail_rate: Option<&str>, use_tax_rate: Option<&str>) -> TaxConfig {
    TaxConfig {
        mode,
        retail_rate: retail_rate.map(|s| s.to_string()),
        use_tax_rate: use_tax_rate.map(|s| s.to_string()),
        jurisdictions: vec![],
        schema_version: "v1".to_string(),
    }
}

fn frozen(line_items: Vec<FrozenLineItem>, modifiers: Vec<FrozenModifier>, dependencies: Vec<Dependency>, config: TaxConfig) -> FrozenInput {
    FrozenInput {
        proposal_id: "p1".to_string(),
        tenant: "t1".to_string(),
        schema_version: "v1".to_string(),
        line_items,
        modifiers,
        dependencies,
        compiled_rules: BTreeMap::new(),
        config,
    }
}

fn modifier(id: &str, kind: ModifierKind, value: &str, application_type: ApplicationType) -> FrozenModifier {
    FrozenModifier {
        id: id.to_string(),
        kind,
        value: dec(value),
        tax_setting: ModifierTaxSetting::Inherit,
        category: ModifierCategory::Discount,
        affects_quantity: false,
        cost_percentage: None,
        display_mode: None,
        application_type,
        product_id: None,
        chain_priority: 999,
        line_item_id: None,
        missing_cost_strategy: MissingCostStrategy::Skip,
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

#[test]
fn scenario_1_simple_taxable_sale() {
    let input = frozen(
        vec![line("a", "100.00", 2, LineTaxSetting::Taxable)],
        vec![],
        vec![],
        base_config(TaxMode::Retail, Some("0.10"), None),
    );
    let result = compute(&input).unwrap();
    assert_eq!(result.subtotal_q2.to_string(), "200.00");
    assert_eq!(result.retail_tax_q2.to_string(), "20.00");
    assert_eq!(result.customer_grand_total_q2.to_string(), "220.00");
}

#[test]
fn scenario_2_percentage_discount() {
    let mut discount = modifier("d", ModifierKind::Percentage, "-15", ApplicationType::PreTax);
    discount.category = ModifierCategory::Discount;
    let input = frozen(
        vec![line("a", "100.00", 2, LineTaxSetting::Taxable)],
        vec![discount],
        vec![],
        base_config(TaxMode::Retail, Some("0.10"), None),
    );
    let result = compute(&input).unwrap();
    assert_eq!(result.modifier_total_q2.to_string(), "-30.00");
    assert_eq!(result.retail_tax_q2.to_string(), "17.00");
    assert_eq!(result.customer_grand_total_q2.to_string(), "187.00");
}

#[test]
fn scenario_3_mixed_tax_setting() {
    let discount = modifier("d", ModifierKind::Percentage, "-10", ApplicationType::PreTax);
    let mut fee = modifier("f", ModifierKind::Fixed, "25.00", ApplicationType::PostTax);
    fee.category = ModifierCategory::Fee;
    let input = frozen(
        vec![
            line("a", "150.00", 2, LineTaxSetting::Taxable),
            line("b", "75.00", 3, LineTaxSetting::NonTaxable),
        ],
        vec![discount, fee],
        vec![],
        base_config(TaxMode::Retail, Some("0.0875"), None),
    );
    let result = compute(&input).unwrap();
    assert_eq!(result.subtotal_q2.to_string(), "525.00");
    // The discount's resolved tax setting defaults to taxable (no lineItemId
    // to inherit from), so its base is the taxable partition (300.00), not
    // the full subtotal — this is also why the taxable base after the
    // discount is 270.00, matching the retail tax below.
    assert_eq!(result.taxable_base_q7.to_string(), "270.0000000");
    assert_eq!(result.retail_tax_q2.to_string(), "23.63");
    assert_eq!(result.modifier_total_q2.to_string(), "-5.00");
    assert_eq!(result.customer_grand_total_q2.to_string(), "543.63");
}

#[test]
fn scenario_4_margin_modifier() {
    let mut li = line("a", "100.00", 1, LineTaxSetting::Taxable);
    li.cost = dec("60.00");
    let margin = modifier("m", ModifierKind::Margin, "50", ApplicationType::PreTax);
    let input = frozen(vec![li], vec![margin], vec![], base_config(TaxMode::Retail, Some("0.00"), None));
    let result = compute(&input).unwrap();
    assert_eq!(result.adjustments.len(), 1);
    assert_eq!(result.adjustments[0].amount_q2.to_string(), "20.00");
    assert_eq!(result.customer_grand_total_q2.to_string(), "120.00");
}

#[test]
fn scenario_5_dependency_exclusion() {
    let m1 = modifier("m1", ModifierKind::Percentage, "5", ApplicationType::PreTax);
    let m2 = modifier("m2", ModifierKind::Percentage, "5", ApplicationType::PreTax);
    let dependencies = vec![Dependency {
        modifier_id: "m2".to_string(),
        depends_on: "m1".to_string(),
        dependency_type: DependencyType::Excludes,
    }];
    let input = frozen(
        vec![line("a", "100.00", 1, LineTaxSetting::Taxable)],
        vec![m1, m2],
        dependencies,
        base_config(TaxMode::Retail, Some("0.00"), None),
    );
    let result = compute(&input).unwrap();
    assert_eq!(result.rejected.len(), 1);
    assert_eq!(result.rejected[0].modifier_id, "m2");
    assert_eq!(result.rejected[0].reason, "excluded_by:m1");
}

#[test]
fn scenario_6_use_tax_mode() {
    let mut li = line("a", "0.00", 1, LineTaxSetting::NonTaxable);
    li.cost = dec("1000.00");
    li.use_tax_eligible = true;
    li.vendor_tax_collected = false;
    let input = frozen(vec![li], vec![], vec![], base_config(TaxMode::UseTax, None, Some("0.08")));
    let result = compute(&input).unwrap();
    assert_eq!(result.use_tax_q2.as_ref().unwrap().to_string(), "80.00");
    assert_eq!(result.customer_grand_total_q2.to_string(), "0.00");
    assert_eq!(result.internal_grand_total_q2.as_ref().unwrap().to_string(), "80.00");
}
