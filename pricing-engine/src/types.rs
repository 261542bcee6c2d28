//! The data model of the pricing pipeline (spec-facing entities: line
//! items, modifiers, dependencies, rules, tax configuration, and the
//! frozen input and result produced between stages).

use bigdecimal::BigDecimal;
use common_rules::RuleNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type LineItemId = String;
pub type ModifierId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LineTaxSetting {
    #[serde(rename = "TAXABLE")]
    Taxable,
    #[serde(rename = "NON_TAXABLE")]
    NonTaxable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub id: LineItemId,
    pub unit_price: String,
    pub quantity: u32,
    pub cost: String,
    pub tax_setting: LineTaxSetting,
    #[serde(default)]
    pub use_tax_eligible: bool,
    #[serde(default)]
    pub vendor_tax_collected: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModifierTaxSetting {
    Taxable,
    NonTaxable,
    Inherit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModifierKind {
    Percentage,
    Fixed,
    Margin,
    Quantity,
    CostAdjustment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    PreTax,
    Cost,
    PostTax,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModifierCategory {
    Discount,
    Rebate,
    Fee,
    Bonus,
    Adjustment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingCostStrategy {
    Skip,
    UseDefault,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Modifier {
    pub id: ModifierId,
    pub kind: ModifierKind,
    pub value: String,
    #[serde(default = "default_modifier_tax_setting")]
    pub tax_setting: ModifierTaxSetting,
    pub category: ModifierCategory,
    #[serde(default)]
    pub affects_quantity: bool,
    #[serde(default)]
    pub cost_percentage: Option<String>,
    #[serde(default)]
    pub display_mode: Option<String>,
    #[serde(default)]
    pub application_type: Option<ApplicationType>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub chain_priority: Option<i64>,
    #[serde(default)]
    pub line_item_id: Option<LineItemId>,
    #[serde(default)]
    pub missing_cost_strategy: Option<MissingCostStrategy>,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_modifier_tax_setting() -> ModifierTaxSetting {
    ModifierTaxSetting::Inherit
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyType {
    Requires,
    Excludes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    pub modifier_id: ModifierId,
    pub depends_on: ModifierId,
    #[serde(rename = "type")]
    pub dependency_type: DependencyType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub modifier_id: ModifierId,
    pub expression: RuleNode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxMode {
    Retail,
    UseTax,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jurisdiction {
    pub code: String,
    pub order: i64,
    pub rate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaxConfig {
    pub mode: TaxMode,
    #[serde(default)]
    pub retail_rate: Option<String>,
    #[serde(default)]
    pub use_tax_rate: Option<String>,
    #[serde(default)]
    pub jurisdictions: Vec<Jurisdiction>,
    pub schema_version: String,
}

/// Delta describing what changed relative to a cached frozen input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaType {
    ModifierOnly,
    LineItem,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delta {
    #[serde(rename = "type")]
    pub delta_type: DeltaType,
    #[serde(default)]
    pub changed_line_item_ids: Vec<LineItemId>,
    #[serde(default)]
    pub changed_modifier_ids: Vec<ModifierId>,
    #[serde(default)]
    pub dependencies_changed: bool,
    #[serde(default)]
    pub rules_changed: bool,
}

/// The request accepted by the orchestrator's `calculate` entry point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculateRequest {
    pub proposal_id: String,
    pub tenant: String,
    pub line_items: Vec<LineItem>,
    pub modifiers: Vec<Modifier>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    pub config: TaxConfig,
    #[serde(default)]
    pub changes: Option<Delta>,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// The normalised, immutable input consumed by the pure compute stage.
/// Produced once by preparation and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrozenInput {
    pub proposal_id: String,
    pub tenant: String,
    pub schema_version: String,
    pub line_items: Vec<FrozenLineItem>,
    pub modifiers: Vec<FrozenModifier>,
    pub dependencies: Vec<Dependency>,
    pub compiled_rules: BTreeMap<ModifierId, RuleNode>,
    pub config: TaxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrozenLineItem {
    pub id: LineItemId,
    pub unit_price: BigDecimal,
    pub quantity: u32,
    pub cost: BigDecimal,
    pub tax_setting: LineTaxSetting,
    pub use_tax_eligible: bool,
    pub vendor_tax_collected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrozenModifier {
    pub id: ModifierId,
    pub kind: ModifierKind,
    pub value: BigDecimal,
    pub tax_setting: ModifierTaxSetting,
    pub category: ModifierCategory,
    pub affects_quantity: bool,
    pub cost_percentage: Option<BigDecimal>,
    pub display_mode: Option<String>,
    pub application_type: ApplicationType,
    pub product_id: Option<String>,
    pub chain_priority: i64,
    pub line_item_id: Option<LineItemId>,
    pub missing_cost_strategy: MissingCostStrategy,
    pub created_at: String,
}

/// An 8-attribute grouping key. Modifiers whose key is equal collapse into
/// one [`Group`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub resolved_tax_setting: ResolvedTaxSetting,
    pub kind: ModifierKind,
    pub category: ModifierCategory,
    pub affects_quantity: bool,
    pub cost_percentage: Option<String>,
    pub display_mode: Option<String>,
    pub application_type: ApplicationType,
    pub product_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResolvedTaxSetting {
    Taxable,
    NonTaxable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub key: GroupKey,
    pub modifier_ids: Vec<ModifierId>,
    pub combined_value: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineAllocation {
    pub line_item_id: LineItemId,
    pub amount_q7: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Adjustment {
    pub group_key: GroupKey,
    pub modifier_ids: Vec<ModifierId>,
    pub combined_value_q7: BigDecimal,
    pub amount_q7: BigDecimal,
    pub amount_q2: BigDecimal,
    pub per_line_allocations: Vec<LineAllocation>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MissingRequirement,
    RuleFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedModifier {
    pub modifier_id: ModifierId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubTax {
    pub jurisdiction_code: String,
    pub amount_q7: BigDecimal,
}

/// The pure compute stage's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalcResultValue {
    pub subtotal_q7: BigDecimal,
    pub subtotal_q2: BigDecimal,
    pub modifier_total_q7: BigDecimal,
    pub modifier_total_q2: BigDecimal,
    pub retail_tax_q7: BigDecimal,
    pub retail_tax_q2: BigDecimal,
    pub customer_grand_total_q7: BigDecimal,
    pub customer_grand_total_q2: BigDecimal,
    pub use_tax_q7: Option<BigDecimal>,
    pub use_tax_q2: Option<BigDecimal>,
    pub internal_grand_total_q2: Option<BigDecimal>,
    pub taxable_base_q7: BigDecimal,
    pub non_taxable_base_q7: BigDecimal,
    pub sub_taxes: Vec<SubTax>,
    pub adjustments: Vec<Adjustment>,
    pub rejected: Vec<RejectedModifier>,
    pub checksum: String,
}

/// One row in the durable outbox, staged in the same transaction as the
/// calculation result and published asynchronously.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseTimings {
    pub preparation_ms: f64,
    pub compute_ms: f64,
    pub commit_ms: f64,
    pub total_ms: f64,
}

/// What `Orchestrator::calculate` hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculateResponse {
    pub result: CalcResultValue,
    pub timings: PhaseTimings,
    pub replayed: bool,
}
