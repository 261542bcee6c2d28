//! Consistent snapshot reads against the proposal store.
//!
//! Everything one request needs is read inside a single `REPEATABLE READ`
//! transaction so concurrent writers can't hand back a torn view of the
//! proposal.

use crate::error::{CalcError, CalcResult};
use crate::types::{Dependency, DependencyType, LineItem, LineTaxSetting, Modifier, Rule};
use common_rules::RuleNode;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use std::cmp::Ordering;

#[derive(Debug, Clone, sqlx::FromRow)]
struct LineItemRow {
    id: String,
    unit_price: String,
    quantity: i32,
    cost: String,
    tax_setting: String,
    use_tax_eligible: bool,
    vendor_tax_collected: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ModifierRow {
    id: String,
    kind: String,
    value: String,
    tax_setting: String,
    category: String,
    affects_quantity: bool,
    cost_percentage: Option<String>,
    display_mode: Option<String>,
    application_type: Option<String>,
    product_id: Option<String>,
    chain_priority: Option<i64>,
    line_item_id: Option<String>,
    missing_cost_strategy: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct DependencyRow {
    modifier_id: String,
    depends_on: String,
    dependency_type: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RuleRow {
    modifier_id: String,
    expression: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ProposalRow {
    schema_version: String,
}

/// Everything the preparation stage fetched for one proposal, before
/// normalisation. Arrays are in DB order; the caller re-sorts with its
/// own collator rather than trust collation.
pub struct FetchedProposal {
    pub schema_version: String,
    pub line_items: Vec<LineItem>,
    pub modifiers: Vec<Modifier>,
    pub dependencies: Vec<Dependency>,
    pub rules: Vec<Rule>,
}

pub async fn connect(database_url: &str) -> CalcResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| CalcError::DatabaseError(format!("pool connect: {e}")))
}

/// Fetch proposal, line items, modifiers, dependencies and rules inside
/// one `REPEATABLE READ` transaction.
pub async fn fetch_snapshot(pool: &PgPool, tenant: &str, proposal_id: &str) -> CalcResult<FetchedProposal> {
    let mut tx: Transaction<'_, Postgres> = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;

    let proposal = sqlx::query_as::<_, ProposalRow>(
        "SELECT schema_version FROM proposals WHERE tenant_id = $1 AND id = $2",
    )
    .bind(tenant)
    .bind(proposal_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| CalcError::DataFetchError(format!("no proposal {proposal_id} for tenant {tenant}")))?;

    let line_item_rows = sqlx::query_as::<_, LineItemRow>(
        "SELECT id, unit_price, quantity, cost, tax_setting, use_tax_eligible, vendor_tax_collected \
         FROM proposal_line_items WHERE tenant_id = $1 AND proposal_id = $2 ORDER BY id",
    )
    .bind(tenant)
    .bind(proposal_id)
    .fetch_all(&mut *tx)
    .await?;

    let modifier_rows = sqlx::query_as::<_, ModifierRow>(
        "SELECT id, kind, value, tax_setting, category, affects_quantity, cost_percentage, \
         display_mode, application_type, product_id, chain_priority, line_item_id, \
         missing_cost_strategy, created_at \
         FROM proposal_modifiers WHERE tenant_id = $1 AND proposal_id = $2 \
         ORDER BY chain_priority, id",
    )
    .bind(tenant)
    .bind(proposal_id)
    .fetch_all(&mut *tx)
    .await?;

    let modifier_ids: Vec<String> = modifier_rows.iter().map(|m| m.id.clone()).collect();

    let dependency_rows = sqlx::query_as::<_, DependencyRow>(
        "SELECT modifier_id, depends_on, dependency_type FROM modifier_dependencies \
         WHERE tenant_id = $1 AND modifier_id = ANY($2) ORDER BY depends_on, modifier_id",
    )
    .bind(tenant)
    .bind(&modifier_ids)
    .fetch_all(&mut *tx)
    .await?;

    let rule_rows = sqlx::query_as::<_, RuleRow>(
        "SELECT modifier_id, expression FROM modifier_rules \
         WHERE tenant_id = $1 AND modifier_id = ANY($2)",
    )
    .bind(tenant)
    .bind(&modifier_ids)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    let mut line_items: Vec<LineItem> = line_item_rows
        .into_iter()
        .map(|r| {
            Ok(LineItem {
                id: r.id,
                unit_price: r.unit_price,
                quantity: r.quantity.max(0) as u32,
                cost: r.cost,
                tax_setting: match r.tax_setting.as_str() {
                    "TAXABLE" => LineTaxSetting::Taxable,
                    "NON_TAXABLE" => LineTaxSetting::NonTaxable,
                    other => {
                        return Err(CalcError::DataFetchError(format!("unknown taxSetting {other}")))
                    }
                },
                use_tax_eligible: r.use_tax_eligible,
                vendor_tax_collected: r.vendor_tax_collected,
            })
        })
        .collect::<CalcResult<_>>()?;
    line_items.sort_by(|a, b| collate(&a.id, &b.id));

    let mut modifiers: Vec<Modifier> = modifier_rows
        .into_iter()
        .map(|r| {
            Ok(Modifier {
                id: r.id,
                kind: serde_json::from_value(serde_json::Value::String(r.kind))
                    .map_err(|e| CalcError::DataFetchError(format!("bad modifier kind: {e}")))?,
                value: r.value,
                tax_setting: serde_json::from_value(serde_json::Value::String(r.tax_setting))
                    .map_err(|e| CalcError::DataFetchError(format!("bad modifier tax setting: {e}")))?,
                category: serde_json::from_value(serde_json::Value::String(r.category))
                    .map_err(|e| CalcError::DataFetchError(format!("bad modifier category: {e}")))?,
                affects_quantity: r.affects_quantity,
                cost_percentage: r.cost_percentage,
                display_mode: r.display_mode,
                application_type: r
                    .application_type
                    .map(|s| serde_json::from_value(serde_json::Value::String(s)))
                    .transpose()
                    .map_err(|e| CalcError::DataFetchError(format!("bad applicationType: {e}")))?,
                product_id: r.product_id,
                chain_priority: r.chain_priority,
                line_item_id: r.line_item_id,
                missing_cost_strategy: r
                    .missing_cost_strategy
                    .map(|s| serde_json::from_value(serde_json::Value::String(s)))
                    .transpose()
                    .map_err(|e| CalcError::DataFetchError(format!("bad missingCostStrategy: {e}")))?,
                created_at: r.created_at,
            })
        })
        .collect::<CalcResult<_>>()?;
    modifiers.sort_by(|a, b| {
        a.chain_priority
            .unwrap_or(999)
            .cmp(&b.chain_priority.unwrap_or(999))
            .then_with(|| collate(&a.id, &b.id))
    });

    let mut dependencies: Vec<Dependency> = dependency_rows
        .into_iter()
        .map(|r| {
            Ok(Dependency {
                modifier_id: r.modifier_id,
                depends_on: r.depends_on,
                dependency_type: match r.dependency_type.as_str() {
                    "REQUIRES" => DependencyType::Requires,
                    "EXCLUDES" => DependencyType::Excludes,
                    other => {
                        return Err(CalcError::DataFetchError(format!("unknown dependency type {other}")))
                    }
                },
            })
        })
        .collect::<CalcResult<_>>()?;
    dependencies.sort_by(|a, b| collate(&a.depends_on, &b.depends_on).then_with(|| collate(&a.modifier_id, &b.modifier_id)));

    let rules: Vec<Rule> = rule_rows
        .into_iter()
        .map(|r| {
            let expression: RuleNode = serde_json::from_value(r.expression)
                .map_err(|e| CalcError::RuleCompileError(format!("malformed rule json: {e}")))?;
            Ok(Rule {
                modifier_id: r.modifier_id,
                expression,
            })
        })
        .collect::<CalcResult<_>>()?;

    Ok(FetchedProposal {
        schema_version: proposal.schema_version,
        line_items,
        modifiers,
        dependencies,
        rules,
    })
}

/// Locale-insensitive ordinal comparison, used to neutralise database
/// collation differences once arrays are back in process memory.
fn collate(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}
