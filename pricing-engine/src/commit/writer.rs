//! The one transaction commit performs: upsert the result, upsert the
//! itemized audit row and its group rows, stage an outbox event.

use crate::commit::CommitMeta;
use crate::error::CalcResult;
use crate::types::CalcResultValue;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub async fn write_transactionally(
    pool: &PgPool,
    proposal_id: &str,
    result: &CalcResultValue,
    meta: &CommitMeta,
    calc_id: Uuid,
    finished_at: DateTime<Utc>,
    processing_ms: f64,
) -> CalcResult<()> {
    let mut tx = pool.begin().await?;

    let payload = serde_json::to_value(result)?;
    let tax_mode = tax_mode_str(meta.tax_mode);

    sqlx::query(
        "INSERT INTO calculation_results (proposal_id, checksum, payload, updated_at) \
         VALUES ($1, $2, $3, now()) \
         ON CONFLICT (proposal_id) DO UPDATE SET checksum = EXCLUDED.checksum, payload = EXCLUDED.payload, updated_at = now()",
    )
    .bind(proposal_id)
    .bind(&result.checksum)
    .bind(&payload)
    .execute(&mut *tx)
    .await?;

    let phase_timings = serde_json::json!({
        "preparationMs": meta.preparation_ms,
        "computeMs": meta.compute_ms,
        "processingMs": processing_ms,
    });

    sqlx::query(
        "INSERT INTO calc_audit \
         (calc_id, proposal_id, tenant, version, started_at, finished_at, phase_timings, \
          subtotal_q7, modifier_total_q7, taxable_base_q7, non_taxable_q7, retail_tax_q7, \
          use_tax_q7, customer_grand_total_q7, grand_total_q2, tax_mode, engine_version, checksum, payload) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
         ON CONFLICT (checksum) DO NOTHING",
    )
    .bind(calc_id)
    .bind(proposal_id)
    .bind(&meta.tenant)
    .bind(&meta.schema_version)
    .bind(meta.started_at)
    .bind(finished_at)
    .bind(&phase_timings)
    .bind(&result.subtotal_q7)
    .bind(&result.modifier_total_q7)
    .bind(&result.taxable_base_q7)
    .bind(&result.non_taxable_base_q7)
    .bind(&result.retail_tax_q7)
    .bind(&result.use_tax_q7)
    .bind(&result.customer_grand_total_q7)
    .bind(&result.customer_grand_total_q2)
    .bind(tax_mode)
    .bind(&meta.engine_version)
    .bind(&result.checksum)
    .bind(&payload)
    .execute(&mut *tx)
    .await?;

    for adjustment in &result.adjustments {
        let group_key = serde_json::to_string(&adjustment.group_key)?;
        let attributes = serde_json::to_value(&adjustment.group_key)?;
        let modifier_ids = serde_json::to_value(&adjustment.modifier_ids)?;
        sqlx::query(
            "INSERT INTO calc_audit_groups \
             (calc_id, group_key, attributes, combined_value, adjustment_q7, modifier_ids) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(calc_id)
        .bind(&group_key)
        .bind(&attributes)
        .bind(&adjustment.combined_value_q7)
        .bind(&adjustment.amount_q7)
        .bind(&modifier_ids)
        .execute(&mut *tx)
        .await?;
    }

    let metadata = serde_json::json!({
        "engineVersion": meta.engine_version,
        "processingMs": processing_ms,
    });

    sqlx::query(
        "INSERT INTO outbox_events \
         (id, event_type, aggregate_id, payload, metadata, status, retry_count, next_retry_at, created_at) \
         VALUES ($1, 'calculation.completed', $2, $3, $4, 'PENDING', 0, now(), now())",
    )
    .bind(Uuid::new_v4())
    .bind(proposal_id)
    .bind(&payload)
    .bind(&metadata)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

fn tax_mode_str(mode: crate::types::TaxMode) -> &'static str {
    use crate::types::TaxMode;
    match mode {
        TaxMode::Retail => "RETAIL",
        TaxMode::UseTax => "USE_TAX",
        TaxMode::Mixed => "MIXED",
    }
}
