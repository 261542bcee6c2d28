//! Idempotency store keyed by result checksum. An in-process L1 cache
//! backs the common case; a miss falls back to the audit table so
//! idempotency survives a process restart.

use crate::error::CalcResult;
use crate::types::CalcResultValue;
use once_cell::sync::Lazy;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;

static L1: Lazy<Mutex<HashMap<String, CalcResultValue>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Consult the idempotency store. A hit means the checksum was already
/// committed; the caller performs no writes, no events, no webhooks.
pub async fn lookup(pool: &PgPool, checksum: &str) -> CalcResult<Option<CalcResultValue>> {
    if let Some(hit) = L1.lock().unwrap().get(checksum).cloned() {
        return Ok(Some(hit));
    }

    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT payload FROM calc_audit WHERE checksum = $1")
            .bind(checksum)
            .fetch_optional(pool)
            .await?;

    Ok(match row {
        Some((payload,)) => {
            let value: CalcResultValue = serde_json::from_value(payload)?;
            L1.lock().unwrap().insert(checksum.to_string(), value.clone());
            Some(value)
        }
        None => None,
    })
}

/// Cache a freshly committed result. Only called after the enclosing
/// transaction has committed.
pub fn cache(checksum: &str, result: &CalcResultValue) {
    L1.lock().unwrap().insert(checksum.to_string(), result.clone());
}
