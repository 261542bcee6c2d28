//! Per-proposal advisory lock serialising commit transactions for the
//! same `proposalId`. `pg_advisory_lock` is session-scoped, so the guard
//! holds the same pooled connection across acquire and release.

use crate::error::CalcResult;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::hash::{Hash, Hasher};

pub struct LockGuard {
    conn: PoolConnection<Postgres>,
    key: i32,
}

/// Hash `proposal_id` down to a 32-bit key for `pg_advisory_lock(bigint)`.
fn lock_key(proposal_id: &str) -> i32 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    proposal_id.hash(&mut hasher);
    (hasher.finish() & 0xFFFF_FFFF) as i32
}

pub async fn acquire(pool: &PgPool, proposal_id: &str) -> CalcResult<LockGuard> {
    let key = lock_key(proposal_id);
    let mut conn = pool.acquire().await?;
    sqlx::query("SELECT pg_advisory_lock($1)").bind(key).execute(&mut *conn).await?;
    Ok(LockGuard { conn, key })
}

pub async fn release(_pool: &PgPool, mut guard: LockGuard) -> CalcResult<()> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(guard.key)
        .execute(&mut *guard.conn)
        .await?;
    Ok(())
}
