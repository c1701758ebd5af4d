//! Durable job queue backed by PostgreSQL with lease-based locking.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
//! contend on the same row: at any instant a job is held by at most one
//! claimer, and an expired lease returns the job to `retry`.

use crate::error::Result;
use crate::types::{Job, JobStatus};
use sqlx::{PgPool, Row};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, kind, dedupe_key, payload, status, priority, attempts, \
     max_attempts, locked_until, error_message, created_at";

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy)]
pub struct Enqueued {
    pub job_id: Uuid,
    /// False when an equivalent live job already existed (dedupe no-op)
    pub created: bool,
}

/// Enqueue a job, deduplicating by `dedupe_key` if provided.
///
/// A colliding key whose job is still live (not `done`/`failed`) makes this
/// a no-op that returns the existing job id. A collision with a finished
/// job re-arms it.
pub async fn enqueue(
    pool: &PgPool,
    kind: &str,
    payload: serde_json::Value,
    priority: i32,
    dedupe_key: Option<&str>,
    max_attempts: i32,
) -> Result<Enqueued> {
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO jobs (kind, dedupe_key, payload, priority, max_attempts)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (dedupe_key) DO UPDATE
        SET status = 'queued',
            attempts = 0,
            locked_until = NULL,
            error_message = NULL,
            payload = EXCLUDED.payload,
            priority = EXCLUDED.priority,
            updated_at = now()
        WHERE jobs.status IN ('done', 'failed')
        RETURNING id
        "#,
    )
    .bind(kind)
    .bind(dedupe_key)
    .bind(&payload)
    .bind(priority)
    .bind(max_attempts)
    .fetch_optional(pool)
    .await?;

    if let Some(job_id) = inserted {
        return Ok(Enqueued {
            job_id,
            created: true,
        });
    }

    // Dedupe hit against a live job; NULL keys never conflict so the key is
    // present here.
    let existing: Uuid = sqlx::query_scalar("SELECT id FROM jobs WHERE dedupe_key = $1")
        .bind(dedupe_key)
        .fetch_one(pool)
        .await?;

    tracing::debug!(dedupe_key = ?dedupe_key, "Job deduplicated");
    Ok(Enqueued {
        job_id: existing,
        created: false,
    })
}

/// Enqueue a job whose execution is delayed by `delay_seconds`.
///
/// Used for backpressure: the row is created in `retry` with a future
/// `locked_until`, so claimers skip it until the delay elapses.
pub async fn enqueue_delayed(
    pool: &PgPool,
    kind: &str,
    payload: serde_json::Value,
    priority: i32,
    dedupe_key: Option<&str>,
    max_attempts: i32,
    delay_seconds: f64,
) -> Result<Enqueued> {
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO jobs (kind, dedupe_key, payload, priority, max_attempts, status, locked_until)
        VALUES ($1, $2, $3, $4, $5, 'retry', now() + make_interval(secs => $6))
        ON CONFLICT (dedupe_key) DO UPDATE
        SET status = 'retry',
            attempts = 0,
            locked_until = now() + make_interval(secs => $6),
            error_message = NULL,
            payload = EXCLUDED.payload,
            priority = EXCLUDED.priority,
            updated_at = now()
        WHERE jobs.status IN ('done', 'failed')
        RETURNING id
        "#,
    )
    .bind(kind)
    .bind(dedupe_key)
    .bind(&payload)
    .bind(priority)
    .bind(max_attempts)
    .bind(delay_seconds)
    .fetch_optional(pool)
    .await?;

    if let Some(job_id) = inserted {
        return Ok(Enqueued {
            job_id,
            created: true,
        });
    }

    let existing: Uuid = sqlx::query_scalar("SELECT id FROM jobs WHERE dedupe_key = $1")
        .bind(dedupe_key)
        .fetch_one(pool)
        .await?;

    Ok(Enqueued {
        job_id: existing,
        created: false,
    })
}

/// Claim the next available job using lease-based locking.
///
/// Atomically selects the oldest claimable row by `(priority, created_at)`,
/// marks it `processing`, extends `locked_until` by the lease, and
/// increments `attempts`. Returns `None` when nothing is claimable.
pub async fn claim(pool: &PgPool, lease_seconds: f64) -> Result<Option<Job>> {
    let query = format!(
        r#"
        UPDATE jobs
        SET status = 'processing',
            locked_until = now() + make_interval(secs => $1),
            attempts = attempts + 1,
            updated_at = now()
        WHERE id = (
            SELECT id FROM jobs
            WHERE status IN ('queued', 'retry')
              AND (locked_until IS NULL OR locked_until < now())
            ORDER BY priority ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {JOB_COLUMNS}
        "#
    );

    let row = sqlx::query(&query)
        .bind(lease_seconds)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| row_to_job(&r)).transpose()?)
}

/// Fetch a job by id.
pub async fn get(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>> {
    let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
    let row = sqlx::query(&query)
        .bind(job_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| row_to_job(&r)).transpose()?)
}

/// Mark a job as done. Done jobs never transition again.
pub async fn complete(pool: &PgPool, job_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = 'done', updated_at = now() WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a job as failed, or schedule a retry with exponential backoff.
///
/// Retries get `locked_until = now() + backoff(attempts) + jitter`, with the
/// backoff capped at `backoff_ceiling_secs`. Once `attempts` reaches
/// `max_attempts` the job goes to `failed` and stays queryable.
pub async fn fail(
    pool: &PgPool,
    job_id: Uuid,
    error_message: &str,
    backoff_ceiling_secs: i64,
) -> Result<()> {
    let row = sqlx::query("SELECT attempts, max_attempts FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        tracing::warn!(%job_id, "Cannot fail job: not found");
        return Ok(());
    };

    let attempts: i32 = row.get("attempts");
    let max_attempts: i32 = row.get("max_attempts");

    if attempts < max_attempts {
        let backoff = backoff_seconds(attempts, backoff_ceiling_secs);
        let jitter = rand::random::<u64>() % (backoff.max(4) as u64 / 4);
        let delay = (backoff as u64 + jitter) as f64;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'retry',
                error_message = $2,
                locked_until = now() + make_interval(secs => $3),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .bind(delay)
        .execute(pool)
        .await?;

        tracing::info!(%job_id, attempt = attempts, delay_secs = delay, error = error_message, "Job scheduled for retry");
    } else {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error_message = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .execute(pool)
        .await?;

        tracing::warn!(%job_id, attempts, error = error_message, "Job permanently failed");
    }

    Ok(())
}

/// Reset jobs whose lease expired while `processing` back to `retry`.
///
/// Returns the number of leases reaped.
pub async fn reap_expired(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'retry', locked_until = NULL, updated_at = now()
        WHERE status = 'processing' AND locked_until < now()
        "#,
    )
    .execute(pool)
    .await?;

    let count = result.rows_affected();
    if count > 0 {
        tracing::info!(count, "Expired stale job leases");
    }
    Ok(count)
}

/// Job counts grouped by status, for operator inspection.
pub async fn stats(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query("SELECT status, count(*) AS n FROM jobs GROUP BY status ORDER BY status")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
        .collect())
}

/// Number of jobs waiting to run; drives enqueue backpressure.
pub async fn queue_depth(pool: &PgPool) -> Result<i64> {
    let depth: i64 =
        sqlx::query_scalar("SELECT count(*) FROM jobs WHERE status IN ('queued', 'retry')")
            .fetch_one(pool)
            .await?;
    Ok(depth)
}

/// Exponential backoff without jitter: 30s doubling per attempt, capped.
fn backoff_seconds(attempts: i32, ceiling: i64) -> i64 {
    let exp = attempts.clamp(0, 30) as u32;
    let raw = 30i64.saturating_mul(1i64 << exp.min(20));
    raw.min(ceiling.max(1))
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> std::result::Result<Job, sqlx::Error> {
    let status: String = row.get("status");
    Ok(Job {
        id: row.get("id"),
        kind: row.get("kind"),
        dedupe_key: row.get("dedupe_key"),
        payload: row.get("payload"),
        status: status.parse().unwrap_or(JobStatus::Queued),
        priority: row.get("priority"),
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        locked_until: row.get("locked_until"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_seconds(0, 3600), 30);
        assert_eq!(backoff_seconds(1, 3600), 60);
        assert_eq!(backoff_seconds(2, 3600), 120);
        assert_eq!(backoff_seconds(3, 3600), 240);
        // Hits the ceiling
        assert_eq!(backoff_seconds(10, 3600), 3600);
        assert_eq!(backoff_seconds(25, 3600), 3600);
    }

    #[test]
    fn test_backoff_monotonic_until_ceiling() {
        let mut prev = 0;
        for attempts in 0..12 {
            let b = backoff_seconds(attempts, 3600);
            assert!(b >= prev);
            prev = b;
        }
    }
}
