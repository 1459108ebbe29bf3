//! Repository for the `queued_jobs` table.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so several workers can poll the
//! same table. A claimed job carries a lease: if its worker dies, the row is
//! reclaimed once `claimed_at` is older than the lease.

use herald_core::jobs::{JOB_STATUS_DEAD, JOB_STATUS_DONE, JOB_STATUS_PENDING, JOB_STATUS_RUNNING};
use herald_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::job::{NewJob, QueuedJobRow};

/// Column list for `queued_jobs` queries.
const COLUMNS: &str = "id, kind, payload, status, run_at, attempts, max_attempts, repeat, \
    dedupe_key, last_error, claimed_at, created_at, updated_at";

/// Durable queue operations.
pub struct JobRepo;

impl JobRepo {
    /// Insert a job. Returns `None` when a job with the same dedupe key
    /// already exists.
    ///
    /// Accepts any executor so callers can enqueue inside their own
    /// transaction.
    pub async fn insert<'e, E>(executor: E, job: &NewJob) -> Result<Option<DbId>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_scalar(
            "INSERT INTO queued_jobs (kind, payload, status, run_at, max_attempts, repeat, dedupe_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (dedupe_key) DO NOTHING \
             RETURNING id",
        )
        .bind(&job.kind)
        .bind(&job.payload)
        .bind(JOB_STATUS_PENDING)
        .bind(job.run_at)
        .bind(job.max_attempts)
        .bind(job.repeat.map(|r| r.as_str()))
        .bind(&job.dedupe_key)
        .fetch_optional(executor)
        .await
    }

    /// Claim up to `limit` due jobs and mark them running.
    ///
    /// Jobs left running since before `lease_expired_before` are claimed
    /// again. Each claim counts as an attempt.
    pub async fn claim_due(
        pool: &PgPool,
        now: Timestamp,
        lease_expired_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<QueuedJobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE queued_jobs SET \
                status = $1, claimed_at = $2, attempts = attempts + 1, updated_at = NOW() \
             WHERE id IN ( \
                SELECT id FROM queued_jobs \
                WHERE (status = $3 AND run_at <= $2) \
                   OR (status = $1 AND claimed_at < $4) \
                ORDER BY run_at, id \
                LIMIT $5 \
                FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let mut rows = sqlx::query_as::<_, QueuedJobRow>(&query)
            .bind(JOB_STATUS_RUNNING)
            .bind(now)
            .bind(JOB_STATUS_PENDING)
            .bind(lease_expired_before)
            .bind(limit)
            .fetch_all(pool)
            .await?;
        rows.sort_by_key(|r| (r.run_at, r.id));
        Ok(rows)
    }

    /// Finish a job. Recurring jobs pass their next run time and go back to
    /// pending with a fresh attempt budget.
    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        next_run: Option<Timestamp>,
    ) -> Result<(), sqlx::Error> {
        match next_run {
            Some(run_at) => {
                sqlx::query(
                    "UPDATE queued_jobs SET \
                        status = $2, run_at = $3, attempts = 0, claimed_at = NULL, \
                        last_error = NULL, updated_at = NOW() \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(JOB_STATUS_PENDING)
                .bind(run_at)
                .execute(pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE queued_jobs SET status = $2, claimed_at = NULL, updated_at = NOW() \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(JOB_STATUS_DONE)
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Put a failed job back in the queue to run at `run_at`.
    pub async fn retry_later(
        pool: &PgPool,
        id: DbId,
        run_at: Timestamp,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE queued_jobs SET \
                status = $2, run_at = $3, last_error = $4, claimed_at = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(JOB_STATUS_PENDING)
        .bind(run_at)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Park a job that exhausted its attempts or cannot be decoded.
    pub async fn dead_letter(pool: &PgPool, id: DbId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE queued_jobs SET \
                status = $2, last_error = $3, claimed_at = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(JOB_STATUS_DEAD)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Count jobs in a given status.
    pub async fn count_by_status(pool: &PgPool, status: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM queued_jobs WHERE status = $1")
            .bind(status)
            .fetch_one(pool)
            .await
    }
}
