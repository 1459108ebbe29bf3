//! Repository for the `digest_items` table.

use herald_core::digest::{bucket_for, DigestItem};
use herald_core::jobs::{DigestDelivery, Job};
use herald_core::preferences::DigestInterval;
use herald_core::types::{DbId, NotificationId, Timestamp};
use sqlx::PgPool;

use crate::models::digest::DigestItemRow;
use crate::models::job::NewJob;
use crate::repositories::JobRepo;

/// Column list for `digest_items` queries.
const COLUMNS: &str = "id, user_id, digest_interval, bucket, item, arrived_at";

/// Pending digest batches, one per (user, interval).
pub struct DigestRepo;

impl DigestRepo {
    /// Append an item to the user's batch. Returns the batch size afterwards.
    pub async fn append(
        pool: &PgPool,
        user_id: DbId,
        interval: DigestInterval,
        item: &DigestItem,
    ) -> Result<i64, sqlx::Error> {
        let payload = serde_json::to_value(item).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO digest_items (user_id, digest_interval, bucket, item, arrived_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user_id)
        .bind(interval.as_str())
        .bind(bucket_for(interval, item.arrived_at))
        .bind(&payload)
        .bind(item.arrived_at)
        .execute(&mut *tx)
        .await?;

        let size: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM digest_items WHERE user_id = $1 AND digest_interval = $2",
        )
        .bind(user_id)
        .bind(interval.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(size)
    }

    /// Users with at least one pending item for `interval`.
    pub async fn users_with_pending(
        pool: &PgPool,
        interval: DigestInterval,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM digest_items WHERE digest_interval = $1 ORDER BY user_id",
        )
        .bind(interval.as_str())
        .fetch_all(pool)
        .await
    }

    /// Pending items for one batch, in arrival order.
    pub async fn pending(
        pool: &PgPool,
        user_id: DbId,
        interval: DigestInterval,
    ) -> Result<Vec<DigestItemRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM digest_items \
             WHERE user_id = $1 AND digest_interval = $2 \
             ORDER BY arrived_at, id"
        );
        sqlx::query_as::<_, DigestItemRow>(&query)
            .bind(user_id)
            .bind(interval.as_str())
            .fetch_all(pool)
            .await
    }

    /// Empty a batch and enqueue its delivery job in one transaction.
    ///
    /// Items appended after the `DELETE` land in a fresh batch, so nothing is
    /// lost or sent twice. Returns the number of items drained (zero when the
    /// batch was already empty, in which case no job is enqueued).
    pub async fn drain_into_job(
        pool: &PgPool,
        user_id: DbId,
        interval: DigestInterval,
        run_at: Timestamp,
        max_attempts: i32,
    ) -> Result<usize, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "DELETE FROM digest_items \
             WHERE user_id = $1 AND digest_interval = $2 \
             RETURNING {COLUMNS}"
        );
        let mut rows = sqlx::query_as::<_, DigestItemRow>(&query)
            .bind(user_id)
            .bind(interval.as_str())
            .fetch_all(&mut *tx)
            .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        rows.sort_by_key(|r| (r.arrived_at, r.id));
        let items = rows
            .into_iter()
            .map(DigestItemRow::into_item)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let count = items.len();

        let job = Job::DigestDelivery(DigestDelivery {
            notification_id: NotificationId::now_v7(),
            user_id,
            interval,
            items,
        });
        let new_job = NewJob::new(&job, run_at, max_attempts)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        JobRepo::insert(&mut *tx, &new_job).await?;

        tx.commit().await?;
        Ok(count)
    }
}
