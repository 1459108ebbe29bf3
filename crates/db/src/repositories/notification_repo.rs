//! Repository for the `notifications` and `notification_unread_counters` tables.

use herald_core::notification::Notification;
use herald_core::types::{DbId, NotificationId};
use sqlx::PgPool;

use crate::models::notification::{MarkReadResult, NotificationFilter, NotificationRow};

/// Column list for `notifications` queries.
const COLUMNS: &str = "id, user_id, notification_type, title, body, data, action_url, \
    image_url, priority, created_at, expires_at, is_read, read_at";

/// Shared `WHERE` clause for feed queries. `$1` user, `$2` now, `$3` types.
const FEED_FILTER: &str = "user_id = $1 \
    AND (expires_at IS NULL OR expires_at > $2) \
    AND ($3::text[] IS NULL OR notification_type = ANY($3))";

/// Provides CRUD operations for feed notifications and their unread counter.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Insert a notification into the feed and bump the unread counter.
    ///
    /// Idempotent on `id`: a second insert of the same notification changes
    /// nothing and does not touch the counter. Returns `true` if a row was
    /// inserted.
    pub async fn insert(pool: &PgPool, n: &Notification) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO notifications \
                (id, user_id, notification_type, title, body, data, action_url, \
                 image_url, priority, created_at, expires_at, is_read, read_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(n.id)
        .bind(n.user_id)
        .bind(n.notification_type.as_str())
        .bind(&n.title)
        .bind(&n.body)
        .bind(&n.data)
        .bind(&n.action_url)
        .bind(&n.image_url)
        .bind(n.priority.as_str())
        .bind(n.created_at)
        .bind(n.expires_at)
        .bind(n.is_read)
        .bind(n.read_at)
        .execute(&mut *tx)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted && !n.is_read {
            sqlx::query(
                "INSERT INTO notification_unread_counters (user_id, unread_count) \
                 VALUES ($1, 1) \
                 ON CONFLICT (user_id) DO UPDATE SET \
                    unread_count = notification_unread_counters.unread_count + 1, \
                    updated_at = NOW()",
            )
            .bind(n.user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Find a notification by id, scoped to its owner.
    pub async fn find_by_id(
        pool: &PgPool,
        id: NotificationId,
        user_id: DbId,
    ) -> Result<Option<NotificationRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM notifications WHERE id = $1 AND user_id = $2");
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// List a user's non-expired notifications, newest first.
    pub async fn list_for_user(
        pool: &PgPool,
        filter: &NotificationFilter<'_>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationRow>, sqlx::Error> {
        let unread = if filter.unread_only {
            "AND is_read = false"
        } else {
            ""
        };
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE {FEED_FILTER} {unread} \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4 OFFSET $5"
        );
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(filter.user_id)
            .bind(filter.now)
            .bind(filter.types)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Count rows matching the same filter as [`list_for_user`](Self::list_for_user).
    pub async fn count_for_user(
        pool: &PgPool,
        filter: &NotificationFilter<'_>,
    ) -> Result<i64, sqlx::Error> {
        let unread = if filter.unread_only {
            "AND is_read = false"
        } else {
            ""
        };
        let query = format!("SELECT COUNT(*) FROM notifications WHERE {FEED_FILTER} {unread}");
        let count: Option<i64> = sqlx::query_scalar(&query)
            .bind(filter.user_id)
            .bind(filter.now)
            .bind(filter.types)
            .fetch_one(pool)
            .await?;
        Ok(count.unwrap_or(0))
    }

    /// Mark a single notification as read.
    ///
    /// Only an unread row is updated, so the counter is decremented at most
    /// once per notification no matter how often this is called.
    pub async fn mark_read(
        pool: &PgPool,
        id: NotificationId,
        user_id: DbId,
    ) -> Result<MarkReadResult, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "UPDATE notifications \
             SET is_read = true, read_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND is_read = false",
        )
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM notifications WHERE id = $1 AND user_id = $2)",
            )
            .bind(id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(if exists {
                MarkReadResult::AlreadyRead
            } else {
                MarkReadResult::NotFound
            });
        }

        sqlx::query(
            "UPDATE notification_unread_counters \
             SET unread_count = GREATEST(unread_count - 1, 0), updated_at = NOW() \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MarkReadResult::Updated)
    }

    /// Mark all unread notifications as read for a user and zero the counter.
    ///
    /// Returns the number of notifications that were marked read.
    pub async fn mark_all_read(pool: &PgPool, user_id: DbId) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "UPDATE notifications \
             SET is_read = true, read_at = NOW() \
             WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE notification_unread_counters \
             SET unread_count = 0, updated_at = NOW() \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Get the user's unread counter (zero when no counter row exists).
    pub async fn unread_count(pool: &PgPool, user_id: DbId) -> Result<i64, sqlx::Error> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT unread_count FROM notification_unread_counters WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(count.unwrap_or(0))
    }
}
