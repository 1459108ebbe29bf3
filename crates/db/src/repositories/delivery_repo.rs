//! Repository for the `notification_deliveries` table.

use herald_core::delivery::{DeliveryAttempt, DeliveryStatus};
use herald_core::types::{DbId, NotificationId};
use sqlx::PgPool;

use crate::models::notification::DeliveryRow;

/// Column list for `notification_deliveries` queries.
const COLUMNS: &str =
    "id, notification_id, user_id, channel, status, error, retry_scheduled, attempted_at";

/// Records per-channel delivery outcomes.
pub struct DeliveryRepo;

impl DeliveryRepo {
    /// Insert one row per attempt in a single transaction.
    pub async fn record(
        pool: &PgPool,
        user_id: DbId,
        attempts: &[DeliveryAttempt],
    ) -> Result<(), sqlx::Error> {
        if attempts.is_empty() {
            return Ok(());
        }

        let mut tx = pool.begin().await?;
        for attempt in attempts {
            sqlx::query(
                "INSERT INTO notification_deliveries \
                    (notification_id, user_id, channel, status, error, retry_scheduled, attempted_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(attempt.notification_id)
            .bind(user_id)
            .bind(attempt.channel.as_str())
            .bind(attempt.status.as_str())
            .bind(&attempt.error)
            .bind(attempt.retry_scheduled)
            .bind(attempt.attempted_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    /// List every recorded attempt for a notification, oldest first.
    pub async fn list_for_notification(
        pool: &PgPool,
        notification_id: NotificationId,
    ) -> Result<Vec<DeliveryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_deliveries \
             WHERE notification_id = $1 \
             ORDER BY attempted_at, id"
        );
        sqlx::query_as::<_, DeliveryRow>(&query)
            .bind(notification_id)
            .fetch_all(pool)
            .await
    }

    /// Distinct channels with a `sent` outcome for a notification.
    pub async fn sent_channels(
        pool: &PgPool,
        notification_id: NotificationId,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT channel FROM notification_deliveries \
             WHERE notification_id = $1 AND status = $2",
        )
        .bind(notification_id)
        .bind(DeliveryStatus::Sent.as_str())
        .fetch_all(pool)
        .await
    }
}
