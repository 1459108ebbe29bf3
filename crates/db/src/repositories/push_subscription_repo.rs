//! Repository for the `push_subscriptions` table.

use herald_core::types::DbId;
use sqlx::PgPool;

use crate::models::push_subscription::{NewPushSubscription, PushSubscription};

/// Column list for `push_subscriptions` queries.
const COLUMNS: &str = "id, user_id, endpoint, p256dh, auth, user_agent, created_at, last_used_at";

/// Provides CRUD operations for push endpoints.
pub struct PushSubscriptionRepo;

impl PushSubscriptionRepo {
    /// Register an endpoint, refreshing its keys if it already exists.
    pub async fn upsert(
        pool: &PgPool,
        user_id: DbId,
        input: &NewPushSubscription,
    ) -> Result<PushSubscription, sqlx::Error> {
        let query = format!(
            "INSERT INTO push_subscriptions (user_id, endpoint, p256dh, auth, user_agent) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, endpoint) DO UPDATE SET \
                p256dh = EXCLUDED.p256dh, \
                auth = EXCLUDED.auth, \
                user_agent = EXCLUDED.user_agent \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PushSubscription>(&query)
            .bind(user_id)
            .bind(&input.endpoint)
            .bind(&input.keys.p256dh)
            .bind(&input.keys.auth)
            .bind(&input.user_agent)
            .fetch_one(pool)
            .await
    }

    /// List all endpoints registered for a user.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<PushSubscription>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM push_subscriptions WHERE user_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, PushSubscription>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Remove an endpoint. Returns `true` if a row was deleted.
    pub async fn delete(pool: &PgPool, user_id: DbId, endpoint: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM push_subscriptions WHERE user_id = $1 AND endpoint = $2")
                .bind(user_id)
                .bind(endpoint)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a successful push to an endpoint.
    pub async fn touch(pool: &PgPool, user_id: DbId, endpoint: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE push_subscriptions SET last_used_at = NOW() \
             WHERE user_id = $1 AND endpoint = $2",
        )
        .bind(user_id)
        .bind(endpoint)
        .execute(pool)
        .await?;
        Ok(())
    }
}
