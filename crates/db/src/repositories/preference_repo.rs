//! Repository for the `notification_preferences` table.

use herald_core::types::DbId;
use sqlx::PgPool;

use crate::models::preference::PreferenceRow;

/// Column list for `notification_preferences` queries.
const COLUMNS: &str = "user_id, preferences, created_at, updated_at";

/// Reads and writes per-user preference documents.
pub struct PreferenceRepo;

impl PreferenceRepo {
    /// Get the stored preference document for a user, if any.
    pub async fn get(pool: &PgPool, user_id: DbId) -> Result<Option<PreferenceRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM notification_preferences WHERE user_id = $1");
        sqlx::query_as::<_, PreferenceRow>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Insert or replace the preference document for a user.
    pub async fn upsert(
        pool: &PgPool,
        user_id: DbId,
        preferences: &serde_json::Value,
    ) -> Result<PreferenceRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO notification_preferences (user_id, preferences) \
             VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET \
                preferences = EXCLUDED.preferences, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PreferenceRow>(&query)
            .bind(user_id)
            .bind(preferences)
            .fetch_one(pool)
            .await
    }
}
