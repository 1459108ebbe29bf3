//! Repository for the `user_contacts` table.

use herald_core::types::DbId;
use sqlx::PgPool;

use crate::models::contact::UserContact;

/// Read-only access to user contact data.
pub struct ContactRepo;

impl ContactRepo {
    /// Get a user's email address and phone number, if recorded.
    pub async fn get(pool: &PgPool, user_id: DbId) -> Result<Option<UserContact>, sqlx::Error> {
        sqlx::query_as::<_, UserContact>(
            "SELECT user_id, email, phone, updated_at FROM user_contacts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }
}
