//! Notification preference models.

use herald_core::preferences::NotificationPreference;
use herald_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `notification_preferences` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PreferenceRow {
    pub user_id: DbId,
    pub preferences: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PreferenceRow {
    /// Decode the stored document, filling in defaults for anything missing.
    pub fn into_preference(self) -> Result<NotificationPreference, serde_json::Error> {
        let mut prefs: NotificationPreference = serde_json::from_value(self.preferences)?;
        prefs.user_id = self.user_id;
        prefs.updated_at = Some(self.updated_at);
        Ok(prefs.normalized())
    }
}
