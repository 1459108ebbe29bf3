//! Push subscription models.

use herald_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `push_subscriptions` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct PushSubscription {
    pub id: DbId,
    pub user_id: DbId,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_agent: Option<String>,
    pub created_at: Timestamp,
    pub last_used_at: Option<Timestamp>,
}

/// Browser-supplied subscription keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// DTO for registering a push endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
    pub user_agent: Option<String>,
}
