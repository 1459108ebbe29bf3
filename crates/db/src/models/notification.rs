//! Notification entity models and DTOs.

use herald_core::error::CoreError;
use herald_core::notification::Notification;
use herald_core::types::{DbId, NotificationId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `notifications` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotificationRow {
    pub id: NotificationId,
    pub user_id: DbId,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub action_url: Option<String>,
    pub image_url: Option<String>,
    pub priority: String,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = CoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            notification_type: row.notification_type.parse().map_err(CoreError::Internal)?,
            title: row.title,
            body: row.body,
            data: row.data,
            action_url: row.action_url,
            image_url: row.image_url,
            priority: row.priority.parse().map_err(CoreError::Internal)?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            is_read: row.is_read,
            read_at: row.read_at,
        })
    }
}

/// A row from the `notification_deliveries` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeliveryRow {
    pub id: DbId,
    pub notification_id: NotificationId,
    pub user_id: DbId,
    pub channel: String,
    pub status: String,
    pub error: Option<String>,
    pub retry_scheduled: bool,
    pub attempted_at: Timestamp,
}

/// Result of marking one notification read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadResult {
    /// The row flipped from unread to read; the counter was decremented.
    Updated,
    /// The row was already read; nothing changed.
    AlreadyRead,
    /// No such notification for this user.
    NotFound,
}

/// Filters for feed listing, already clamped by the caller.
#[derive(Debug, Clone)]
pub struct NotificationFilter<'a> {
    pub user_id: DbId,
    pub unread_only: bool,
    /// `notification_type` strings; `None` means all types.
    pub types: Option<&'a [String]>,
    /// Rows expiring at or before this instant are hidden.
    pub now: Timestamp,
}
