/// User ids are PostgreSQL BIGSERIAL keys owned by the user directory.
pub type DbId = i64;

/// Notification ids are UUID v7 so they sort by creation time.
pub type NotificationId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
