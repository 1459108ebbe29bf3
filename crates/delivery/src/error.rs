//! Error types for the delivery pipeline.
//!
//! Channel failures are not errors: senders report them as
//! [`DeliveryResult`](herald_core::delivery::DeliveryResult) values. The
//! enums here cover the hard failures that abort an operation.

use herald_core::channels::Channel;
use herald_core::error::CoreError;
use herald_core::types::NotificationId;

/// Failure inside a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored JSON document or enum string could not be decoded.
    #[error("Corrupt stored data: {0}")]
    Decode(String),

    /// The backend is reachable but refusing work (used by the in-memory
    /// store to simulate outages).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// Failure while talking to the job queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Job payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Store(StoreError::Database(e))
    }
}

/// Hard failure of a public delivery operation.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The caller's input was rejected before any side effect.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Notification not found: {0}")]
    NotFound(NotificationId),

    /// Preferences could not be loaded, so nothing was sent.
    #[error("Preferences unavailable: {0}")]
    PreferenceUnavailable(#[source] StoreError),

    /// The feed row could not be written, so nothing counts as sent.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Channels already ran but their outcomes could not be recorded.
    /// A job that hits this must not run again.
    #[error("Delivery log write failed for notification {notification_id}: {error}")]
    DeliveryLog {
        notification_id: NotificationId,
        error: String,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A job's only channel failed retryably; the queue backs off and tries
    /// again. Never returned from `send`.
    #[error("Channel {channel} failed: {error}")]
    Channel { channel: Channel, error: String },
}

impl From<CoreError> for DeliveryError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation(msg) | CoreError::Unauthorized(msg) => {
                DeliveryError::Validation(msg)
            }
            CoreError::NotFound { id, .. } => DeliveryError::NotFound(id),
            CoreError::Internal(msg) => DeliveryError::Persistence(msg),
        }
    }
}

impl From<StoreError> for DeliveryError {
    fn from(e: StoreError) -> Self {
        DeliveryError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn core_validation_maps_to_validation() {
        let err: DeliveryError = CoreError::Validation("bad title".into()).into();
        assert_matches!(err, DeliveryError::Validation(msg) if msg == "bad title");
    }

    #[test]
    fn store_error_maps_to_persistence() {
        let err: DeliveryError = StoreError::Unavailable("down".into()).into();
        assert_matches!(err, DeliveryError::Persistence(_));
        assert_eq!(err.to_string(), "Persistence failed: Store unavailable: down");
    }
}
