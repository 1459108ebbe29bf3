//! Per-channel delivery outcomes and the aggregate result of `send`.

use serde::{Deserialize, Serialize};

use crate::channels::Channel;
use crate::notification::Notification;
use crate::types::{NotificationId, Timestamp};

// ---------------------------------------------------------------------------
// Skip reasons
// ---------------------------------------------------------------------------

/// The sender needs contact data (address, phone, endpoint) the user lacks.
pub const SKIP_NO_DESTINATION: &str = "no-destination";

/// The user disabled this notification type.
pub const SKIP_TYPE_DISABLED: &str = "type-disabled";

/// No channel survived preference resolution.
pub const SKIP_NO_CHANNELS: &str = "no-channels";

/// The user has no open real-time connection.
pub const SKIP_NO_OPEN_CONNECTION: &str = "no-open-connection";

/// No transport is configured for this channel in this process.
pub const SKIP_CHANNEL_UNAVAILABLE: &str = "channel-unavailable";

/// The channel was routed into the user's digest batch.
pub const SKIP_DIGESTED: &str = "digested";

/// A deferred payload reached its delivery time after `expires_at`.
pub const SKIP_EXPIRED: &str = "expired";

/// Error text recorded for a sender call that exceeded its timeout.
pub const ERROR_TIMEOUT: &str = "timeout";

// ---------------------------------------------------------------------------
// DeliveryResult
// ---------------------------------------------------------------------------

/// What a single channel sender reports for one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryResult {
    Sent,
    /// Not an error: does not count toward failure alerting.
    Skipped { reason: String },
    Failed {
        error: String,
        /// Transient failures (timeouts, provider 5xx) get one delayed retry.
        retryable: bool,
    },
}

impl DeliveryResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            retryable: false,
        }
    }

    pub fn retryable(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            retryable: true,
        }
    }

    pub fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryResult::Sent => DeliveryStatus::Sent,
            DeliveryResult::Skipped { .. } => DeliveryStatus::Skipped,
            DeliveryResult::Failed { .. } => DeliveryStatus::Failed,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryResult::Failed { retryable: true, .. })
    }
}

/// Flattened status stored in `notification_deliveries.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }
}

// ---------------------------------------------------------------------------
// DeliveryAttempt
// ---------------------------------------------------------------------------

/// Outcome of one (notification, channel) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub notification_id: NotificationId,
    pub channel: Channel,
    pub status: DeliveryStatus,
    /// Failure text, or the skip reason for skipped attempts.
    pub error: Option<String>,
    pub attempted_at: Timestamp,
    /// A single delayed retry has been queued for this failure.
    #[serde(default)]
    pub retry_scheduled: bool,
}

impl DeliveryAttempt {
    pub fn new(
        notification_id: NotificationId,
        channel: Channel,
        result: &DeliveryResult,
        attempted_at: Timestamp,
    ) -> Self {
        let error = match result {
            DeliveryResult::Sent => None,
            DeliveryResult::Skipped { reason } => Some(reason.clone()),
            DeliveryResult::Failed { error, .. } => Some(error.clone()),
        };
        Self {
            notification_id,
            channel,
            status: result.status(),
            error,
            attempted_at,
            retry_scheduled: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SendOutcome
// ---------------------------------------------------------------------------

/// Aggregate result of `send`.
///
/// Channel failures never turn into an `Err`; they show up here so callers
/// can tell fully delivered, partially delivered and not sent apart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    /// Channels were dispatched. `digested` counts channels routed into the
    /// digest batch instead of being sent now.
    Dispatched {
        notification: Box<Notification>,
        attempts: Vec<DeliveryAttempt>,
        digested: usize,
    },
    /// Quiet hours are active; a deferred job will deliver at `deliver_at`.
    Deferred { deliver_at: Timestamp },
    /// Every resolved channel went into the digest batch.
    Digested { batch_size: usize },
    /// Nothing was sent or persisted.
    Skipped { reason: String },
}

impl SendOutcome {
    pub fn attempts(&self) -> &[DeliveryAttempt] {
        match self {
            SendOutcome::Dispatched { attempts, .. } => attempts,
            _ => &[],
        }
    }

    fn count(&self, status: DeliveryStatus) -> usize {
        self.attempts().iter().filter(|a| a.status == status).count()
    }

    /// At least one channel sent and none failed.
    pub fn is_fully_delivered(&self) -> bool {
        self.count(DeliveryStatus::Sent) > 0 && self.count(DeliveryStatus::Failed) == 0
    }

    /// Some channels sent, some failed.
    pub fn is_partially_delivered(&self) -> bool {
        self.count(DeliveryStatus::Sent) > 0 && self.count(DeliveryStatus::Failed) > 0
    }

    /// No channel sent anything now (deferred and digested included).
    pub fn is_not_sent(&self) -> bool {
        self.count(DeliveryStatus::Sent) == 0
    }
}
