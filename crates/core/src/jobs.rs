//! Durable job definitions and queue retry policy.
//!
//! Jobs are stored as a `kind` string plus a JSON `payload`; [`Job`] is the
//! typed view of that pair. This module lives in `core` so the db crate can
//! write digest-delivery jobs in the same transaction that drains a batch.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channels::Channel;
use crate::digest::{next_flush_after, DigestItem};
use crate::notification::{Notification, SendNotification};
use crate::preferences::DigestInterval;
use crate::types::{DbId, NotificationId, Timestamp};

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// First queue-level retry delay.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on queue-level retry delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(600);

/// Exponential backoff for the `attempts`-th failure (1-based): 5 s, 10 s,
/// 20 s, ... capped at ten minutes.
pub fn retry_backoff(attempts: i32) -> Duration {
    let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(RETRY_MAX_DELAY)
}

// ---------------------------------------------------------------------------
// JobKind / JobStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DeferredDelivery,
    ChannelRetry,
    DigestFlush,
    DigestDelivery,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::DeferredDelivery => "deferred_delivery",
            JobKind::ChannelRetry => "channel_retry",
            JobKind::DigestFlush => "digest_flush",
            JobKind::DigestDelivery => "digest_delivery",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status values stored in `queued_jobs.status`.
pub const JOB_STATUS_PENDING: &str = "pending";
pub const JOB_STATUS_RUNNING: &str = "running";
pub const JOB_STATUS_DONE: &str = "done";
pub const JOB_STATUS_DEAD: &str = "dead";

// ---------------------------------------------------------------------------
// Repeat
// ---------------------------------------------------------------------------

/// Fixed recurring schedules. Both fire at the digest flush hour (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    Daily,
    Weekly,
}

impl Repeat {
    pub fn as_str(self) -> &'static str {
        match self {
            Repeat::Daily => "daily",
            Repeat::Weekly => "weekly",
        }
    }

    /// Next run strictly after `after`.
    pub fn next_after(self, after: Timestamp) -> Timestamp {
        next_flush_after(self.into(), after)
    }
}

impl From<Repeat> for DigestInterval {
    fn from(repeat: Repeat) -> Self {
        match repeat {
            Repeat::Daily => DigestInterval::Daily,
            Repeat::Weekly => DigestInterval::Weekly,
        }
    }
}

impl From<DigestInterval> for Repeat {
    fn from(interval: DigestInterval) -> Self {
        match interval {
            DigestInterval::Daily => Repeat::Daily,
            DigestInterval::Weekly => Repeat::Weekly,
        }
    }
}

impl FromStr for Repeat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Repeat::Daily),
            "weekly" => Ok(Repeat::Weekly),
            other => Err(format!("Unknown repeat schedule '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Payload of a quiet-hours deferral.
///
/// The notification id is assigned when the job is enqueued, so every run of
/// the job delivers the same notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredDelivery {
    pub notification_id: NotificationId,
    pub request: SendNotification,
}

impl DeferredDelivery {
    pub fn new(request: SendNotification) -> Self {
        Self {
            notification_id: NotificationId::now_v7(),
            request,
        }
    }
}

/// Payload of a per-user digest delivery: the drained batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestDelivery {
    /// Id of the consolidated digest notification, fixed at drain time.
    pub notification_id: NotificationId,
    pub user_id: DbId,
    pub interval: DigestInterval,
    pub items: Vec<DigestItem>,
}

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Job {
    /// Deliver a payload held back by quiet hours.
    DeferredDelivery(DeferredDelivery),
    /// Single delayed retry of one failed channel.
    ChannelRetry {
        notification: Box<Notification>,
        channel: Channel,
    },
    /// Recurring flush of every pending batch for an interval.
    DigestFlush { interval: DigestInterval },
    /// Send one user's drained batch as a consolidated email.
    DigestDelivery(DigestDelivery),
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::DeferredDelivery(_) => JobKind::DeferredDelivery,
            Job::ChannelRetry { .. } => JobKind::ChannelRetry,
            Job::DigestFlush { .. } => JobKind::DigestFlush,
            Job::DigestDelivery(_) => JobKind::DigestDelivery,
        }
    }

    /// The JSON stored in `queued_jobs.payload`.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("payload")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Rebuild a job from its stored `kind` and `payload` columns.
    pub fn from_parts(kind: &str, payload: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "kind": kind, "payload": payload }))
    }
}
