//! Notification entity, request payload and validation rules.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::channels::Channel;
use crate::error::CoreError;
use crate::types::{DbId, NotificationId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of a notification title in characters.
pub const MAX_TITLE_LENGTH: u64 = 200;

/// Maximum length of a notification body in characters.
pub const MAX_BODY_LENGTH: u64 = 5_000;

// ---------------------------------------------------------------------------
// NotificationType
// ---------------------------------------------------------------------------

/// The kind of event a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    NewMessage,
    Mention,
    Comment,
    Reply,
    Follow,
    Like,
    Reminder,
    SystemAnnouncement,
    SecurityAlert,
    Digest,
}

impl NotificationType {
    pub const ALL: [NotificationType; 10] = [
        NotificationType::NewMessage,
        NotificationType::Mention,
        NotificationType::Comment,
        NotificationType::Reply,
        NotificationType::Follow,
        NotificationType::Like,
        NotificationType::Reminder,
        NotificationType::SystemAnnouncement,
        NotificationType::SecurityAlert,
        NotificationType::Digest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::NewMessage => "NEW_MESSAGE",
            NotificationType::Mention => "MENTION",
            NotificationType::Comment => "COMMENT",
            NotificationType::Reply => "REPLY",
            NotificationType::Follow => "FOLLOW",
            NotificationType::Like => "LIKE",
            NotificationType::Reminder => "REMINDER",
            NotificationType::SystemAnnouncement => "SYSTEM_ANNOUNCEMENT",
            NotificationType::SecurityAlert => "SECURITY_ALERT",
            NotificationType::Digest => "DIGEST",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown notification type '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Delivery priority. `Urgent` bypasses quiet hours and digest batching.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }

    pub fn is_urgent(self) -> bool {
        self == Priority::Urgent
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Priority::Low),
            "NORMAL" => Ok(Priority::Normal),
            "HIGH" => Ok(Priority::High),
            "URGENT" => Ok(Priority::Urgent),
            other => Err(format!("Unknown priority '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// SendNotification
// ---------------------------------------------------------------------------

/// Caller payload for `send`. Also the payload of deferred delivery jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SendNotification {
    pub user_id: DbId,
    pub notification_type: NotificationType,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub body: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[validate(url)]
    #[serde(default)]
    pub action_url: Option<String>,
    #[validate(url)]
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Explicit channel override. Intersected with user preferences, never
    /// used to bypass them.
    #[serde(default)]
    pub channels: Option<BTreeSet<Channel>>,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
}

impl SendNotification {
    /// Minimal payload with `Normal` priority and default channels.
    pub fn new(
        user_id: DbId,
        notification_type: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            notification_type,
            title: title.into(),
            body: body.into(),
            data: None,
            action_url: None,
            image_url: None,
            priority: Priority::Normal,
            channels: None,
            expires_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.channels = Some(channels.into_iter().collect());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Reject malformed payloads before any side effect.
    pub fn validate_at(&self, now: Timestamp) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        if self.title.trim().is_empty() {
            return Err(CoreError::Validation("Title cannot be blank".to_string()));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return Err(CoreError::Validation(
                    "expires_at must be in the future".to_string(),
                ));
            }
        }
        if matches!(&self.channels, Some(c) if c.is_empty()) {
            return Err(CoreError::Validation(
                "channels, when given, must name at least one channel".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// One logical event delivered to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: DbId,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub action_url: Option<String>,
    pub image_url: Option<String>,
    pub priority: Priority,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
}

impl Notification {
    /// Materialise a payload into a new, unread notification.
    pub fn from_request(request: &SendNotification, now: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            user_id: request.user_id,
            notification_type: request.notification_type,
            title: request.title.clone(),
            body: request.body.clone(),
            data: request
                .data
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            action_url: request.action_url.clone(),
            image_url: request.image_url.clone(),
            priority: request.priority,
            created_at: now,
            expires_at: request.expires_at,
            is_read: false,
            read_at: None,
        }
    }

    /// Replace the generated id with one assigned earlier, e.g. by a queued
    /// job that may run more than once.
    pub fn with_id(mut self, id: NotificationId) -> Self {
        self.id = id;
        self
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Transition to read. Returns `false` if it was already read, leaving
    /// the original `read_at` untouched.
    pub fn mark_read(&mut self, now: Timestamp) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(now);
        true
    }
}

/// Filters for `list_notifications`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    /// 1-based page number. Defaults to 1.
    pub page: Option<u32>,
    /// Page size. Defaults to [`DEFAULT_PAGE_SIZE`], capped at [`MAX_PAGE_SIZE`].
    pub limit: Option<u32>,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub types: Option<Vec<NotificationType>>,
}

/// Default page size for notification listing.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Maximum page size for notification listing.
pub const MAX_PAGE_SIZE: u32 = 100;

impl ListQuery {
    /// Clamped `(limit, offset)` for the storage query.
    pub fn limit_offset(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let page = self.page.unwrap_or(1).max(1);
        (i64::from(limit), i64::from(page - 1) * i64::from(limit))
    }
}

/// One page of a user's feed.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub unread_count: i64,
}
