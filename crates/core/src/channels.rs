//! Delivery channels.
//!
//! The string forms must match the values stored in
//! `notification_deliveries.channel` and the keys of the
//! `notification_preferences.channels_enabled` JSON map.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// In-app feed: the notification row shown in the notification bell.
pub const CHANNEL_IN_APP: &str = "in_app";

/// Real-time push over an open WebSocket connection.
pub const CHANNEL_REALTIME: &str = "realtime";

/// Email delivered via SMTP.
pub const CHANNEL_EMAIL: &str = "email";

/// SMS delivered via the SMS gateway.
pub const CHANNEL_SMS: &str = "sms";

/// Browser/mobile push delivered via the push gateway.
pub const CHANNEL_PUSH: &str = "push";

/// A delivery medium for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Realtime,
    Email,
    Sms,
    Push,
}

impl Channel {
    /// Every channel the core knows about, in preference-map order.
    pub const ALL: [Channel; 5] = [
        Channel::InApp,
        Channel::Realtime,
        Channel::Email,
        Channel::Sms,
        Channel::Push,
    ];

    /// Stable string form used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::InApp => CHANNEL_IN_APP,
            Channel::Realtime => CHANNEL_REALTIME,
            Channel::Email => CHANNEL_EMAIL,
            Channel::Sms => CHANNEL_SMS,
            Channel::Push => CHANNEL_PUSH,
        }
    }

    /// Whether the channel delivers over a live connection.
    ///
    /// Only real-time delivery may bypass digest batching when the user has
    /// `real_time_also_on` set.
    pub fn is_real_time(self) -> bool {
        matches!(self, Channel::Realtime)
    }

    /// Per-call timeout applied by the orchestrator around the sender.
    pub fn default_timeout(self) -> Duration {
        match self {
            Channel::InApp => Duration::from_secs(5),
            Channel::Realtime => Duration::from_secs(2),
            Channel::Email => Duration::from_secs(30),
            Channel::Sms => Duration::from_secs(15),
            Channel::Push => Duration::from_secs(15),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Invalid channel '{s}'. Must be one of: {}",
                    Channel::ALL.map(Channel::as_str).join(", ")
                )
            })
    }
}

/// Channels used when the caller does not name any explicitly.
pub fn default_channels() -> BTreeSet<Channel> {
    BTreeSet::from([Channel::InApp, Channel::Realtime])
}
