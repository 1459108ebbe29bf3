//! Per-user notification preferences.
//!
//! A user without a stored row gets [`NotificationPreference::defaults`].
//! Stored rows are always passed through [`NotificationPreference::normalized`]
//! so that channels or types added after the row was written still resolve to
//! their defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::channels::{default_channels, Channel};
use crate::error::CoreError;
use crate::notification::NotificationType;
use crate::quiet_hours;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default quiet-hours window start (local time).
pub const DEFAULT_QUIET_START: &str = "22:00";

/// Default quiet-hours window end (local time).
pub const DEFAULT_QUIET_END: &str = "08:00";

/// Default quiet-hours timezone.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Whether a channel is enabled for a user who never touched their settings.
///
/// SMS is opt-in; everything else is on.
pub fn default_channel_enabled(channel: Channel) -> bool {
    !matches!(channel, Channel::Sms)
}

/// Default per-type preference record.
pub fn default_type_preference(notification_type: NotificationType) -> TypePreference {
    use Channel::*;
    use NotificationType::*;

    let channels: &[Channel] = match notification_type {
        NewMessage | Mention | Reply => &[InApp, Realtime, Email, Push],
        SecurityAlert => &[InApp, Realtime, Email, Sms, Push],
        SystemAnnouncement | Reminder => &[InApp, Realtime, Email],
        Comment | Follow | Like => &[InApp, Realtime],
        Digest => &[Email],
    };

    TypePreference {
        enabled: true,
        channels: channels.iter().copied().collect(),
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Whether a notification type is wanted, and over which channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypePreference {
    pub enabled: bool,
    pub channels: BTreeSet<Channel>,
}

/// A local-time window during which non-urgent notifications are deferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    /// `HH:MM`, local to `timezone`.
    pub start_time: String,
    /// `HH:MM`, local to `timezone`. Earlier than `start_time` means the
    /// window wraps midnight.
    pub end_time: String,
    /// IANA zone name, e.g. `Europe/Berlin`.
    pub timezone: String,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start_time: DEFAULT_QUIET_START.to_string(),
            end_time: DEFAULT_QUIET_END.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

/// How often digest batches are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestInterval {
    #[default]
    Daily,
    Weekly,
}

impl DigestInterval {
    pub const ALL: [DigestInterval; 2] = [DigestInterval::Daily, DigestInterval::Weekly];

    pub fn as_str(self) -> &'static str {
        match self {
            DigestInterval::Daily => "daily",
            DigestInterval::Weekly => "weekly",
        }
    }
}

impl fmt::Display for DigestInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(DigestInterval::Daily),
            "weekly" => Ok(DigestInterval::Weekly),
            other => Err(format!("Invalid digest interval '{other}'")),
        }
    }
}

/// Batching of non-urgent notifications into a periodic digest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DigestMode {
    pub enabled: bool,
    pub interval: DigestInterval,
    /// Keep firing the real-time channel immediately while digesting the rest.
    pub real_time_also_on: bool,
}

/// A user's full, resolved notification preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: DbId,
    #[serde(default)]
    pub channels_enabled: BTreeMap<Channel, bool>,
    #[serde(default)]
    pub type_preferences: BTreeMap<NotificationType, TypePreference>,
    #[serde(default)]
    pub quiet_hours: QuietHours,
    #[serde(default)]
    pub digest_mode: DigestMode,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl NotificationPreference {
    /// Fully populated defaults: every channel and every type present,
    /// quiet hours and digest disabled.
    pub fn defaults(user_id: DbId) -> Self {
        Self {
            user_id,
            channels_enabled: Channel::ALL
                .into_iter()
                .map(|c| (c, default_channel_enabled(c)))
                .collect(),
            type_preferences: NotificationType::ALL
                .into_iter()
                .map(|t| (t, default_type_preference(t)))
                .collect(),
            quiet_hours: QuietHours::default(),
            digest_mode: DigestMode::default(),
            updated_at: None,
        }
    }

    /// Fill any channel or type missing from a stored record with its default.
    pub fn normalized(mut self) -> Self {
        for channel in Channel::ALL {
            self.channels_enabled
                .entry(channel)
                .or_insert_with(|| default_channel_enabled(channel));
        }
        for t in NotificationType::ALL {
            self.type_preferences
                .entry(t)
                .or_insert_with(|| default_type_preference(t));
        }
        self
    }

    pub fn is_channel_enabled(&self, channel: Channel) -> bool {
        self.channels_enabled
            .get(&channel)
            .copied()
            .unwrap_or_else(|| default_channel_enabled(channel))
    }

    pub fn type_preference(&self, notification_type: NotificationType) -> TypePreference {
        self.type_preferences
            .get(&notification_type)
            .cloned()
            .unwrap_or_else(|| default_type_preference(notification_type))
    }

    pub fn is_type_enabled(&self, notification_type: NotificationType) -> bool {
        self.type_preference(notification_type).enabled
    }

    /// Effective channel set for a notification.
    ///
    /// `requested` (the caller's explicit override) falls back to
    /// [`default_channels`]. The result is always intersected with the
    /// globally enabled channels and the type's channels, so an override can
    /// narrow delivery but never widen it past what the user allows.
    pub fn resolve_channels(
        &self,
        notification_type: NotificationType,
        requested: Option<&BTreeSet<Channel>>,
    ) -> BTreeSet<Channel> {
        let type_pref = self.type_preference(notification_type);
        let fallback = default_channels();
        let base = requested.unwrap_or(&fallback);

        base.iter()
            .copied()
            .filter(|c| type_pref.channels.contains(c))
            .filter(|c| self.is_channel_enabled(*c))
            .collect()
    }

    /// Merge a validated partial update into these preferences.
    pub fn apply(&mut self, update: &PreferenceUpdate) -> Result<(), CoreError> {
        update.validate()?;

        if let Some(channels) = &update.channels_enabled {
            for (channel, enabled) in channels {
                self.channels_enabled.insert(*channel, *enabled);
            }
        }

        if let Some(types) = &update.type_preferences {
            for (t, patch) in types {
                let mut current = self.type_preference(*t);
                if let Some(enabled) = patch.enabled {
                    current.enabled = enabled;
                }
                if let Some(channels) = &patch.channels {
                    current.channels = channels.clone();
                }
                self.type_preferences.insert(*t, current);
            }
        }

        if let Some(patch) = &update.quiet_hours {
            let qh = &mut self.quiet_hours;
            if let Some(enabled) = patch.enabled {
                qh.enabled = enabled;
            }
            if let Some(start) = &patch.start_time {
                qh.start_time = start.clone();
            }
            if let Some(end) = &patch.end_time {
                qh.end_time = end.clone();
            }
            if let Some(tz) = &patch.timezone {
                qh.timezone = tz.clone();
            }
        }

        if let Some(patch) = &update.digest_mode {
            let dm = &mut self.digest_mode;
            if let Some(enabled) = patch.enabled {
                dm.enabled = enabled;
            }
            if let Some(interval) = patch.interval {
                dm.interval = interval;
            }
            if let Some(also) = patch.real_time_also_on {
                dm.real_time_also_on = also;
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypePreferenceUpdate {
    pub enabled: Option<bool>,
    pub channels: Option<BTreeSet<Channel>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuietHoursUpdate {
    pub enabled: Option<bool>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestModeUpdate {
    pub enabled: Option<bool>,
    pub interval: Option<DigestInterval>,
    pub real_time_also_on: Option<bool>,
}

/// Input for `update_preferences`. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceUpdate {
    pub channels_enabled: Option<BTreeMap<Channel, bool>>,
    pub type_preferences: Option<BTreeMap<NotificationType, TypePreferenceUpdate>>,
    pub quiet_hours: Option<QuietHoursUpdate>,
    pub digest_mode: Option<DigestModeUpdate>,
}

impl PreferenceUpdate {
    /// Check time formats and timezone names.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(qh) = &self.quiet_hours {
            for time in [&qh.start_time, &qh.end_time].into_iter().flatten() {
                quiet_hours::parse_local_time(time)?;
            }
            if let Some(tz) = &qh.timezone {
                quiet_hours::parse_timezone(tz)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_are_fully_populated() {
        let prefs = NotificationPreference::defaults(1);
        assert_eq!(prefs.channels_enabled.len(), Channel::ALL.len());
        assert_eq!(prefs.type_preferences.len(), NotificationType::ALL.len());
        assert!(!prefs.quiet_hours.enabled);
        assert!(!prefs.digest_mode.enabled);
    }

    #[test]
    fn sms_is_opt_in() {
        let prefs = NotificationPreference::defaults(1);
        assert!(!prefs.is_channel_enabled(Channel::Sms));
        assert!(prefs.is_channel_enabled(Channel::Email));
    }

    #[test]
    fn normalized_fills_missing_keys() {
        let stored = NotificationPreference {
            user_id: 1,
            channels_enabled: BTreeMap::from([(Channel::Email, false)]),
            type_preferences: BTreeMap::new(),
            quiet_hours: QuietHours::default(),
            digest_mode: DigestMode::default(),
            updated_at: None,
        }
        .normalized();

        assert_eq!(stored.channels_enabled.len(), Channel::ALL.len());
        assert!(!stored.is_channel_enabled(Channel::Email));
        assert!(stored.is_channel_enabled(Channel::InApp));
        assert_eq!(stored.type_preferences.len(), NotificationType::ALL.len());
    }

    #[test]
    fn resolve_defaults_to_in_app_and_realtime() {
        let prefs = NotificationPreference::defaults(1);
        let resolved = prefs.resolve_channels(NotificationType::Mention, None);
        assert_eq!(resolved, BTreeSet::from([Channel::InApp, Channel::Realtime]));

        // Digest notifications only allow email, so nothing is left.
        assert!(prefs.resolve_channels(NotificationType::Digest, None).is_empty());
    }

    #[test]
    fn override_intersects_with_preferences() {
        let mut prefs = NotificationPreference::defaults(1);
        prefs.channels_enabled.insert(Channel::Email, false);

        let requested = BTreeSet::from([Channel::Email, Channel::Sms, Channel::InApp]);
        let resolved = prefs.resolve_channels(NotificationType::SecurityAlert, Some(&requested));

        // Email disabled globally, SMS disabled by default.
        assert_eq!(resolved, BTreeSet::from([Channel::InApp]));
    }

    #[test]
    fn override_cannot_add_channel_outside_type() {
        let prefs = NotificationPreference::defaults(1);
        let requested = BTreeSet::from([Channel::Email]);
        let resolved = prefs.resolve_channels(NotificationType::Like, Some(&requested));
        assert!(resolved.is_empty());
    }

    #[test]
    fn apply_merges_partial_update() {
        let mut prefs = NotificationPreference::defaults(1);
        let update = PreferenceUpdate {
            channels_enabled: Some(BTreeMap::from([(Channel::Sms, true)])),
            type_preferences: Some(BTreeMap::from([(
                NotificationType::Like,
                TypePreferenceUpdate {
                    enabled: Some(false),
                    channels: None,
                },
            )])),
            quiet_hours: Some(QuietHoursUpdate {
                enabled: Some(true),
                timezone: Some("Europe/Berlin".to_string()),
                ..Default::default()
            }),
            digest_mode: Some(DigestModeUpdate {
                enabled: Some(true),
                interval: Some(DigestInterval::Weekly),
                real_time_also_on: None,
            }),
        };

        prefs.apply(&update).unwrap();

        assert!(prefs.is_channel_enabled(Channel::Sms));
        assert!(!prefs.is_type_enabled(NotificationType::Like));
        // Channels of the patched type are kept.
        assert_eq!(
            prefs.type_preference(NotificationType::Like).channels,
            default_type_preference(NotificationType::Like).channels
        );
        assert!(prefs.quiet_hours.enabled);
        assert_eq!(prefs.quiet_hours.timezone, "Europe/Berlin");
        assert_eq!(prefs.quiet_hours.start_time, DEFAULT_QUIET_START);
        assert_eq!(prefs.digest_mode.interval, DigestInterval::Weekly);
        assert!(!prefs.digest_mode.real_time_also_on);
    }

    #[test]
    fn apply_rejects_unknown_timezone() {
        let mut prefs = NotificationPreference::defaults(1);
        let update = PreferenceUpdate {
            quiet_hours: Some(QuietHoursUpdate {
                timezone: Some("Mars/Olympus_Mons".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_matches!(prefs.apply(&update), Err(CoreError::Validation(_)));
        assert_eq!(prefs.quiet_hours.timezone, DEFAULT_TIMEZONE);
    }

    #[test]
    fn apply_rejects_malformed_time() {
        let mut prefs = NotificationPreference::defaults(1);
        let update = PreferenceUpdate {
            quiet_hours: Some(QuietHoursUpdate {
                start_time: Some("25:99".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_matches!(prefs.apply(&update), Err(CoreError::Validation(_)));
    }

    #[test]
    fn preference_round_trips_through_json() {
        let prefs = NotificationPreference::defaults(9);
        let json = serde_json::to_value(&prefs).unwrap();
        assert_eq!(json["channels_enabled"]["in_app"], true);
        let back: NotificationPreference = serde_json::from_value(json).unwrap();
        assert_eq!(back, prefs);
    }
}
