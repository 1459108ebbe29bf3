//! Digest batching rules: bucket keys, flush schedule and rendering.

use std::fmt::Write as _;

use chrono::{Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::notification::{Notification, NotificationType, Priority, SendNotification};
use crate::preferences::DigestInterval;
use crate::types::{DbId, Timestamp};

/// Hour of day (UTC) at which digest flushes run.
pub const DIGEST_FLUSH_HOUR_UTC: u32 = 8;

/// Weekly digests flush on this weekday.
pub const WEEKLY_FLUSH_WEEKDAY: Weekday = Weekday::Mon;

/// One pending notification flattened for a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestItem {
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub arrived_at: Timestamp,
}

impl DigestItem {
    pub fn from_request(request: &SendNotification, arrived_at: Timestamp) -> Self {
        Self {
            notification_type: request.notification_type,
            title: request.title.clone(),
            body: request.body.clone(),
            link: request.action_url.clone(),
            arrived_at,
        }
    }
}

/// Bucket key a notification arriving at `at` is batched under.
///
/// Daily buckets are the UTC date (`2026-10-16`); weekly buckets are the ISO
/// week (`2026-W42`).
pub fn bucket_for(interval: DigestInterval, at: Timestamp) -> String {
    match interval {
        DigestInterval::Daily => at.format("%Y-%m-%d").to_string(),
        DigestInterval::Weekly => {
            let week = at.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
    }
}

/// The first scheduled flush strictly after `after`.
pub fn next_flush_after(interval: DigestInterval, after: Timestamp) -> Timestamp {
    let flush_time = NaiveTime::from_hms_opt(DIGEST_FLUSH_HOUR_UTC, 0, 0).unwrap_or_default();
    let mut date = after.date_naive();
    loop {
        let candidate = Utc.from_utc_datetime(&date.and_time(flush_time));
        let weekday_ok = match interval {
            DigestInterval::Daily => true,
            DigestInterval::Weekly => date.weekday() == WEEKLY_FLUSH_WEEKDAY,
        };
        if weekday_ok && candidate > after {
            return candidate;
        }
        date += Duration::days(1);
    }
}

/// Render the consolidated digest subject and plain-text body.
///
/// Items are listed in arrival order.
pub fn render_digest(interval: DigestInterval, items: &[DigestItem]) -> (String, String) {
    let mut ordered: Vec<&DigestItem> = items.iter().collect();
    ordered.sort_by_key(|item| item.arrived_at);

    let noun = if ordered.len() == 1 {
        "notification"
    } else {
        "notifications"
    };
    let subject = format!("Your {} digest: {} {noun}", interval, ordered.len());

    let mut body = String::new();
    for (i, item) in ordered.iter().enumerate() {
        let _ = writeln!(body, "{}. {}", i + 1, item.title);
        if !item.body.is_empty() {
            let _ = writeln!(body, "   {}", item.body);
        }
        if let Some(link) = &item.link {
            let _ = writeln!(body, "   {link}");
        }
    }

    (subject, body)
}

/// Build the single notification that carries a user's digest.
pub fn digest_notification(
    user_id: DbId,
    interval: DigestInterval,
    items: &[DigestItem],
    now: Timestamp,
) -> Notification {
    let (title, body) = render_digest(interval, items);
    let request = SendNotification::new(user_id, NotificationType::Digest, title, body)
        .with_priority(Priority::Low)
        .with_data(serde_json::json!({
            "interval": interval.as_str(),
            "item_count": items.len(),
        }));
    Notification::from_request(&request, now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, minute: u32) -> DigestItem {
        DigestItem {
            notification_type: NotificationType::Comment,
            title: title.to_string(),
            body: format!("{title} body"),
            link: Some(format!("https://example.com/{title}")),
            arrived_at: Utc.with_ymd_and_hms(2026, 10, 16, 9, minute, 0).unwrap(),
        }
    }

    #[test]
    fn daily_bucket_is_utc_date() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 23, 59, 0).unwrap();
        assert_eq!(bucket_for(DigestInterval::Daily, at), "2026-10-16");
    }

    #[test]
    fn weekly_bucket_is_iso_week() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        assert_eq!(bucket_for(DigestInterval::Weekly, at), "2026-W42");
    }

    #[test]
    fn next_daily_flush_is_today_or_tomorrow() {
        let before = Utc.with_ymd_and_hms(2026, 10, 16, 7, 0, 0).unwrap();
        assert_eq!(
            next_flush_after(DigestInterval::Daily, before),
            Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap()
        );
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap();
        assert_eq!(
            next_flush_after(DigestInterval::Daily, at),
            Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_weekly_flush_is_monday() {
        // 2026-10-16 is a Friday.
        let friday = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let next = next_flush_after(DigestInterval::Weekly, friday);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap());
        assert_eq!(next.weekday(), Weekday::Mon);
    }

    #[test]
    fn render_orders_by_arrival() {
        let items = vec![item("third", 30), item("first", 10), item("second", 20)];
        let (subject, body) = render_digest(DigestInterval::Daily, &items);

        assert_eq!(subject, "Your daily digest: 3 notifications");
        let first = body.find("first").unwrap();
        let second = body.find("second").unwrap();
        let third = body.find("third").unwrap();
        assert!(first < second && second < third);
        assert!(body.contains("https://example.com/second"));
    }

    #[test]
    fn digest_notification_is_low_priority_digest_type() {
        let now = Utc::now();
        let n = digest_notification(5, DigestInterval::Weekly, &[item("a", 1)], now);
        assert_eq!(n.notification_type, NotificationType::Digest);
        assert_eq!(n.priority, Priority::Low);
        assert_eq!(n.data["item_count"], 1);
        assert_eq!(n.title, "Your weekly digest: 1 notification");
    }
}
