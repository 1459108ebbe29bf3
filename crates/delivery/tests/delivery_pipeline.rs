//! Integration tests for the `send` pipeline.
//!
//! Every test drives a full orchestrator over the in-memory store and queue,
//! with recording transports standing in for SMTP and the SMS gateway.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, TimeZone, Utc};
use herald_core::channels::Channel;
use herald_core::delivery::{
    DeliveryStatus, SendOutcome, ERROR_TIMEOUT, SKIP_CHANNEL_UNAVAILABLE, SKIP_NO_OPEN_CONNECTION,
    SKIP_TYPE_DISABLED,
};
use herald_core::jobs::{Job, JOB_STATUS_DONE};
use herald_core::notification::{NotificationType, Priority, SendNotification};
use herald_core::preferences::{PreferenceUpdate, QuietHoursUpdate, TypePreferenceUpdate};
use herald_delivery::{DeliveryError, RealtimeEvent, SessionMessage};

use common::{noon, HangingSender, Harness, PanickingSender, USER, USER_EMAIL};

fn mention() -> SendNotification {
    SendNotification::new(USER, NotificationType::Mention, "You were mentioned", "in #general")
        .with_action_url("https://example.com/c/general")
}

async fn enable_quiet_hours(h: &Harness, start: &str, end: &str, timezone: &str) {
    let update = PreferenceUpdate {
        quiet_hours: Some(QuietHoursUpdate {
            enabled: Some(true),
            start_time: Some(start.to_string()),
            end_time: Some(end.to_string()),
            timezone: Some(timezone.to_string()),
        }),
        ..Default::default()
    };
    h.service.update_preferences(USER, &update).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: end to end over feed, real-time and email
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_reaches_feed_session_and_email() {
    let h = Harness::new();
    let mut session = h.sessions.attach(USER);

    let payload = mention().with_channels([Channel::InApp, Channel::Realtime, Channel::Email]);
    let outcome = h.orchestrator.send_at(&payload, noon()).await.unwrap();

    let SendOutcome::Dispatched {
        notification,
        attempts,
        digested,
    } = &outcome
    else {
        panic!("expected dispatch, got {outcome:?}");
    };
    assert_eq!(*digested, 0);
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a.status == DeliveryStatus::Sent));
    assert!(outcome.is_fully_delivered());

    // Feed row and counter.
    let page = h.service.list_notifications(USER, &Default::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.unread_count, 1);
    assert_eq!(page.items[0].id, notification.id);

    // Live session: the notification, then the refreshed badge.
    assert_matches!(
        session.receiver.try_recv(),
        Ok(SessionMessage::Event(RealtimeEvent::Notification { notification: n })) if n.id == notification.id
    );
    assert_matches!(
        session.receiver.try_recv(),
        Ok(SessionMessage::Event(RealtimeEvent::UnreadCount { count: 1 }))
    );

    // Email.
    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, USER_EMAIL);
    assert_eq!(sent[0].subject, "You were mentioned");
    assert!(sent[0].body.contains("https://example.com/c/general"));

    // Outcomes recorded.
    assert_eq!(h.store.attempts_for(notification.id).len(), 3);
}

// ---------------------------------------------------------------------------
// Test: default channels are in-app and real-time only
// ---------------------------------------------------------------------------

#[tokio::test]
async fn default_channels_are_in_app_and_realtime() {
    let h = Harness::new();

    let outcome = h.orchestrator.send_at(&mention(), noon()).await.unwrap();

    let channels: Vec<Channel> = outcome.attempts().iter().map(|a| a.channel).collect();
    assert_eq!(channels, vec![Channel::InApp, Channel::Realtime]);
    assert!(h.mailer.sent().is_empty());

    let realtime = &outcome.attempts()[1];
    assert_eq!(realtime.status, DeliveryStatus::Skipped);
    assert_eq!(realtime.error.as_deref(), Some(SKIP_NO_OPEN_CONNECTION));
}

// ---------------------------------------------------------------------------
// Test: explicit channels never widen past preferences
// ---------------------------------------------------------------------------

#[tokio::test]
async fn explicit_sms_is_dropped_while_sms_is_disabled() {
    let h = Harness::new();

    let payload = SendNotification::new(USER, NotificationType::SecurityAlert, "New login", "")
        .with_channels([Channel::InApp, Channel::Sms]);
    let outcome = h.orchestrator.send_at(&payload, noon()).await.unwrap();

    let channels: Vec<Channel> = outcome.attempts().iter().map(|a| a.channel).collect();
    assert_eq!(channels, vec![Channel::InApp]);
    assert!(h.sms.sent.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: disabled type is skipped without persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disabled_type_is_skipped() {
    let h = Harness::new();
    let update = PreferenceUpdate {
        type_preferences: Some(BTreeMap::from([(
            NotificationType::Mention,
            TypePreferenceUpdate {
                enabled: Some(false),
                channels: None,
            },
        )])),
        ..Default::default()
    };
    h.service.update_preferences(USER, &update).await.unwrap();

    let outcome = h.orchestrator.send_at(&mention(), noon()).await.unwrap();

    assert_eq!(
        outcome,
        SendOutcome::Skipped {
            reason: SKIP_TYPE_DISABLED.to_string()
        }
    );
    assert_eq!(h.store.feed_len(USER), 0);
    assert!(h.store.attempts_for_user(USER).is_empty());
}

// ---------------------------------------------------------------------------
// Test: quiet hours defer to the end of the window
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quiet_hours_defer_until_window_end() {
    let h = Harness::new();
    enable_quiet_hours(&h, "22:00", "08:00", "UTC").await;

    let at = Utc.with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
    let outcome = h.orchestrator.send_at(&mention(), at).await.unwrap();

    let expected = Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap();
    assert_eq!(outcome, SendOutcome::Deferred { deliver_at: expected });
    assert!(outcome.is_not_sent());
    assert_eq!(h.store.feed_len(USER), 0);

    let jobs = h.queue.pending();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].run_at, expected);
    assert_matches!(jobs[0].job(), Ok(Job::DeferredDelivery(d)) if d.request.title == "You were mentioned");
}

// ---------------------------------------------------------------------------
// Test: quiet hours are evaluated in the user's timezone
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quiet_hours_use_local_time() {
    let h = Harness::new();
    enable_quiet_hours(&h, "22:00", "08:00", "America/New_York").await;

    // 23:30 in New York (EDT, UTC-4).
    let at = Utc.with_ymd_and_hms(2026, 10, 17, 3, 30, 0).unwrap();
    let outcome = h.orchestrator.send_at(&mention(), at).await.unwrap();

    assert_eq!(
        outcome,
        SendOutcome::Deferred {
            deliver_at: Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
        }
    );

    // 12:00 UTC is 08:00 local, outside the window.
    let outcome = h.orchestrator.send_at(&mention(), noon()).await.unwrap();
    assert_matches!(outcome, SendOutcome::Dispatched { .. });
}

// ---------------------------------------------------------------------------
// Test: urgent notifications ignore quiet hours
// ---------------------------------------------------------------------------

#[tokio::test]
async fn urgent_bypasses_quiet_hours() {
    let h = Harness::new();
    enable_quiet_hours(&h, "22:00", "08:00", "UTC").await;

    let at = Utc.with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
    let payload = mention().with_priority(Priority::Urgent);
    let outcome = h.orchestrator.send_at(&payload, at).await.unwrap();

    assert_matches!(outcome, SendOutcome::Dispatched { .. });
    assert_eq!(h.store.feed_len(USER), 1);
    assert!(h.queue.pending().is_empty());
}

// ---------------------------------------------------------------------------
// Test: the deferred job delivers when the window ends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deferred_job_delivers_after_window() {
    let h = Harness::new();
    enable_quiet_hours(&h, "22:00", "08:00", "UTC").await;

    let at = Utc.with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
    let SendOutcome::Deferred { deliver_at } = h.orchestrator.send_at(&mention(), at).await.unwrap()
    else {
        panic!("expected deferral");
    };

    let worker = h.worker();
    assert_eq!(worker.run_once(deliver_at - Duration::minutes(1)).await.unwrap(), 0);
    assert_eq!(worker.run_once(deliver_at).await.unwrap(), 1);

    assert_eq!(h.store.feed_len(USER), 1);
    assert!(h.queue.jobs().iter().all(|j| j.status == JOB_STATUS_DONE));
}

// ---------------------------------------------------------------------------
// Test: a queue outage during deferral does not fail the caller
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deferral_survives_queue_outage() {
    let h = Harness::new();
    enable_quiet_hours(&h, "22:00", "08:00", "UTC").await;
    h.queue.set_unavailable(true);

    let at = Utc.with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
    let outcome = h.orchestrator.send_at(&mention(), at).await.unwrap();

    assert_matches!(outcome, SendOutcome::Deferred { .. });
    assert!(h.queue.jobs().is_empty());
}

// ---------------------------------------------------------------------------
// Test: a panicking channel does not affect its siblings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_channel_is_isolated() {
    let h = Harness::with_overrides(vec![Arc::new(PanickingSender(Channel::Email))]);
    let _session = h.sessions.attach(USER);

    let payload = mention().with_channels([Channel::InApp, Channel::Realtime, Channel::Email]);
    let outcome = h.orchestrator.send_at(&payload, noon()).await.unwrap();

    let statuses: Vec<(Channel, DeliveryStatus)> =
        outcome.attempts().iter().map(|a| (a.channel, a.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (Channel::InApp, DeliveryStatus::Sent),
            (Channel::Realtime, DeliveryStatus::Sent),
            (Channel::Email, DeliveryStatus::Failed),
        ]
    );
    assert!(outcome.is_partially_delivered());
    assert_eq!(h.store.feed_len(USER), 1);
    // Panics are permanent; no retry is queued.
    assert!(h.queue.pending().is_empty());
}

// ---------------------------------------------------------------------------
// Test: a timed-out channel fails retryably and gets one delayed retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timed_out_channel_schedules_single_retry() {
    let h = Harness::with_overrides(vec![Arc::new(HangingSender(Channel::Email))]);

    let payload = mention().with_channels([Channel::InApp, Channel::Email]);
    let outcome = h.orchestrator.send_at(&payload, noon()).await.unwrap();

    let email = outcome
        .attempts()
        .iter()
        .find(|a| a.channel == Channel::Email)
        .unwrap();
    assert_eq!(email.status, DeliveryStatus::Failed);
    assert_eq!(email.error.as_deref(), Some(ERROR_TIMEOUT));
    assert!(email.retry_scheduled);
    assert_eq!(h.store.feed_len(USER), 1);

    let jobs = h.queue.pending();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].run_at, noon() + Duration::seconds(60));
    assert_eq!(jobs[0].max_attempts, 1);
    assert_matches!(
        jobs[0].job(),
        Ok(Job::ChannelRetry { channel: Channel::Email, .. })
    );
}

// ---------------------------------------------------------------------------
// Test: unregistered transports are reported, not fatal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unconfigured_channel_is_skipped() {
    let h = Harness::new();

    let payload = mention().with_channels([Channel::InApp, Channel::Push]);
    let outcome = h.orchestrator.send_at(&payload, noon()).await.unwrap();

    let push = outcome
        .attempts()
        .iter()
        .find(|a| a.channel == Channel::Push)
        .unwrap();
    assert_eq!(push.status, DeliveryStatus::Skipped);
    assert_eq!(push.error.as_deref(), Some(SKIP_CHANNEL_UNAVAILABLE));
}

// ---------------------------------------------------------------------------
// Test: unread count is buffered for offline users
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unread_count_is_replayed_on_next_attach() {
    let h = Harness::new();

    h.orchestrator.send_at(&mention(), noon()).await.unwrap();
    h.orchestrator.send_at(&mention(), noon()).await.unwrap();
    assert_eq!(h.sessions.connection_count(), 0);

    let mut session = h.sessions.attach(USER);
    assert_eq!(session.replayed_unread_count, Some(2));
    assert_matches!(
        session.receiver.try_recv(),
        Ok(SessionMessage::Event(RealtimeEvent::UnreadCount { count: 2 }))
    );
}

// ---------------------------------------------------------------------------
// Test: hard failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_payload_has_no_side_effects() {
    let h = Harness::new();
    let mut payload = mention();
    payload.title = "   ".to_string();

    assert_matches!(
        h.orchestrator.send_at(&payload, noon()).await,
        Err(DeliveryError::Validation(_))
    );

    let past = mention().with_expires_at(noon() - Duration::hours(1));
    assert_matches!(
        h.orchestrator.send_at(&past, noon()).await,
        Err(DeliveryError::Validation(_))
    );

    assert_eq!(h.store.feed_len(USER), 0);
    assert!(h.queue.jobs().is_empty());
}

#[tokio::test]
async fn preference_outage_fails_the_send() {
    let h = Harness::new();
    h.store.faults.preferences.store(true, Ordering::SeqCst);

    assert_matches!(
        h.orchestrator.send_at(&mention(), noon()).await,
        Err(DeliveryError::PreferenceUnavailable(_))
    );
    assert_eq!(h.store.feed_len(USER), 0);
}

#[tokio::test]
async fn feed_write_failure_fails_the_send() {
    let h = Harness::new();
    h.store.faults.feed_writes.store(true, Ordering::SeqCst);

    assert_matches!(
        h.orchestrator.send_at(&mention(), noon()).await,
        Err(DeliveryError::Persistence(_))
    );
    assert!(h.queue.jobs().is_empty());
}

#[tokio::test]
async fn outcome_recording_failure_fails_the_send() {
    let h = Harness::new();
    h.store.faults.delivery_records.store(true, Ordering::SeqCst);

    assert_matches!(
        h.orchestrator.send_at(&mention(), noon()).await,
        Err(DeliveryError::DeliveryLog { .. })
    );
    // The feed row landed before the log write failed.
    assert_eq!(h.store.feed_len(USER), 1);
}

// ---------------------------------------------------------------------------
// Test: a deferred job whose delivery log write fails is not run again
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deferred_job_is_not_resent_after_log_failure() {
    let h = Harness::new();
    enable_quiet_hours(&h, "22:00", "08:00", "UTC").await;
    let payload = mention().with_channels([Channel::InApp, Channel::Email]);

    let at = Utc.with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
    let SendOutcome::Deferred { deliver_at } = h.orchestrator.send_at(&payload, at).await.unwrap()
    else {
        panic!("expected deferral");
    };

    let worker = h.worker();
    h.store.faults.delivery_records.store(true, Ordering::SeqCst);
    assert_eq!(worker.run_once(deliver_at).await.unwrap(), 1);
    h.store.faults.delivery_records.store(false, Ordering::SeqCst);
    worker.run_once(deliver_at + Duration::minutes(10)).await.unwrap();

    assert_eq!(h.store.feed_len(USER), 1);
    assert_eq!(h.mailer.sent().len(), 1);
    assert_eq!(h.service.unread_count(USER).await.unwrap(), 1);
    assert!(h.queue.jobs().iter().all(|j| j.status == JOB_STATUS_DONE));
}

// ---------------------------------------------------------------------------
// Test: a retried deferred job reuses its id and skips channels already sent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retried_deferred_job_resumes_where_it_failed() {
    let h = Harness::new();
    enable_quiet_hours(&h, "22:00", "08:00", "UTC").await;
    let payload = mention().with_channels([Channel::InApp, Channel::Email]);

    let at = Utc.with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
    let SendOutcome::Deferred { deliver_at } = h.orchestrator.send_at(&payload, at).await.unwrap()
    else {
        panic!("expected deferral");
    };
    let Ok(Job::DeferredDelivery(deferred)) = h.queue.pending()[0].job() else {
        panic!("expected a deferred delivery job");
    };

    // The feed write fails after email went out; the job backs off.
    let worker = h.worker();
    h.store.faults.feed_writes.store(true, Ordering::SeqCst);
    worker.run_once(deliver_at).await.unwrap();
    assert_eq!(h.store.feed_len(USER), 0);
    assert_eq!(h.mailer.sent().len(), 1);
    assert_eq!(h.queue.pending().len(), 1);

    h.store.faults.feed_writes.store(false, Ordering::SeqCst);
    assert_eq!(worker.run_once(deliver_at + Duration::minutes(10)).await.unwrap(), 1);

    assert_eq!(h.mailer.sent().len(), 1);
    let page = h.service.list_notifications(USER, &Default::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, deferred.notification_id);
    assert_eq!(page.unread_count, 1);
    assert!(h.queue.jobs().iter().all(|j| j.status == JOB_STATUS_DONE));
}
