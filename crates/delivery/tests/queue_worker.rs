//! Integration tests for the queue worker: channel retries, backoff,
//! dead-lettering and recurring jobs.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use herald_core::channels::Channel;
use herald_core::delivery::DeliveryStatus;
use herald_core::jobs::{
    Job, JobKind, Repeat, JOB_STATUS_DEAD, JOB_STATUS_DONE, JOB_STATUS_PENDING,
};
use herald_core::notification::{NotificationType, SendNotification};
use herald_core::preferences::{DigestInterval, PreferenceUpdate};
use herald_delivery::queue::EnqueueOptions;
use herald_delivery::{DeliveryError, JobHandler, JobQueue, MemoryQueue, QueueWorker};

use common::{noon, FlakySender, Harness, USER};

async fn enable_sms(h: &Harness) {
    let update = PreferenceUpdate {
        channels_enabled: Some(BTreeMap::from([(Channel::Sms, true)])),
        ..Default::default()
    };
    h.service.update_preferences(USER, &update).await.unwrap();
}

fn security_alert() -> SendNotification {
    SendNotification::new(USER, NotificationType::SecurityAlert, "New login", "From Berlin")
        .with_channels([Channel::InApp, Channel::Sms])
}

/// Fails every call and counts them.
#[derive(Default)]
struct AlwaysFails {
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for AlwaysFails {
    async fn handle(&self, _job: Job) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::Persistence("database is down".into()))
    }
}

fn flush_job() -> Job {
    Job::DigestFlush {
        interval: DigestInterval::Daily,
    }
}

// ---------------------------------------------------------------------------
// Test: a retryable channel failure succeeds on its delayed retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn channel_retry_recovers() {
    let flaky = Arc::new(FlakySender::new(Channel::Sms, 1));
    let h = Harness::with_overrides(vec![flaky.clone()]);
    enable_sms(&h).await;

    let outcome = h.orchestrator.send_at(&security_alert(), noon()).await.unwrap();
    let sms = outcome
        .attempts()
        .iter()
        .find(|a| a.channel == Channel::Sms)
        .unwrap();
    assert_eq!(sms.status, DeliveryStatus::Failed);
    assert!(sms.retry_scheduled);
    let notification_id = sms.notification_id;

    let worker = h.worker();
    assert_eq!(worker.run_once(noon() + Duration::seconds(59)).await.unwrap(), 0);
    assert_eq!(worker.run_once(noon() + Duration::seconds(60)).await.unwrap(), 1);

    assert_eq!(flaky.calls(), 2);
    let recorded = h.store.attempts_for(notification_id);
    let last_sms = recorded
        .iter()
        .filter(|a| a.channel == Channel::Sms)
        .last()
        .unwrap();
    assert_eq!(last_sms.status, DeliveryStatus::Sent);
    assert!(h.queue.jobs().iter().all(|j| j.status == JOB_STATUS_DONE));
}

// ---------------------------------------------------------------------------
// Test: a second failure is final
// ---------------------------------------------------------------------------

#[tokio::test]
async fn channel_retry_failure_is_permanent() {
    let flaky = Arc::new(FlakySender::new(Channel::Sms, 2));
    let h = Harness::with_overrides(vec![flaky.clone()]);
    enable_sms(&h).await;

    h.orchestrator.send_at(&security_alert(), noon()).await.unwrap();

    let worker = h.worker();
    worker.run_once(noon() + Duration::seconds(60)).await.unwrap();
    // Nothing left to run, however far ahead we look.
    assert_eq!(worker.run_once(noon() + Duration::days(30)).await.unwrap(), 0);

    assert_eq!(flaky.calls(), 2);
    let sms_attempts: Vec<_> = h
        .store
        .attempts_for_user(USER)
        .into_iter()
        .filter(|a| a.channel == Channel::Sms)
        .collect();
    assert_eq!(sms_attempts.len(), 2);
    assert!(sms_attempts.iter().all(|a| a.status == DeliveryStatus::Failed));
    assert!(!sms_attempts[1].retry_scheduled);
}

// ---------------------------------------------------------------------------
// Test: failing jobs back off exponentially, then dead-letter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_job_backs_off_then_dead_letters() {
    let queue = Arc::new(MemoryQueue::new());
    let handler = Arc::new(AlwaysFails::default());
    let worker = QueueWorker::new(queue.clone()).process(JobKind::DigestFlush, handler.clone());

    let now = Utc::now();
    let id = queue
        .enqueue(&flush_job(), EnqueueOptions::at(now).with_max_attempts(3))
        .await
        .unwrap()
        .unwrap();

    worker.run_once(now).await.unwrap();
    let job = queue.get(id).unwrap();
    assert_eq!(job.status, JOB_STATUS_PENDING);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.run_at, now + Duration::seconds(5));
    assert_eq!(job.last_error.as_deref(), Some("Persistence failed: database is down"));

    let second = now + Duration::seconds(5);
    worker.run_once(second).await.unwrap();
    assert_eq!(queue.get(id).unwrap().run_at, second + Duration::seconds(10));

    worker.run_once(second + Duration::seconds(10)).await.unwrap();
    let job = queue.get(id).unwrap();
    assert_eq!(job.status, JOB_STATUS_DEAD);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Test: jobs without a handler are dead-lettered
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unhandled_kind_is_dead_lettered() {
    let queue = Arc::new(MemoryQueue::new());
    let worker = QueueWorker::new(queue.clone());

    let id = queue
        .enqueue(&flush_job(), EnqueueOptions::default())
        .await
        .unwrap()
        .unwrap();
    worker.run_once(Utc::now() + Duration::seconds(1)).await.unwrap();

    let job = queue.get(id).unwrap();
    assert_eq!(job.status, JOB_STATUS_DEAD);
    assert_eq!(job.last_error.as_deref(), Some("no handler registered"));
}

// ---------------------------------------------------------------------------
// Test: an exhausted recurring job skips to its next occurrence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_recurring_job_is_rescheduled() {
    let queue = Arc::new(MemoryQueue::new());
    let worker = QueueWorker::new(queue.clone())
        .process(JobKind::DigestFlush, Arc::new(AlwaysFails::default()));

    let id = queue
        .enqueue(
            &flush_job(),
            EnqueueOptions::at(noon())
                .with_repeat(Repeat::Daily)
                .with_max_attempts(1),
        )
        .await
        .unwrap()
        .unwrap();
    worker.run_once(noon()).await.unwrap();

    let job = queue.get(id).unwrap();
    assert_eq!(job.status, JOB_STATUS_PENDING);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.run_at, Repeat::Daily.next_after(noon()));
}

// ---------------------------------------------------------------------------
// Test: dedupe keys make enqueue idempotent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dedupe_key_suppresses_second_enqueue() {
    let queue = MemoryQueue::new();
    let options = || EnqueueOptions::default().with_dedupe_key("digest_flush:daily");

    assert!(queue.enqueue(&flush_job(), options()).await.unwrap().is_some());
    assert!(queue.enqueue(&flush_job(), options()).await.unwrap().is_none());
    assert_eq!(queue.jobs().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: the worker loop stops on cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worker_stops_when_cancelled() {
    let queue = Arc::new(MemoryQueue::new());
    let worker = QueueWorker::new(queue).with_poll_interval(std::time::Duration::from_millis(5));
    let cancel = tokio_util::sync::CancellationToken::new();

    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { worker.run(cancel).await }
    });
    cancel.cancel();

    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}
