//! Shared harness for delivery integration tests: in-memory stores, the
//! in-memory queue and recording transports wired into a full pipeline.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use herald_core::channels::Channel;
use herald_core::delivery::DeliveryResult;
use herald_core::notification::Notification;
use herald_core::types::{DbId, Timestamp};
use herald_delivery::channels::email::{EmailError, EmailMessage};
use herald_delivery::channels::{
    EmailSender, GatewayError, InAppSender, Mailer, RealtimeSender, SmsGateway, SmsSender,
};
use herald_delivery::orchestrator::OrchestratorConfig;
use herald_delivery::scheduler::build_worker;
use herald_delivery::{
    ChannelSender, ChannelSet, DeliveryOrchestrator, MemoryQueue, MemoryStore,
    NotificationService, PreferenceAccessor, QueueWorker, SessionRegistry,
};

pub const USER: DbId = 1;
pub const USER_EMAIL: &str = "ada@example.com";

/// 2026-10-16 12:00 UTC, outside the default quiet window.
pub fn noon() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Recording transports
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub reject: AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(EmailError::Build("rejected".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<(String, String)>>,
    /// Answer with this HTTP status instead of accepting.
    pub fail_status: Mutex<Option<u16>>,
}

#[async_trait]
impl SmsGateway for RecordingSms {
    async fn send_sms(&self, to: &str, text: &str) -> Result<(), GatewayError> {
        if let Some(status) = *self.fail_status.lock().unwrap() {
            return Err(GatewayError::HttpStatus(status));
        }
        self.sent.lock().unwrap().push((to.to_string(), text.to_string()));
        Ok(())
    }
}

/// A sender that panics on every call.
pub struct PanickingSender(pub Channel);

#[async_trait]
impl ChannelSender for PanickingSender {
    fn channel(&self) -> Channel {
        self.0
    }

    async fn send(&self, _: &Notification) -> DeliveryResult {
        panic!("transport exploded");
    }
}

/// A sender that never finishes within its timeout.
pub struct HangingSender(pub Channel);

#[async_trait]
impl ChannelSender for HangingSender {
    fn channel(&self) -> Channel {
        self.0
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(20)
    }

    async fn send(&self, _: &Notification) -> DeliveryResult {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        DeliveryResult::Sent
    }
}

/// Fails retryably `failures` times, then succeeds.
pub struct FlakySender {
    pub channel: Channel,
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl FlakySender {
    pub fn new(channel: Channel, failures: usize) -> Self {
        Self {
            channel,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelSender for FlakySender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, _: &Notification) -> DeliveryResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            DeliveryResult::retryable("provider returned 503")
        } else {
            DeliveryResult::Sent
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub sessions: Arc<SessionRegistry>,
    pub preferences: Arc<PreferenceAccessor>,
    pub mailer: Arc<RecordingMailer>,
    pub sms: Arc<RecordingSms>,
    pub orchestrator: Arc<DeliveryOrchestrator>,
    pub service: NotificationService,
}

impl Harness {
    /// Every built-in channel except push, with `USER` holding an email
    /// address and a phone number.
    pub fn new() -> Self {
        Self::with_overrides(Vec::new())
    }

    /// Like [`Harness::new`], with `overrides` replacing the built-in sender
    /// of their channel.
    pub fn with_overrides(overrides: Vec<Arc<dyn ChannelSender>>) -> Self {
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(MemoryStore::new(Arc::clone(&queue)));
        store.set_contact(USER, Some(USER_EMAIL), Some("+15550100"));

        let sessions = Arc::new(SessionRegistry::new());
        let preferences = Arc::new(PreferenceAccessor::new(store.clone()));
        let mailer = Arc::new(RecordingMailer::default());
        let sms = Arc::new(RecordingSms::default());

        let mut senders = ChannelSet::new()
            .with(Arc::new(InAppSender::new(store.clone())))
            .with(Arc::new(RealtimeSender::new(Arc::clone(&sessions))))
            .with(Arc::new(EmailSender::new(store.clone(), mailer.clone())))
            .with(Arc::new(SmsSender::new(store.clone(), sms.clone())));
        for sender in overrides {
            senders.register(sender);
        }

        let orchestrator = Arc::new(
            DeliveryOrchestrator::new(
                Arc::clone(&preferences),
                store.clone(),
                store.clone(),
                queue.clone(),
                Arc::clone(&sessions),
                senders,
            )
            .with_config(OrchestratorConfig {
                channel_retry_delay: Duration::from_secs(60),
            }),
        );
        let service = NotificationService::new(
            Arc::clone(&orchestrator),
            Arc::clone(&preferences),
            store.clone(),
            store.clone(),
        );

        Self {
            store,
            queue,
            sessions,
            preferences,
            mailer,
            sms,
            orchestrator,
            service,
        }
    }

    pub fn worker(&self) -> QueueWorker {
        build_worker(
            self.queue.clone(),
            Arc::clone(&self.orchestrator),
            self.store.clone(),
        )
    }
}
