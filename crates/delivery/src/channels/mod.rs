//! Channel senders: one per delivery medium.
//!
//! A sender turns a [`Notification`] into a [`DeliveryResult`]. Senders never
//! return errors; transport failures are reported as `Failed` values and
//! missing contact data as `Skipped`. [`dispatch`] wraps a sender call with
//! its timeout and isolates panics so one channel cannot take down a fan-out.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use herald_core::channels::Channel;
use herald_core::delivery::{DeliveryResult, ERROR_TIMEOUT};
use herald_core::notification::Notification;

pub mod email;
pub mod in_app;
pub mod push;
pub mod realtime;
pub mod sms;

pub use email::{EmailConfig, EmailSender, Mailer, SmtpMailer};
pub use in_app::InAppSender;
pub use push::{HttpPushGateway, PushConfig, PushGateway, PushSender};
pub use realtime::RealtimeSender;
pub use sms::{HttpSmsGateway, SmsConfig, SmsGateway, SmsSender};

// ---------------------------------------------------------------------------
// ChannelSender
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// Upper bound on a single [`send`](Self::send) call.
    fn timeout(&self) -> Duration {
        self.channel().default_timeout()
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult;
}

/// Run one sender under its timeout. A timeout is a retryable failure; a
/// panic is a permanent one.
pub async fn dispatch(sender: &dyn ChannelSender, notification: &Notification) -> DeliveryResult {
    let channel = sender.channel();
    let call = AssertUnwindSafe(sender.send(notification)).catch_unwind();

    match tokio::time::timeout(sender.timeout(), call).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            tracing::error!(
                notification_id = %notification.id,
                channel = %channel,
                "Channel sender panicked"
            );
            DeliveryResult::failed("sender panicked")
        }
        Err(_) => {
            tracing::warn!(
                notification_id = %notification.id,
                channel = %channel,
                timeout_ms = sender.timeout().as_millis() as u64,
                "Channel sender timed out"
            );
            DeliveryResult::retryable(ERROR_TIMEOUT)
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelSet
// ---------------------------------------------------------------------------

/// The senders available in this process, keyed by channel.
///
/// Transports that are not configured are simply not registered; the
/// orchestrator reports their channel as unavailable.
#[derive(Clone, Default)]
pub struct ChannelSet {
    senders: BTreeMap<Channel, Arc<dyn ChannelSender>>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender, replacing any earlier one for the same channel.
    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.register(sender);
        self
    }

    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(sender.channel(), sender);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&channel).cloned()
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.senders.keys().copied()
    }
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Failure of an HTTP delivery gateway (SMS, push).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request never completed (network, DNS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway answered with a non-2xx status.
    #[error("Gateway returned HTTP {0}")]
    HttpStatus(u16),

    /// The destination no longer exists (HTTP 404/410).
    #[error("Destination gone")]
    Gone,
}

impl GatewayError {
    /// Transient failures worth a delayed retry: network errors, 5xx, 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Request(e) => !e.is_builder() && !e.is_decode(),
            GatewayError::HttpStatus(status) => *status >= 500 || *status == 429,
            GatewayError::Gone => false,
        }
    }

    /// Map a response status to an error, or `None` on success.
    pub fn from_status(status: reqwest::StatusCode) -> Option<Self> {
        if status.is_success() {
            return None;
        }
        match status.as_u16() {
            404 | 410 => Some(GatewayError::Gone),
            other => Some(GatewayError::HttpStatus(other)),
        }
    }

    pub fn into_result(self) -> DeliveryResult {
        if self.is_retryable() {
            DeliveryResult::retryable(self.to_string())
        } else {
            DeliveryResult::failed(self.to_string())
        }
    }
}

/// Build the shared HTTP client for gateways.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use herald_core::notification::{NotificationType, SendNotification};

    use super::*;

    struct Slow;

    #[async_trait]
    impl ChannelSender for Slow {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn send(&self, _: &Notification) -> DeliveryResult {
            tokio::time::sleep(Duration::from_secs(60)).await;
            DeliveryResult::Sent
        }
    }

    struct Panicky(AtomicUsize);

    #[async_trait]
    impl ChannelSender for Panicky {
        fn channel(&self) -> Channel {
            Channel::Sms
        }

        async fn send(&self, _: &Notification) -> DeliveryResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("gateway client bug");
        }
    }

    fn notification() -> Notification {
        Notification::from_request(
            &SendNotification::new(1, NotificationType::Comment, "t", "b"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn timeout_is_retryable_failure() {
        tokio::time::pause();
        let result = dispatch(&Slow, &notification()).await;
        assert_eq!(result, DeliveryResult::retryable(ERROR_TIMEOUT));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let sender = Panicky(AtomicUsize::new(0));
        let result = dispatch(&sender, &notification()).await;
        assert_eq!(result, DeliveryResult::failed("sender panicked"));
        assert_eq!(sender.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gateway_status_classification() {
        assert!(GatewayError::HttpStatus(503).is_retryable());
        assert!(GatewayError::HttpStatus(429).is_retryable());
        assert!(!GatewayError::HttpStatus(400).is_retryable());
        assert!(!GatewayError::Gone.is_retryable());
        assert!(GatewayError::from_status(reqwest::StatusCode::OK).is_none());
        assert!(matches!(
            GatewayError::from_status(reqwest::StatusCode::GONE),
            Some(GatewayError::Gone)
        ));
    }

    #[test]
    fn channel_set_replaces_by_channel() {
        let set = ChannelSet::new()
            .with(Arc::new(Slow))
            .with(Arc::new(Panicky(AtomicUsize::new(0))));
        assert_eq!(set.channels().collect::<Vec<_>>(), vec![Channel::Email, Channel::Sms]);
        assert!(set.get(Channel::Push).is_none());
    }
}
