//! The `send` pipeline: gates, fan-out and persistence.
//!
//! A payload passes through these stages in order:
//!
//! 1. validation (no side effects on failure)
//! 2. preference lookup (an outage aborts the send)
//! 3. type gate
//! 4. quiet-hours gate (non-urgent only), deferring to the window end
//! 5. channel resolution
//! 6. digest gate (non-urgent only), batching the digested channels
//! 7. concurrent fan-out to the remaining channels
//! 8. outcome recording, unread-count refresh and real-time snapshot
//!
//! Channel failures never abort a send. Retryable ones get a single delayed
//! retry through the job queue.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use herald_core::channels::Channel;
use herald_core::delivery::{
    DeliveryAttempt, DeliveryResult, DeliveryStatus, SendOutcome, SKIP_CHANNEL_UNAVAILABLE,
    SKIP_EXPIRED, SKIP_NO_CHANNELS, SKIP_TYPE_DISABLED,
};
use herald_core::digest::{digest_notification, DigestItem};
use herald_core::jobs::{DeferredDelivery, DigestDelivery, Job};
use herald_core::notification::{Notification, SendNotification};
use herald_core::preferences::NotificationPreference;
use herald_core::types::{DbId, NotificationId, Timestamp};

use crate::channels::{dispatch, ChannelSet};
use crate::error::{DeliveryError, StoreError};
use crate::preferences::PreferenceAccessor;
use crate::queue::{EnqueueOptions, JobQueue};
use crate::session::SessionRegistry;
use crate::store::{DigestStore, NotificationStore};

/// Default delay before the single retry of a failed channel.
pub const DEFAULT_CHANNEL_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Skip reason for a digest job whose batch turned out empty.
const SKIP_EMPTY_DIGEST: &str = "empty-digest";

/// Tunables for [`DeliveryOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub channel_retry_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel_retry_delay: DEFAULT_CHANNEL_RETRY_DELAY,
        }
    }
}

/// How a pipeline run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// A live send: quiet hours apply and a fresh id is minted.
    Send,
    /// A deferred job: quiet hours are over and the id was fixed at enqueue.
    Deferred(NotificationId),
}

pub struct DeliveryOrchestrator {
    preferences: Arc<PreferenceAccessor>,
    store: Arc<dyn NotificationStore>,
    digests: Arc<dyn DigestStore>,
    queue: Arc<dyn JobQueue>,
    sessions: Arc<SessionRegistry>,
    senders: ChannelSet,
    config: OrchestratorConfig,
}

impl DeliveryOrchestrator {
    pub fn new(
        preferences: Arc<PreferenceAccessor>,
        store: Arc<dyn NotificationStore>,
        digests: Arc<dyn DigestStore>,
        queue: Arc<dyn JobQueue>,
        sessions: Arc<SessionRegistry>,
        senders: ChannelSet,
    ) -> Self {
        Self {
            preferences,
            store,
            digests,
            queue,
            sessions,
            senders,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn senders(&self) -> &ChannelSet {
        &self.senders
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    pub async fn send(&self, payload: &SendNotification) -> Result<SendOutcome, DeliveryError> {
        self.send_at(payload, Utc::now()).await
    }

    /// [`send`](Self::send) with an explicit clock.
    pub async fn send_at(
        &self,
        payload: &SendNotification,
        now: Timestamp,
    ) -> Result<SendOutcome, DeliveryError> {
        payload.validate_at(now)?;
        self.run(payload, now, Origin::Send).await
    }

    /// Deliver a payload that was held back by quiet hours.
    ///
    /// Preferences are re-read, so changes made while the payload waited
    /// apply. A payload that expired while waiting is dropped. The
    /// notification keeps the id assigned at deferral; channels already
    /// recorded as sent for it are not sent again.
    pub async fn dispatch_deferred(
        &self,
        deferred: &DeferredDelivery,
        now: Timestamp,
    ) -> Result<SendOutcome, DeliveryError> {
        let payload = &deferred.request;
        if payload.expires_at.is_some_and(|at| at <= now) {
            tracing::info!(
                user_id = payload.user_id,
                notification_type = %payload.notification_type,
                notification_id = %deferred.notification_id,
                "Deferred notification expired before delivery"
            );
            return Ok(SendOutcome::Skipped {
                reason: SKIP_EXPIRED.to_string(),
            });
        }
        self.run(payload, now, Origin::Deferred(deferred.notification_id))
            .await
    }

    /// Run a single channel once more for an already-persisted notification.
    ///
    /// A second failure is final: it is recorded and logged, never re-queued.
    pub async fn retry_channel(
        &self,
        notification: &Notification,
        channel: Channel,
        now: Timestamp,
    ) -> Result<DeliveryAttempt, DeliveryError> {
        let result = if notification.is_expired(now) {
            DeliveryResult::skipped(SKIP_EXPIRED)
        } else {
            self.dispatch_channel(channel, notification).await
        };

        match &result {
            DeliveryResult::Sent => {
                tracing::info!(notification_id = %notification.id, channel = %channel, "Channel retry succeeded");
            }
            DeliveryResult::Failed { error, .. } => {
                tracing::error!(
                    notification_id = %notification.id,
                    user_id = notification.user_id,
                    channel = %channel,
                    error = %error,
                    "Channel retry failed, giving up"
                );
            }
            DeliveryResult::Skipped { reason } => {
                tracing::debug!(notification_id = %notification.id, channel = %channel, reason = %reason, "Channel retry skipped");
            }
        }

        let attempt = DeliveryAttempt::new(notification.id, channel, &result, now);
        let recorded = self
            .store
            .record_attempts(notification.user_id, std::slice::from_ref(&attempt))
            .await;

        if channel == Channel::InApp && result == DeliveryResult::Sent {
            self.refresh_unread_count(notification.user_id).await;
        }
        recorded.map_err(|e| delivery_log_error(notification.id, e))?;
        Ok(attempt)
    }

    /// Send one user's drained digest batch as a single email.
    ///
    /// A retryable transport failure is returned as an error so the queue
    /// backs off and tries again; other outcomes are final. A batch whose
    /// email is already recorded as sent is not mailed again.
    pub async fn deliver_digest(
        &self,
        delivery: &DigestDelivery,
        now: Timestamp,
    ) -> Result<DeliveryResult, DeliveryError> {
        let user_id = delivery.user_id;
        if delivery.items.is_empty() {
            return Ok(DeliveryResult::skipped(SKIP_EMPTY_DIGEST));
        }

        let notification = digest_notification(user_id, delivery.interval, &delivery.items, now)
            .with_id(delivery.notification_id);
        if self
            .store
            .sent_channels(notification.id)
            .await?
            .contains(&Channel::Email)
        {
            tracing::info!(
                user_id,
                notification_id = %notification.id,
                "Digest already sent, not mailing again"
            );
            return Ok(DeliveryResult::Sent);
        }

        if self.senders.get(Channel::Email).is_none() {
            tracing::warn!(user_id, interval = %delivery.interval, "Email channel not configured, digest dropped");
        }
        let result = self.dispatch_channel(Channel::Email, &notification).await;

        let attempt = DeliveryAttempt::new(notification.id, Channel::Email, &result, now);
        self.store
            .record_attempts(user_id, &[attempt])
            .await
            .map_err(|e| delivery_log_error(notification.id, e))?;

        tracing::info!(
            user_id,
            interval = %delivery.interval,
            items = delivery.items.len(),
            status = result.status().as_str(),
            "Digest delivered"
        );

        match result {
            DeliveryResult::Failed {
                error,
                retryable: true,
            } => Err(DeliveryError::Channel {
                channel: Channel::Email,
                error,
            }),
            other => Ok(other),
        }
    }

    /// Re-read the user's unread count and push it to their live sessions,
    /// or buffer it for their next connection.
    pub async fn refresh_unread_count(&self, user_id: DbId) -> Option<i64> {
        match self.store.unread_count(user_id).await {
            Ok(count) => {
                self.publish_unread_count(user_id, count);
                Some(count)
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to refresh unread count");
                None
            }
        }
    }

    pub fn publish_unread_count(&self, user_id: DbId, count: i64) {
        let reached = self.sessions.publish_unread_count(user_id, count);
        tracing::trace!(user_id, count, reached, "Unread count published");
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    async fn run(
        &self,
        payload: &SendNotification,
        now: Timestamp,
        origin: Origin,
    ) -> Result<SendOutcome, DeliveryError> {
        let user_id = payload.user_id;
        let prefs = self.preferences.get(user_id).await?;

        if !prefs.is_type_enabled(payload.notification_type) {
            tracing::debug!(user_id, notification_type = %payload.notification_type, "Type disabled, skipping");
            return Ok(SendOutcome::Skipped {
                reason: SKIP_TYPE_DISABLED.to_string(),
            });
        }

        let urgent = payload.priority.is_urgent();
        if origin == Origin::Send && !urgent {
            if let Some(deliver_at) = self.quiet_hours_end(&prefs, now) {
                self.defer(payload, deliver_at).await;
                return Ok(SendOutcome::Deferred { deliver_at });
            }
        }

        let resolved = prefs.resolve_channels(payload.notification_type, payload.channels.as_ref());
        if resolved.is_empty() {
            tracing::debug!(user_id, notification_type = %payload.notification_type, "No channels resolved");
            return Ok(SendOutcome::Skipped {
                reason: SKIP_NO_CHANNELS.to_string(),
            });
        }

        let (mut immediate, digested) = if !urgent && prefs.digest_mode.enabled {
            split_for_digest(&resolved, prefs.digest_mode.real_time_also_on)
        } else {
            (resolved, BTreeSet::new())
        };

        if !digested.is_empty() {
            let interval = prefs.digest_mode.interval;
            let batch_size = self
                .digests
                .append(user_id, interval, &DigestItem::from_request(payload, now))
                .await?;
            tracing::debug!(user_id, interval = %interval, batch_size, "Added to digest batch");

            if immediate.is_empty() {
                return Ok(SendOutcome::Digested { batch_size });
            }
        }

        let mut notification = Notification::from_request(payload, now);
        if let Origin::Deferred(id) = origin {
            notification = notification.with_id(id);
            let delivered = self.store.sent_channels(id).await?;
            if !delivered.is_empty() {
                tracing::info!(
                    notification_id = %id,
                    user_id,
                    already_sent = delivered.len(),
                    "Resuming deferred delivery"
                );
                immediate.retain(|c| !delivered.contains(c));
            }
        }
        let attempts = self.fan_out(&notification, &immediate, now).await?;

        tracing::info!(
            notification_id = %notification.id,
            user_id,
            notification_type = %notification.notification_type,
            channels = attempts.len(),
            sent = attempts.iter().filter(|a| a.status == DeliveryStatus::Sent).count(),
            digested = digested.len(),
            "Notification dispatched"
        );

        Ok(SendOutcome::Dispatched {
            notification: Box::new(notification),
            attempts,
            digested: digested.len(),
        })
    }

    fn quiet_hours_end(&self, prefs: &NotificationPreference, now: Timestamp) -> Option<Timestamp> {
        match prefs.quiet_hours.deferral_until(now) {
            Ok(until) => until,
            Err(e) => {
                // Stored windows are validated on write; a bad one means
                // the row was edited out of band.
                tracing::warn!(user_id = prefs.user_id, error = %e, "Ignoring invalid quiet hours");
                None
            }
        }
    }

    async fn defer(&self, payload: &SendNotification, deliver_at: Timestamp) {
        let deferred = DeferredDelivery::new(payload.clone());
        let notification_id = deferred.notification_id;
        let job = Job::DeferredDelivery(deferred);
        match self.queue.enqueue(&job, EnqueueOptions::at(deliver_at)).await {
            Ok(job_id) => {
                tracing::info!(
                    user_id = payload.user_id,
                    %notification_id,
                    ?job_id,
                    %deliver_at,
                    "Deferred for quiet hours"
                );
            }
            Err(e) => {
                tracing::error!(
                    user_id = payload.user_id,
                    %deliver_at,
                    error = %e,
                    "Failed to enqueue deferred delivery, notification will not be delivered"
                );
            }
        }
    }

    async fn fan_out(
        &self,
        notification: &Notification,
        channels: &BTreeSet<Channel>,
        now: Timestamp,
    ) -> Result<Vec<DeliveryAttempt>, DeliveryError> {
        let user_id = notification.user_id;
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        let results = join_all(channels.iter().map(|&channel| async move {
            (channel, self.dispatch_channel(channel, notification).await)
        }))
        .await;

        let mut attempts: Vec<DeliveryAttempt> = results
            .iter()
            .map(|(channel, result)| DeliveryAttempt::new(notification.id, *channel, result, now))
            .collect();

        let in_app_failed = attempts
            .iter()
            .any(|a| a.channel == Channel::InApp && a.status == DeliveryStatus::Failed);
        if in_app_failed {
            if let Err(e) = self.store.record_attempts(user_id, &attempts).await {
                tracing::warn!(notification_id = %notification.id, error = %e, "Failed to record delivery outcomes");
            }
            return Err(DeliveryError::Persistence(format!(
                "in-app feed write failed for notification {}",
                notification.id
            )));
        }

        for ((channel, result), attempt) in results.iter().zip(attempts.iter_mut()) {
            if result.is_retryable() {
                attempt.retry_scheduled = self.schedule_retry(notification, *channel, now).await;
            }
        }

        let recorded = self.store.record_attempts(user_id, &attempts).await;

        let in_app_sent = attempts
            .iter()
            .any(|a| a.channel == Channel::InApp && a.status == DeliveryStatus::Sent);
        if in_app_sent {
            self.refresh_unread_count(user_id).await;
        }

        recorded.map_err(|e| delivery_log_error(notification.id, e))?;
        Ok(attempts)
    }

    async fn dispatch_channel(&self, channel: Channel, notification: &Notification) -> DeliveryResult {
        match self.senders.get(channel) {
            Some(sender) => dispatch(sender.as_ref(), notification).await,
            None => DeliveryResult::skipped(SKIP_CHANNEL_UNAVAILABLE),
        }
    }

    /// Queue the single delayed retry. Returns whether it was queued.
    async fn schedule_retry(&self, notification: &Notification, channel: Channel, now: Timestamp) -> bool {
        let delay = chrono::Duration::from_std(self.config.channel_retry_delay).unwrap_or_default();
        let job = Job::ChannelRetry {
            notification: Box::new(notification.clone()),
            channel,
        };
        let options = EnqueueOptions::at(now + delay).with_max_attempts(1);

        match self.queue.enqueue(&job, options).await {
            Ok(_) => {
                tracing::debug!(notification_id = %notification.id, channel = %channel, "Channel retry scheduled");
                true
            }
            Err(e) => {
                tracing::error!(
                    notification_id = %notification.id,
                    channel = %channel,
                    error = %e,
                    "Failed to schedule channel retry"
                );
                false
            }
        }
    }
}

fn delivery_log_error(notification_id: NotificationId, e: StoreError) -> DeliveryError {
    DeliveryError::DeliveryLog {
        notification_id,
        error: e.to_string(),
    }
}

/// Split resolved channels into (send now, batch into digest).
///
/// Everything is digested except the real-time channel when the user asked
/// for it to keep firing.
fn split_for_digest(
    resolved: &BTreeSet<Channel>,
    real_time_also_on: bool,
) -> (BTreeSet<Channel>, BTreeSet<Channel>) {
    resolved
        .iter()
        .copied()
        .partition(|c| real_time_also_on && c.is_real_time())
}
