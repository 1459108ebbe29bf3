//! Inbound API surface.
//!
//! [`NotificationService`] is what embedding code (route adapters, producers)
//! talk to. Sending goes through the [`DeliveryOrchestrator`]; read-state
//! changes refresh the unread badge on the user's live sessions.

use std::sync::Arc;

use chrono::Utc;
use herald_core::delivery::SendOutcome;
use herald_core::notification::{
    ListQuery, NotificationPage, SendNotification, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
use herald_core::preferences::{NotificationPreference, PreferenceUpdate};
use herald_core::types::{DbId, NotificationId};
use herald_db::models::notification::MarkReadResult;
use herald_db::models::push_subscription::{NewPushSubscription, PushSubscription};
use validator::ValidateUrl;

use crate::error::DeliveryError;
use crate::orchestrator::DeliveryOrchestrator;
use crate::preferences::PreferenceAccessor;
use crate::store::{NotificationStore, PushSubscriptionStore};

pub struct NotificationService {
    orchestrator: Arc<DeliveryOrchestrator>,
    preferences: Arc<PreferenceAccessor>,
    store: Arc<dyn NotificationStore>,
    push_subscriptions: Arc<dyn PushSubscriptionStore>,
}

impl NotificationService {
    pub fn new(
        orchestrator: Arc<DeliveryOrchestrator>,
        preferences: Arc<PreferenceAccessor>,
        store: Arc<dyn NotificationStore>,
        push_subscriptions: Arc<dyn PushSubscriptionStore>,
    ) -> Self {
        Self {
            orchestrator,
            preferences,
            store,
            push_subscriptions,
        }
    }

    pub fn orchestrator(&self) -> &Arc<DeliveryOrchestrator> {
        &self.orchestrator
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    pub async fn send(&self, payload: &SendNotification) -> Result<SendOutcome, DeliveryError> {
        self.orchestrator.send(payload).await
    }

    // -----------------------------------------------------------------------
    // Feed
    // -----------------------------------------------------------------------

    /// Mark one notification read. Returns `false` if it already was.
    ///
    /// Idempotent: repeating the call leaves `read_at` and the unread
    /// counter unchanged.
    pub async fn mark_read(&self, user_id: DbId, id: NotificationId) -> Result<bool, DeliveryError> {
        match self.store.mark_read(user_id, id).await? {
            MarkReadResult::NotFound => Err(DeliveryError::NotFound(id)),
            MarkReadResult::AlreadyRead => Ok(false),
            MarkReadResult::Updated => {
                tracing::debug!(user_id, notification_id = %id, "Notification marked read");
                self.orchestrator.refresh_unread_count(user_id).await;
                Ok(true)
            }
        }
    }

    /// Mark every notification of the user read. Returns how many changed.
    pub async fn mark_all_read(&self, user_id: DbId) -> Result<u64, DeliveryError> {
        let changed = self.store.mark_all_read(user_id).await?;
        tracing::info!(user_id, changed, "All notifications marked read");
        self.orchestrator.refresh_unread_count(user_id).await;
        Ok(changed)
    }

    pub async fn list_notifications(
        &self,
        user_id: DbId,
        query: &ListQuery,
    ) -> Result<NotificationPage, DeliveryError> {
        let (items, total) = self.store.list(user_id, query, Utc::now()).await?;
        let unread_count = self.store.unread_count(user_id).await?;

        Ok(NotificationPage {
            items,
            page: query.page.unwrap_or(1).max(1),
            limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            total,
            unread_count,
        })
    }

    pub async fn unread_count(&self, user_id: DbId) -> Result<i64, DeliveryError> {
        Ok(self.store.unread_count(user_id).await?)
    }

    // -----------------------------------------------------------------------
    // Preferences
    // -----------------------------------------------------------------------

    pub async fn get_preferences(&self, user_id: DbId) -> Result<NotificationPreference, DeliveryError> {
        self.preferences.get(user_id).await
    }

    pub async fn update_preferences(
        &self,
        user_id: DbId,
        update: &PreferenceUpdate,
    ) -> Result<NotificationPreference, DeliveryError> {
        self.preferences.update(user_id, update).await
    }

    // -----------------------------------------------------------------------
    // Push subscriptions
    // -----------------------------------------------------------------------

    /// Register (or refresh the keys of) a browser push endpoint.
    pub async fn subscribe_push(
        &self,
        user_id: DbId,
        subscription: &NewPushSubscription,
    ) -> Result<PushSubscription, DeliveryError> {
        validate_push_subscription(subscription)?;
        let stored = self.push_subscriptions.upsert(user_id, subscription).await?;
        tracing::info!(user_id, subscription_id = stored.id, "Push subscription registered");
        Ok(stored)
    }

    /// Returns `true` if the endpoint was registered.
    pub async fn unsubscribe_push(&self, user_id: DbId, endpoint: &str) -> Result<bool, DeliveryError> {
        Ok(self.push_subscriptions.remove(user_id, endpoint).await?)
    }
}

fn validate_push_subscription(subscription: &NewPushSubscription) -> Result<(), DeliveryError> {
    let endpoint = subscription.endpoint.trim();
    if !endpoint.starts_with("https://") || !endpoint.validate_url() {
        return Err(DeliveryError::Validation(
            "Push endpoint must be an https URL".to_string(),
        ));
    }
    if subscription.keys.p256dh.trim().is_empty() || subscription.keys.auth.trim().is_empty() {
        return Err(DeliveryError::Validation(
            "Push subscription keys are required".to_string(),
        ));
    }
    Ok(())
}
