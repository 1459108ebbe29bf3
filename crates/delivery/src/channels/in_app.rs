//! In-app feed channel.

use std::sync::Arc;

use async_trait::async_trait;
use herald_core::channels::Channel;
use herald_core::delivery::DeliveryResult;
use herald_core::notification::Notification;

use crate::channels::ChannelSender;
use crate::store::NotificationStore;

/// Writes the notification into the user's feed.
///
/// The insert is idempotent on the notification id, so a retried send never
/// double-counts the unread badge.
pub struct InAppSender {
    store: Arc<dyn NotificationStore>,
}

impl InAppSender {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChannelSender for InAppSender {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult {
        match self.store.insert(notification).await {
            Ok(inserted) => {
                if !inserted {
                    tracing::debug!(notification_id = %notification.id, "Feed row already present");
                }
                DeliveryResult::Sent
            }
            Err(e) => {
                tracing::error!(
                    notification_id = %notification.id,
                    user_id = notification.user_id,
                    error = %e,
                    "Failed to write feed row"
                );
                DeliveryResult::retryable(e.to_string())
            }
        }
    }
}
