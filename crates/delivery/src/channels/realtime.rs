//! Real-time channel over the session registry.

use std::sync::Arc;

use async_trait::async_trait;
use herald_core::channels::Channel;
use herald_core::delivery::{DeliveryResult, SKIP_NO_OPEN_CONNECTION};
use herald_core::notification::Notification;

use crate::channels::ChannelSender;
use crate::session::{RealtimeEvent, SessionRegistry};

/// Pushes the notification to every open connection of its recipient.
pub struct RealtimeSender {
    sessions: Arc<SessionRegistry>,
}

impl RealtimeSender {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl ChannelSender for RealtimeSender {
    fn channel(&self) -> Channel {
        Channel::Realtime
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult {
        let event = RealtimeEvent::Notification {
            notification: Box::new(notification.clone()),
        };
        match self.sessions.publish(notification.user_id, &event) {
            0 => DeliveryResult::skipped(SKIP_NO_OPEN_CONNECTION),
            connections => {
                tracing::debug!(
                    notification_id = %notification.id,
                    user_id = notification.user_id,
                    connections,
                    "Published to live sessions"
                );
                DeliveryResult::Sent
            }
        }
    }
}
