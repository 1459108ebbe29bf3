//! Push channel via a web-push relay.
//!
//! Payload encryption and VAPID signing happen in the relay; this side posts
//! the subscription and a JSON payload. The relay answers 404/410 when the
//! browser endpoint is gone, and that subscription is then deleted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use herald_core::channels::Channel;
use herald_core::delivery::{DeliveryResult, SKIP_NO_DESTINATION};
use herald_core::notification::Notification;
use herald_db::models::push_subscription::{PushKeys, PushSubscription};
use serde::Serialize;

use crate::channels::{http_client, ChannelSender, GatewayError};
use crate::store::PushSubscriptionStore;

/// HTTP request timeout for a single relay call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the push relay.
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub gateway_url: String,
}

impl PushConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `PUSH_GATEWAY_URL` is not set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            gateway_url: std::env::var("PUSH_GATEWAY_URL").ok()?,
        })
    }
}

/// What the service worker receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushPayload {
    pub notification_id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub icon: Option<String>,
}

impl From<&Notification> for PushPayload {
    fn from(n: &Notification) -> Self {
        Self {
            notification_id: n.id.to_string(),
            notification_type: n.notification_type.as_str().to_string(),
            title: n.title.clone(),
            body: n.body.clone(),
            url: n.action_url.clone(),
            icon: n.image_url.clone(),
        }
    }
}

/// Outbound push transport.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn push(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), GatewayError>;
}

#[derive(Serialize)]
struct RelaySubscription<'a> {
    endpoint: &'a str,
    keys: PushKeys,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    subscription: RelaySubscription<'a>,
    payload: &'a PushPayload,
}

/// [`PushGateway`] that forwards to an HTTP relay.
pub struct HttpPushGateway {
    client: reqwest::Client,
    config: PushConfig,
}

impl HttpPushGateway {
    pub fn new(config: PushConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(REQUEST_TIMEOUT)?,
            config,
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn push(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), GatewayError> {
        let body = RelayRequest {
            subscription: RelaySubscription {
                endpoint: &subscription.endpoint,
                keys: PushKeys {
                    p256dh: subscription.p256dh.clone(),
                    auth: subscription.auth.clone(),
                },
            },
            payload,
        };
        let response = self
            .client
            .post(&self.config.gateway_url)
            .json(&body)
            .send()
            .await?;
        GatewayError::from_status(response.status()).map_or(Ok(()), Err)
    }
}

/// Push channel: delivers to every registered endpoint of the recipient.
pub struct PushSender {
    subscriptions: Arc<dyn PushSubscriptionStore>,
    gateway: Arc<dyn PushGateway>,
}

impl PushSender {
    pub fn new(
        subscriptions: Arc<dyn PushSubscriptionStore>,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        Self {
            subscriptions,
            gateway,
        }
    }

    async fn push_one(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), GatewayError> {
        let result = self.gateway.push(subscription, payload).await;
        let user_id = subscription.user_id;
        let endpoint = subscription.endpoint.as_str();

        match &result {
            Ok(()) => {
                if let Err(e) = self.subscriptions.touch(user_id, endpoint).await {
                    tracing::warn!(user_id, error = %e, "Failed to touch push subscription");
                }
            }
            Err(GatewayError::Gone) => {
                tracing::info!(user_id, endpoint, "Push endpoint gone, removing subscription");
                if let Err(e) = self.subscriptions.remove(user_id, endpoint).await {
                    tracing::warn!(user_id, error = %e, "Failed to remove gone push subscription");
                }
            }
            Err(e) => {
                tracing::warn!(user_id, endpoint, error = %e, "Push delivery failed");
            }
        }
        result
    }
}

#[async_trait]
impl ChannelSender for PushSender {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult {
        let subscriptions = match self.subscriptions.list(notification.user_id).await {
            Ok(subs) => subs,
            Err(e) => return DeliveryResult::retryable(e.to_string()),
        };
        if subscriptions.is_empty() {
            return DeliveryResult::skipped(SKIP_NO_DESTINATION);
        }

        let payload = PushPayload::from(notification);
        let results = join_all(subscriptions.iter().map(|s| self.push_one(s, &payload))).await;

        if results.iter().any(Result::is_ok) {
            return DeliveryResult::Sent;
        }
        let failures: Vec<GatewayError> = results
            .into_iter()
            .filter_map(Result::err)
            .filter(|e| !matches!(e, GatewayError::Gone))
            .collect();
        if failures.is_empty() {
            // Every endpoint was gone and has been removed.
            return DeliveryResult::skipped(SKIP_NO_DESTINATION);
        }

        let error = failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        if failures.iter().any(GatewayError::is_retryable) {
            DeliveryResult::retryable(error)
        } else {
            DeliveryResult::failed(error)
        }
    }
}
