//! SMS channel via an HTTP JSON gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_core::channels::Channel;
use herald_core::delivery::{DeliveryResult, SKIP_NO_DESTINATION};
use herald_core::notification::Notification;
use serde::Serialize;

use crate::channels::{http_client, ChannelSender, GatewayError};
use crate::store::ContactStore;

/// HTTP request timeout for a single gateway call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest message text sent, in characters.
pub const MAX_SMS_LENGTH: usize = 320;

/// Configuration for the SMS gateway.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub gateway_url: String,
    /// Sent as a bearer token when present.
    pub gateway_token: Option<String>,
}

impl SmsConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMS_GATEWAY_URL` is not set.
    ///
    /// | Variable            | Required | Default |
    /// |---------------------|----------|---------|
    /// | `SMS_GATEWAY_URL`   | yes      | -       |
    /// | `SMS_GATEWAY_TOKEN` | no       | -       |
    pub fn from_env() -> Option<Self> {
        Some(Self {
            gateway_url: std::env::var("SMS_GATEWAY_URL").ok()?,
            gateway_token: std::env::var("SMS_GATEWAY_TOKEN").ok(),
        })
    }
}

/// Outbound SMS transport.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send_sms(&self, to: &str, text: &str) -> Result<(), GatewayError>;
}

#[derive(Serialize)]
struct SmsRequest<'a> {
    to: &'a str,
    message: &'a str,
}

/// [`SmsGateway`] that POSTs `{"to", "message"}` to a provider webhook.
pub struct HttpSmsGateway {
    client: reqwest::Client,
    config: SmsConfig,
}

impl HttpSmsGateway {
    pub fn new(config: SmsConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(REQUEST_TIMEOUT)?,
            config,
        })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send_sms(&self, to: &str, text: &str) -> Result<(), GatewayError> {
        let mut request = self
            .client
            .post(&self.config.gateway_url)
            .json(&SmsRequest { to, message: text });
        if let Some(token) = &self.config.gateway_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match GatewayError::from_status(response.status()) {
            None => Ok(()),
            // A gone phone number is a client error for SMS.
            Some(GatewayError::Gone) => Err(GatewayError::HttpStatus(response.status().as_u16())),
            Some(e) => Err(e),
        }
    }
}

/// Message text: `title: body`, truncated on a character boundary.
pub fn render_sms(notification: &Notification) -> String {
    let full = if notification.body.is_empty() {
        notification.title.clone()
    } else {
        format!("{}: {}", notification.title, notification.body)
    };
    if full.chars().count() <= MAX_SMS_LENGTH {
        return full;
    }
    let mut truncated: String = full.chars().take(MAX_SMS_LENGTH - 1).collect();
    truncated.push('…');
    truncated
}

/// SMS channel: looks up the phone number and sends through an
/// [`SmsGateway`].
pub struct SmsSender {
    contacts: Arc<dyn ContactStore>,
    gateway: Arc<dyn SmsGateway>,
}

impl SmsSender {
    pub fn new(contacts: Arc<dyn ContactStore>, gateway: Arc<dyn SmsGateway>) -> Self {
        Self { contacts, gateway }
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult {
        let phone = match self.contacts.get(notification.user_id).await {
            Ok(contact) => contact.and_then(|c| c.phone).filter(|p| !p.trim().is_empty()),
            Err(e) => return DeliveryResult::retryable(e.to_string()),
        };
        let Some(phone) = phone else {
            return DeliveryResult::skipped(SKIP_NO_DESTINATION);
        };

        match self.gateway.send_sms(&phone, &render_sms(notification)).await {
            Ok(()) => DeliveryResult::Sent,
            Err(e) => {
                tracing::warn!(
                    notification_id = %notification.id,
                    user_id = notification.user_id,
                    error = %e,
                    "SMS delivery failed"
                );
                e.into_result()
            }
        }
    }
}
