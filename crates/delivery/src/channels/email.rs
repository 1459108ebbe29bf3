//! Email channel via SMTP.
//!
//! [`SmtpMailer`] wraps the `lettre` async SMTP transport. Configuration is
//! loaded from environment variables; if `SMTP_HOST` is not set,
//! [`EmailConfig::from_env`] returns `None` and the email channel is left
//! unregistered.

use std::sync::Arc;

use async_trait::async_trait;
use herald_core::channels::Channel;
use herald_core::delivery::{DeliveryResult, SKIP_NO_DESTINATION};
use herald_core::notification::Notification;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::channels::ChannelSender;
use crate::store::ContactStore;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for email delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

impl EmailError {
    /// Only transport failures short of a permanent SMTP rejection are worth
    /// retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmailError::Transport(e) => !e.is_permanent(),
            EmailError::Address(_) | EmailError::Build(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "noreply@herald.local";

/// Configuration for the SMTP mailer.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set.
    ///
    /// | Variable        | Required | Default                 |
    /// |-----------------|----------|-------------------------|
    /// | `SMTP_HOST`     | yes      | -                       |
    /// | `SMTP_PORT`     | no       | `587`                   |
    /// | `SMTP_FROM`     | no       | `noreply@herald.local`  |
    /// | `SMTP_USER`     | no       | -                       |
    /// | `SMTP_PASSWORD` | no       | -                       |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

// ---------------------------------------------------------------------------
// Mailer
// ---------------------------------------------------------------------------

/// A rendered plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    /// Subject is the title; the body carries the text and the action link.
    pub fn render(to: impl Into<String>, notification: &Notification) -> Self {
        let mut body = notification.body.clone();
        if let Some(url) = &notification.action_url {
            if !body.is_empty() {
                body.push_str("\n\n");
            }
            body.push_str(url);
        }
        Self {
            to: to.into(),
            subject: notification.title.clone(),
            body,
        }
    }
}

/// Outbound email transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// [`Mailer`] over SMTP with STARTTLS.
pub struct SmtpMailer {
    from_address: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Result<Self, EmailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (config.smtp_user, config.smtp_password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        Ok(Self {
            from_address: config.from_address,
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(self.from_address.parse()?)
            .to(message.to.parse()?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| EmailError::Build(e.to_string()))?;

        self.transport.send(email).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EmailSender
// ---------------------------------------------------------------------------

/// Email channel: looks up the recipient's address and hands the rendered
/// message to a [`Mailer`].
pub struct EmailSender {
    contacts: Arc<dyn ContactStore>,
    mailer: Arc<dyn Mailer>,
}

impl EmailSender {
    pub fn new(contacts: Arc<dyn ContactStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self { contacts, mailer }
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult {
        let address = match self.contacts.get(notification.user_id).await {
            Ok(contact) => contact.and_then(|c| c.email).filter(|e| !e.trim().is_empty()),
            Err(e) => return DeliveryResult::retryable(e.to_string()),
        };
        let Some(address) = address else {
            return DeliveryResult::skipped(SKIP_NO_DESTINATION);
        };

        let message = EmailMessage::render(address, notification);
        match self.mailer.send(&message).await {
            Ok(()) => {
                tracing::info!(
                    notification_id = %notification.id,
                    user_id = notification.user_id,
                    "Notification email sent"
                );
                DeliveryResult::Sent
            }
            Err(e) if e.is_retryable() => DeliveryResult::retryable(e.to_string()),
            Err(e) => DeliveryResult::failed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use herald_core::notification::{NotificationType, SendNotification};

    use super::*;

    #[test]
    fn from_env_returns_none_without_smtp_host() {
        std::env::remove_var("SMTP_HOST");
        assert!(EmailConfig::from_env().is_none());
    }

    #[test]
    fn email_error_display_build() {
        let err = EmailError::Build("missing body".to_string());
        assert_eq!(err.to_string(), "Email build error: missing body");
        assert!(!err.is_retryable());
    }

    #[test]
    fn address_errors_are_permanent() {
        let addr_err: Result<lettre::Address, _> = "not-an-email".parse();
        let err = EmailError::Address(addr_err.unwrap_err());
        assert!(err.to_string().contains("Email address parse error"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn render_appends_action_link() {
        let request = SendNotification::new(1, NotificationType::Reply, "New reply", "Looks good")
            .with_action_url("https://example.com/t/1");
        let n = Notification::from_request(&request, Utc::now());

        let message = EmailMessage::render("a@example.com", &n);

        assert_eq!(message.subject, "New reply");
        assert_eq!(message.body, "Looks good\n\nhttps://example.com/t/1");
    }
}
