//! Wiring of the delivery pipeline: stores, transports, channel senders,
//! orchestrator, service and queue worker.
//!
//! `main.rs` builds it over [`PgStore`](herald_delivery::PgStore); the
//! integration tests build the same graph over the in-memory store.

use std::sync::Arc;

use herald_delivery::channels::{
    EmailConfig, EmailSender, HttpPushGateway, HttpSmsGateway, InAppSender, Mailer, PushConfig,
    PushGateway, PushSender, RealtimeSender, SmsConfig, SmsGateway, SmsSender, SmtpMailer,
};
use herald_delivery::scheduler::build_worker;
use herald_delivery::store::{
    ContactStore, DigestStore, NotificationStore, PreferenceStore, PushSubscriptionStore,
};
use herald_delivery::{
    ChannelSet, DeliveryOrchestrator, JobQueue, NotificationService, OrchestratorConfig,
    PreferenceAccessor, QueueWorker, SessionRegistry,
};

use crate::config::DeliverySettings;

/// Outbound transports for the optional channels. A `None` transport leaves
/// its channel unregistered, so it is skipped as unavailable.
#[derive(Default, Clone)]
pub struct Transports {
    pub mailer: Option<Arc<dyn Mailer>>,
    pub sms: Option<Arc<dyn SmsGateway>>,
    pub push: Option<Arc<dyn PushGateway>>,
}

impl Transports {
    /// Build every transport whose configuration is present in the
    /// environment. A transport that fails to build is logged and left out.
    pub fn from_env() -> Self {
        let mailer = EmailConfig::from_env().and_then(|config| {
            let host = config.smtp_host.clone();
            match SmtpMailer::new(config) {
                Ok(mailer) => {
                    tracing::info!(smtp_host = %host, "Email channel enabled");
                    Some(Arc::new(mailer) as Arc<dyn Mailer>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build SMTP transport, email disabled");
                    None
                }
            }
        });
        if mailer.is_none() {
            tracing::info!("SMTP_HOST not set, email channel disabled");
        }

        let sms = SmsConfig::from_env().and_then(|config| match HttpSmsGateway::new(config) {
            Ok(gateway) => {
                tracing::info!("SMS channel enabled");
                Some(Arc::new(gateway) as Arc<dyn SmsGateway>)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to build SMS gateway, SMS disabled");
                None
            }
        });

        let push = PushConfig::from_env().and_then(|config| match HttpPushGateway::new(config) {
            Ok(gateway) => {
                tracing::info!("Push channel enabled");
                Some(Arc::new(gateway) as Arc<dyn PushGateway>)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to build push gateway, push disabled");
                None
            }
        });

        Self { mailer, sms, push }
    }
}

/// The assembled delivery pipeline.
pub struct Pipeline {
    pub sessions: Arc<SessionRegistry>,
    pub preferences: Arc<PreferenceAccessor>,
    pub orchestrator: Arc<DeliveryOrchestrator>,
    pub service: Arc<NotificationService>,
    pub worker: QueueWorker,
}

/// Assemble the pipeline over `store` and `queue`.
pub fn build_pipeline<S>(
    store: Arc<S>,
    queue: Arc<dyn JobQueue>,
    transports: Transports,
    settings: &DeliverySettings,
) -> Pipeline
where
    S: NotificationStore
        + PreferenceStore
        + PushSubscriptionStore
        + ContactStore
        + DigestStore
        + 'static,
{
    let sessions = Arc::new(SessionRegistry::with_unread_buffer(
        settings.unread_buffer_ttl,
        settings.unread_buffer_capacity,
    ));
    let preferences = Arc::new(PreferenceAccessor::with_cache(
        store.clone(),
        settings.preference_cache_ttl,
        settings.preference_cache_capacity,
    ));

    let mut senders = ChannelSet::new()
        .with(Arc::new(InAppSender::new(store.clone())))
        .with(Arc::new(RealtimeSender::new(Arc::clone(&sessions))));
    if let Some(mailer) = transports.mailer {
        senders.register(Arc::new(EmailSender::new(store.clone(), mailer)));
    }
    if let Some(gateway) = transports.sms {
        senders.register(Arc::new(SmsSender::new(store.clone(), gateway)));
    }
    if let Some(gateway) = transports.push {
        senders.register(Arc::new(PushSender::new(store.clone(), gateway)));
    }

    let orchestrator = Arc::new(
        DeliveryOrchestrator::new(
            Arc::clone(&preferences),
            store.clone(),
            store.clone(),
            Arc::clone(&queue),
            Arc::clone(&sessions),
            senders,
        )
        .with_config(OrchestratorConfig {
            channel_retry_delay: settings.channel_retry_delay,
        }),
    );

    let service = Arc::new(NotificationService::new(
        Arc::clone(&orchestrator),
        Arc::clone(&preferences),
        store.clone(),
        store.clone(),
    ));

    let worker = build_worker(queue, Arc::clone(&orchestrator), store)
        .with_poll_interval(settings.queue_poll_interval);

    Pipeline {
        sessions,
        preferences,
        orchestrator,
        service,
        worker,
    }
}
