//! Job handlers for deferred deliveries, channel retries and digests.
//!
//! [`build_worker`] registers one handler per [`JobKind`] on a
//! [`QueueWorker`]. [`register_recurring_flushes`] seeds the daily and weekly
//! digest flush jobs; it is idempotent, so every process may call it at
//! startup.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use herald_core::digest::next_flush_after;
use herald_core::jobs::{Job, JobKind, Repeat};
use herald_core::preferences::DigestInterval;
use herald_core::types::Timestamp;

use crate::error::{DeliveryError, QueueError};
use crate::orchestrator::DeliveryOrchestrator;
use crate::queue::{EnqueueOptions, JobHandler, JobQueue, QueueWorker};
use crate::store::DigestStore;

/// Dedupe key of the recurring flush job for `interval`.
pub fn flush_dedupe_key(interval: DigestInterval) -> String {
    format!("digest_flush:{interval}")
}

fn repeat_for(interval: DigestInterval) -> Repeat {
    match interval {
        DigestInterval::Daily => Repeat::Daily,
        DigestInterval::Weekly => Repeat::Weekly,
    }
}

/// Seed the recurring digest flush jobs, first firing at the next scheduled
/// flush after `now`. Returns how many were newly created.
pub async fn register_recurring_flushes(
    queue: &dyn JobQueue,
    now: Timestamp,
) -> Result<usize, QueueError> {
    let mut created = 0;
    for interval in DigestInterval::ALL {
        let run_at = next_flush_after(interval, now);
        let options = EnqueueOptions::at(run_at)
            .with_repeat(repeat_for(interval))
            .with_dedupe_key(flush_dedupe_key(interval));

        if queue.enqueue(&Job::DigestFlush { interval }, options).await?.is_some() {
            tracing::info!(interval = %interval, %run_at, "Registered recurring digest flush");
            created += 1;
        }
    }
    Ok(created)
}

/// A [`QueueWorker`] with every delivery job kind registered.
pub fn build_worker(
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<DeliveryOrchestrator>,
    digests: Arc<dyn DigestStore>,
) -> QueueWorker {
    QueueWorker::new(queue)
        .process(
            JobKind::DeferredDelivery,
            Arc::new(DeferredDeliveryHandler::new(Arc::clone(&orchestrator))),
        )
        .process(
            JobKind::ChannelRetry,
            Arc::new(ChannelRetryHandler::new(Arc::clone(&orchestrator))),
        )
        .process(JobKind::DigestFlush, Arc::new(DigestFlushHandler::new(digests)))
        .process(
            JobKind::DigestDelivery,
            Arc::new(DigestDeliveryHandler::new(orchestrator)),
        )
}

fn unexpected(expected: JobKind, job: &Job) -> DeliveryError {
    DeliveryError::Validation(format!(
        "{} handler received a {} job",
        expected.as_str(),
        job.kind().as_str()
    ))
}

/// Map a delivery job's result to the queue's view of it.
///
/// A delivery-log failure happens after the channels fired, so the job is
/// completed rather than run again.
fn settle<T>(kind: JobKind, result: Result<T, DeliveryError>) -> Result<(), DeliveryError> {
    match result {
        Ok(_) => Ok(()),
        Err(DeliveryError::DeliveryLog {
            notification_id,
            error,
        }) => {
            tracing::error!(
                job_kind = %kind,
                %notification_id,
                error = %error,
                "Delivery outcomes not recorded, completing job"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Delivers payloads held back by quiet hours.
pub struct DeferredDeliveryHandler {
    orchestrator: Arc<DeliveryOrchestrator>,
}

impl DeferredDeliveryHandler {
    pub fn new(orchestrator: Arc<DeliveryOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for DeferredDeliveryHandler {
    async fn handle(&self, job: Job) -> Result<(), DeliveryError> {
        let Job::DeferredDelivery(deferred) = job else {
            return Err(unexpected(JobKind::DeferredDelivery, &job));
        };
        let result = self
            .orchestrator
            .dispatch_deferred(&deferred, Utc::now())
            .await;
        settle(JobKind::DeferredDelivery, result)
    }
}

/// Runs the single delayed retry of one channel.
pub struct ChannelRetryHandler {
    orchestrator: Arc<DeliveryOrchestrator>,
}

impl ChannelRetryHandler {
    pub fn new(orchestrator: Arc<DeliveryOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for ChannelRetryHandler {
    async fn handle(&self, job: Job) -> Result<(), DeliveryError> {
        let Job::ChannelRetry {
            notification,
            channel,
        } = job
        else {
            return Err(unexpected(JobKind::ChannelRetry, &job));
        };
        self.orchestrator
            .retry_channel(&notification, channel, Utc::now())
            .await?;
        Ok(())
    }
}

/// Drains every pending batch of one interval into per-user delivery jobs.
pub struct DigestFlushHandler {
    digests: Arc<dyn DigestStore>,
}

impl DigestFlushHandler {
    pub fn new(digests: Arc<dyn DigestStore>) -> Self {
        Self { digests }
    }
}

#[async_trait]
impl JobHandler for DigestFlushHandler {
    async fn handle(&self, job: Job) -> Result<(), DeliveryError> {
        let Job::DigestFlush { interval } = job else {
            return Err(unexpected(JobKind::DigestFlush, &job));
        };

        let users = self.digests.users_with_pending(interval).await?;
        let now = Utc::now();
        let mut drained = 0;
        let mut failed = 0;

        // One user's failure must not hold back the others; their batch
        // stays pending for the next flush.
        for user_id in users {
            match self.digests.drain_into_delivery_job(user_id, interval, now).await {
                Ok(items) => drained += items,
                Err(e) => {
                    failed += 1;
                    tracing::error!(user_id, interval = %interval, error = %e, "Failed to drain digest batch");
                }
            }
        }

        tracing::info!(interval = %interval, drained, failed, "Digest flush finished");
        Ok(())
    }
}

/// Sends one user's drained batch.
pub struct DigestDeliveryHandler {
    orchestrator: Arc<DeliveryOrchestrator>,
}

impl DigestDeliveryHandler {
    pub fn new(orchestrator: Arc<DeliveryOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for DigestDeliveryHandler {
    async fn handle(&self, job: Job) -> Result<(), DeliveryError> {
        let Job::DigestDelivery(delivery) = job else {
            return Err(unexpected(JobKind::DigestDelivery, &job));
        };
        let result = self
            .orchestrator
            .deliver_digest(&delivery, Utc::now())
            .await;
        settle(JobKind::DigestDelivery, result)
    }
}
