//! Durable job queue contract and the polling worker that drains it.
//!
//! [`QueueWorker`] claims due jobs, hands each to the [`JobHandler`]
//! registered for its kind and settles it: recurring jobs are rescheduled,
//! failures are retried with exponential backoff until `max_attempts`, and
//! anything that cannot be processed is dead-lettered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use herald_core::jobs::{retry_backoff, Job, JobKind, Repeat, DEFAULT_MAX_ATTEMPTS};
use herald_core::types::{DbId, Timestamp};
use tokio_util::sync::CancellationToken;

use crate::error::{DeliveryError, QueueError};

/// Queue row identifier.
pub type JobId = DbId;

/// Default interval between queue polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Jobs claimed per poll.
pub const DEFAULT_BATCH_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Scheduling options for [`JobQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// When the job becomes due. `None` means immediately.
    pub run_at: Option<Timestamp>,
    pub repeat: Option<Repeat>,
    pub max_attempts: i32,
    /// A second enqueue with the same key is ignored.
    pub dedupe_key: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            run_at: None,
            repeat: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            dedupe_key: None,
        }
    }
}

impl EnqueueOptions {
    pub fn at(run_at: Timestamp) -> Self {
        Self {
            run_at: Some(run_at),
            ..Self::default()
        }
    }

    pub fn delayed(delay: Duration) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        Self::at(Utc::now() + delay)
    }

    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// A job claimed for processing. The attempt counter already includes this
/// claim.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub run_at: Timestamp,
    pub attempts: i32,
    pub max_attempts: i32,
    pub repeat: Option<Repeat>,
}

impl ClaimedJob {
    pub fn job(&self) -> Result<Job, serde_json::Error> {
        Job::from_parts(&self.kind, self.payload.clone())
    }
}

/// Durable store of pending work.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns `None` when the dedupe key matched an existing job.
    async fn enqueue(&self, job: &Job, options: EnqueueOptions)
        -> Result<Option<JobId>, QueueError>;

    /// Claim up to `limit` jobs due at `now`.
    async fn claim_due(&self, now: Timestamp, limit: usize) -> Result<Vec<ClaimedJob>, QueueError>;

    /// Settle a job. Recurring jobs pass their next run time.
    async fn complete(&self, id: JobId, next_run: Option<Timestamp>) -> Result<(), QueueError>;

    /// Record a failure. `retry_at = None` dead-letters the job.
    async fn fail(
        &self,
        id: JobId,
        error: &str,
        retry_at: Option<Timestamp>,
    ) -> Result<(), QueueError>;
}

/// Consumer for one job kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// QueueWorker
// ---------------------------------------------------------------------------

/// Polls a [`JobQueue`] and dispatches jobs to registered handlers.
pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    poll_interval: Duration,
    batch_size: usize,
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Register the consumer for `kind`, replacing any earlier one.
    pub fn process(mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Poll until `cancel` fires. A job in flight when cancellation arrives
    /// finishes first.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            kinds = self.handlers.len(),
            poll_ms = self.poll_interval.as_millis() as u64,
            "Queue worker started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Queue worker cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        tracing::error!(error = %e, "Failed to poll job queue");
                    }
                }
            }
        }
    }

    /// Claim and process one batch of jobs due at `now`. Returns the number
    /// of jobs claimed.
    pub async fn run_once(&self, now: Timestamp) -> Result<usize, QueueError> {
        let claimed = self.queue.claim_due(now, self.batch_size).await?;
        let count = claimed.len();
        for job in claimed {
            self.process_job(job, now).await?;
        }
        Ok(count)
    }

    async fn process_job(&self, claimed: ClaimedJob, now: Timestamp) -> Result<(), QueueError> {
        let job = match claimed.job() {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job_id = claimed.id, kind = %claimed.kind, error = %e, "Undecodable job, dead-lettering");
                return self.queue.fail(claimed.id, &e.to_string(), None).await;
            }
        };

        let Some(handler) = self.handlers.get(&job.kind()) else {
            tracing::error!(job_id = claimed.id, kind = %claimed.kind, "No handler registered, dead-lettering");
            return self
                .queue
                .fail(claimed.id, "no handler registered", None)
                .await;
        };

        let next_run = claimed.repeat.map(|r| r.next_after(now));

        match handler.handle(job).await {
            Ok(()) => {
                tracing::debug!(job_id = claimed.id, kind = %claimed.kind, "Job completed");
                self.queue.complete(claimed.id, next_run).await
            }
            Err(e) if claimed.attempts < claimed.max_attempts => {
                let delay = retry_backoff(claimed.attempts);
                let retry_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
                tracing::warn!(
                    job_id = claimed.id,
                    kind = %claimed.kind,
                    attempts = claimed.attempts,
                    error = %e,
                    %retry_at,
                    "Job failed, retrying"
                );
                self.queue
                    .fail(claimed.id, &e.to_string(), Some(retry_at))
                    .await
            }
            Err(e) => {
                tracing::error!(
                    job_id = claimed.id,
                    kind = %claimed.kind,
                    attempts = claimed.attempts,
                    error = %e,
                    "Job exhausted its attempts"
                );
                match next_run {
                    // A recurring job skips this occurrence instead of dying.
                    Some(next) => self.queue.complete(claimed.id, Some(next)).await,
                    None => self.queue.fail(claimed.id, &e.to_string(), None).await,
                }
            }
        }
    }
}
