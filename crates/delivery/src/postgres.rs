//! PostgreSQL-backed stores and job queue.
//!
//! Thin adapters from the store traits onto the `herald_db` repositories.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use herald_core::channels::Channel;
use herald_core::delivery::DeliveryAttempt;
use herald_core::digest::DigestItem;
use herald_core::jobs::{Job, DEFAULT_MAX_ATTEMPTS};
use herald_core::notification::{ListQuery, Notification};
use herald_core::preferences::{DigestInterval, NotificationPreference};
use herald_core::types::{DbId, NotificationId, Timestamp};
use herald_db::models::contact::UserContact;
use herald_db::models::job::NewJob;
use herald_db::models::notification::{MarkReadResult, NotificationFilter};
use herald_db::models::push_subscription::{NewPushSubscription, PushSubscription};
use herald_db::repositories::{
    ContactRepo, DeliveryRepo, DigestRepo, JobRepo, NotificationRepo, PreferenceRepo,
    PushSubscriptionRepo,
};
use herald_db::DbPool;

use crate::error::{QueueError, StoreError};
use crate::queue::{ClaimedJob, EnqueueOptions, JobId, JobQueue};
use crate::store::{
    ContactStore, DigestStore, NotificationStore, PreferenceStore, PushSubscriptionStore,
};

/// How long a claimed job may run before another worker reclaims it.
pub const JOB_LEASE: Duration = Duration::from_secs(300);

/// Every store trait plus [`JobQueue`], backed by one connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert(&self, notification: &Notification) -> Result<bool, StoreError> {
        Ok(NotificationRepo::insert(&self.pool, notification).await?)
    }

    async fn find(
        &self,
        user_id: DbId,
        id: NotificationId,
    ) -> Result<Option<Notification>, StoreError> {
        NotificationRepo::find_by_id(&self.pool, id, user_id)
            .await?
            .map(Notification::try_from)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn list(
        &self,
        user_id: DbId,
        query: &ListQuery,
        now: Timestamp,
    ) -> Result<(Vec<Notification>, i64), StoreError> {
        let types: Option<Vec<String>> = query
            .types
            .as_ref()
            .map(|ts| ts.iter().map(|t| t.as_str().to_string()).collect());
        let filter = NotificationFilter {
            user_id,
            unread_only: query.unread_only,
            types: types.as_deref(),
            now,
        };
        let (limit, offset) = query.limit_offset();

        let rows = NotificationRepo::list_for_user(&self.pool, &filter, limit, offset).await?;
        let total = NotificationRepo::count_for_user(&self.pool, &filter).await?;
        let items = rows
            .into_iter()
            .map(Notification::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, total))
    }

    async fn mark_read(
        &self,
        user_id: DbId,
        id: NotificationId,
    ) -> Result<MarkReadResult, StoreError> {
        Ok(NotificationRepo::mark_read(&self.pool, id, user_id).await?)
    }

    async fn mark_all_read(&self, user_id: DbId) -> Result<u64, StoreError> {
        Ok(NotificationRepo::mark_all_read(&self.pool, user_id).await?)
    }

    async fn unread_count(&self, user_id: DbId) -> Result<i64, StoreError> {
        Ok(NotificationRepo::unread_count(&self.pool, user_id).await?)
    }

    async fn record_attempts(
        &self,
        user_id: DbId,
        attempts: &[DeliveryAttempt],
    ) -> Result<(), StoreError> {
        Ok(DeliveryRepo::record(&self.pool, user_id, attempts).await?)
    }

    async fn sent_channels(
        &self,
        notification_id: NotificationId,
    ) -> Result<BTreeSet<Channel>, StoreError> {
        DeliveryRepo::sent_channels(&self.pool, notification_id)
            .await?
            .iter()
            .map(|c| c.parse::<Channel>().map_err(StoreError::Decode))
            .collect()
    }
}

#[async_trait]
impl PreferenceStore for PgStore {
    async fn get(&self, user_id: DbId) -> Result<Option<NotificationPreference>, StoreError> {
        match PreferenceRepo::get(&self.pool, user_id).await? {
            Some(row) => Ok(Some(row.into_preference()?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        preferences: &NotificationPreference,
    ) -> Result<NotificationPreference, StoreError> {
        let document = serde_json::to_value(preferences)?;
        let row = PreferenceRepo::upsert(&self.pool, preferences.user_id, &document).await?;
        Ok(row.into_preference()?)
    }
}

#[async_trait]
impl PushSubscriptionStore for PgStore {
    async fn upsert(
        &self,
        user_id: DbId,
        subscription: &NewPushSubscription,
    ) -> Result<PushSubscription, StoreError> {
        Ok(PushSubscriptionRepo::upsert(&self.pool, user_id, subscription).await?)
    }

    async fn list(&self, user_id: DbId) -> Result<Vec<PushSubscription>, StoreError> {
        Ok(PushSubscriptionRepo::list_for_user(&self.pool, user_id).await?)
    }

    async fn remove(&self, user_id: DbId, endpoint: &str) -> Result<bool, StoreError> {
        Ok(PushSubscriptionRepo::delete(&self.pool, user_id, endpoint).await?)
    }

    async fn touch(&self, user_id: DbId, endpoint: &str) -> Result<(), StoreError> {
        Ok(PushSubscriptionRepo::touch(&self.pool, user_id, endpoint).await?)
    }
}

#[async_trait]
impl ContactStore for PgStore {
    async fn get(&self, user_id: DbId) -> Result<Option<UserContact>, StoreError> {
        Ok(ContactRepo::get(&self.pool, user_id).await?)
    }
}

#[async_trait]
impl DigestStore for PgStore {
    async fn append(
        &self,
        user_id: DbId,
        interval: DigestInterval,
        item: &DigestItem,
    ) -> Result<usize, StoreError> {
        let size = DigestRepo::append(&self.pool, user_id, interval, item).await?;
        Ok(usize::try_from(size).unwrap_or(0))
    }

    async fn users_with_pending(&self, interval: DigestInterval) -> Result<Vec<DbId>, StoreError> {
        Ok(DigestRepo::users_with_pending(&self.pool, interval).await?)
    }

    async fn drain_into_delivery_job(
        &self,
        user_id: DbId,
        interval: DigestInterval,
        run_at: Timestamp,
    ) -> Result<usize, StoreError> {
        let drained =
            DigestRepo::drain_into_job(&self.pool, user_id, interval, run_at, DEFAULT_MAX_ATTEMPTS)
                .await?;
        Ok(drained)
    }
}

#[async_trait]
impl JobQueue for PgStore {
    async fn enqueue(
        &self,
        job: &Job,
        options: EnqueueOptions,
    ) -> Result<Option<JobId>, QueueError> {
        let run_at = options.run_at.unwrap_or_else(chrono::Utc::now);
        let mut new_job = NewJob::new(job, run_at, options.max_attempts)?;
        new_job.repeat = options.repeat;
        new_job.dedupe_key = options.dedupe_key;
        Ok(JobRepo::insert(&self.pool, &new_job).await?)
    }

    async fn claim_due(&self, now: Timestamp, limit: usize) -> Result<Vec<ClaimedJob>, QueueError> {
        let lease = chrono::Duration::from_std(JOB_LEASE).unwrap_or_default();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = JobRepo::claim_due(&self.pool, now, now - lease, limit).await?;
        Ok(rows
            .into_iter()
            .map(|row| ClaimedJob {
                repeat: row.repeat(),
                id: row.id,
                kind: row.kind,
                payload: row.payload,
                run_at: row.run_at,
                attempts: row.attempts,
                max_attempts: row.max_attempts,
            })
            .collect())
    }

    async fn complete(&self, id: JobId, next_run: Option<Timestamp>) -> Result<(), QueueError> {
        Ok(JobRepo::complete(&self.pool, id, next_run).await?)
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        retry_at: Option<Timestamp>,
    ) -> Result<(), QueueError> {
        match retry_at {
            Some(run_at) => JobRepo::retry_later(&self.pool, id, run_at, error).await?,
            None => JobRepo::dead_letter(&self.pool, id, error).await?,
        }
        Ok(())
    }
}
