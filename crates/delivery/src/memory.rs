//! In-process implementations of every storage and queue trait.
//!
//! Used by the integration tests and by single-node development setups.
//! Each table family sits behind its own mutex; no lock is held across an
//! `.await`. Fault switches let tests simulate a store outage per family.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use herald_core::channels::Channel;
use herald_core::delivery::{DeliveryAttempt, DeliveryStatus};
use herald_core::digest::DigestItem;
use herald_core::jobs::{
    DigestDelivery, Job, Repeat, JOB_STATUS_DEAD, JOB_STATUS_DONE, JOB_STATUS_PENDING,
    JOB_STATUS_RUNNING,
};
use herald_core::notification::{ListQuery, Notification};
use herald_core::preferences::{DigestInterval, NotificationPreference};
use herald_core::types::{DbId, NotificationId, Timestamp};
use herald_db::models::contact::UserContact;
use herald_db::models::notification::MarkReadResult;
use herald_db::models::push_subscription::{NewPushSubscription, PushSubscription};

use crate::error::{QueueError, StoreError};
use crate::queue::{ClaimedJob, EnqueueOptions, JobId, JobQueue};
use crate::store::{
    ContactStore, DigestStore, NotificationStore, PreferenceStore, PushSubscriptionStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

/// A queued job as held by [`MemoryQueue`].
#[derive(Debug, Clone)]
pub struct MemoryJob {
    pub id: JobId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: &'static str,
    pub run_at: Timestamp,
    pub attempts: i32,
    pub max_attempts: i32,
    pub repeat: Option<Repeat>,
    pub dedupe_key: Option<String>,
    pub last_error: Option<String>,
}

impl MemoryJob {
    pub fn job(&self) -> Result<Job, serde_json::Error> {
        Job::from_parts(&self.kind, self.payload.clone())
    }
}

#[derive(Default)]
struct QueueState {
    next_id: JobId,
    jobs: BTreeMap<JobId, MemoryJob>,
}

impl QueueState {
    fn insert(&mut self, job: &Job, options: EnqueueOptions) -> Result<Option<JobId>, QueueError> {
        if let Some(key) = &options.dedupe_key {
            if self
                .jobs
                .values()
                .any(|j| j.dedupe_key.as_deref() == Some(key))
            {
                return Ok(None);
            }
        }

        self.next_id += 1;
        let id = self.next_id;
        self.jobs.insert(
            id,
            MemoryJob {
                id,
                kind: job.kind().as_str().to_string(),
                payload: job.payload()?,
                status: JOB_STATUS_PENDING,
                run_at: options.run_at.unwrap_or_else(Utc::now),
                attempts: 0,
                max_attempts: options.max_attempts,
                repeat: options.repeat,
                dedupe_key: options.dedupe_key,
                last_error: None,
            },
        );
        Ok(Some(id))
    }
}

/// In-process [`JobQueue`].
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every enqueue fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("job queue offline".into()).into());
        }
        Ok(())
    }

    /// Snapshot of every job, ordered by id.
    pub fn jobs(&self) -> Vec<MemoryJob> {
        lock(&self.state).jobs.values().cloned().collect()
    }

    /// Jobs still waiting to run.
    pub fn pending(&self) -> Vec<MemoryJob> {
        lock(&self.state)
            .jobs
            .values()
            .filter(|j| j.status == JOB_STATUS_PENDING)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: JobId) -> Option<MemoryJob> {
        lock(&self.state).jobs.get(&id).cloned()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(
        &self,
        job: &Job,
        options: EnqueueOptions,
    ) -> Result<Option<JobId>, QueueError> {
        self.check_available()?;
        lock(&self.state).insert(job, options)
    }

    async fn claim_due(&self, now: Timestamp, limit: usize) -> Result<Vec<ClaimedJob>, QueueError> {
        let mut state = lock(&self.state);
        let mut due: Vec<&mut MemoryJob> = state
            .jobs
            .values_mut()
            .filter(|j| j.status == JOB_STATUS_PENDING && j.run_at <= now)
            .collect();
        due.sort_by_key(|j| (j.run_at, j.id));

        Ok(due
            .into_iter()
            .take(limit)
            .map(|j| {
                j.status = JOB_STATUS_RUNNING;
                j.attempts += 1;
                ClaimedJob {
                    id: j.id,
                    kind: j.kind.clone(),
                    payload: j.payload.clone(),
                    run_at: j.run_at,
                    attempts: j.attempts,
                    max_attempts: j.max_attempts,
                    repeat: j.repeat,
                }
            })
            .collect())
    }

    async fn complete(&self, id: JobId, next_run: Option<Timestamp>) -> Result<(), QueueError> {
        if let Some(job) = lock(&self.state).jobs.get_mut(&id) {
            match next_run {
                Some(run_at) => {
                    job.status = JOB_STATUS_PENDING;
                    job.run_at = run_at;
                    job.attempts = 0;
                    job.last_error = None;
                }
                None => job.status = JOB_STATUS_DONE,
            }
        }
        Ok(())
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        retry_at: Option<Timestamp>,
    ) -> Result<(), QueueError> {
        if let Some(job) = lock(&self.state).jobs.get_mut(&id) {
            job.last_error = Some(error.to_string());
            match retry_at {
                Some(run_at) => {
                    job.status = JOB_STATUS_PENDING;
                    job.run_at = run_at;
                }
                None => job.status = JOB_STATUS_DEAD,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Outage switches, one per table family. `feed_writes` and
/// `delivery_records` fail writes only.
#[derive(Debug, Default)]
pub struct Faults {
    pub preferences: AtomicBool,
    pub feed_writes: AtomicBool,
    pub delivery_records: AtomicBool,
}

fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable(format!("{what} offline")));
    }
    Ok(())
}

#[derive(Default)]
struct FeedState {
    rows: HashMap<NotificationId, Notification>,
    unread: HashMap<DbId, i64>,
}

#[derive(Debug, Clone)]
struct PendingDigestItem {
    user_id: DbId,
    interval: DigestInterval,
    item: DigestItem,
}

/// In-process implementation of every store trait.
///
/// Digest drains enqueue into the shared [`MemoryQueue`] while the digest
/// lock is held, so a drain and its delivery job appear together.
pub struct MemoryStore {
    feed: Mutex<FeedState>,
    deliveries: Mutex<Vec<(DbId, DeliveryAttempt)>>,
    preferences: Mutex<HashMap<DbId, NotificationPreference>>,
    push: Mutex<Vec<PushSubscription>>,
    next_push_id: AtomicI64,
    contacts: Mutex<HashMap<DbId, UserContact>>,
    digests: Mutex<Vec<PendingDigestItem>>,
    queue: Arc<MemoryQueue>,
    pub faults: Faults,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(MemoryQueue::new()))
    }
}

impl MemoryStore {
    pub fn new(queue: Arc<MemoryQueue>) -> Self {
        Self {
            feed: Mutex::default(),
            deliveries: Mutex::default(),
            preferences: Mutex::default(),
            push: Mutex::default(),
            next_push_id: AtomicI64::new(0),
            contacts: Mutex::default(),
            digests: Mutex::default(),
            queue,
            faults: Faults::default(),
        }
    }

    pub fn queue(&self) -> Arc<MemoryQueue> {
        Arc::clone(&self.queue)
    }

    pub fn set_contact(&self, user_id: DbId, email: Option<&str>, phone: Option<&str>) {
        lock(&self.contacts).insert(
            user_id,
            UserContact {
                user_id,
                email: email.map(str::to_string),
                phone: phone.map(str::to_string),
                updated_at: Some(Utc::now()),
            },
        );
    }

    /// Every recorded attempt for a notification, in recording order.
    pub fn attempts_for(&self, id: NotificationId) -> Vec<DeliveryAttempt> {
        lock(&self.deliveries)
            .iter()
            .filter(|(_, a)| a.notification_id == id)
            .map(|(_, a)| a.clone())
            .collect()
    }

    /// Every recorded attempt for a user, in recording order.
    pub fn attempts_for_user(&self, user_id: DbId) -> Vec<DeliveryAttempt> {
        lock(&self.deliveries)
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, a)| a.clone())
            .collect()
    }

    /// Items waiting in a batch, in arrival order.
    pub fn pending_digest(&self, user_id: DbId, interval: DigestInterval) -> Vec<DigestItem> {
        lock(&self.digests)
            .iter()
            .filter(|p| p.user_id == user_id && p.interval == interval)
            .map(|p| p.item.clone())
            .collect()
    }

    /// Number of feed rows for a user, read or not.
    pub fn feed_len(&self, user_id: DbId) -> usize {
        lock(&self.feed)
            .rows
            .values()
            .filter(|n| n.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert(&self, notification: &Notification) -> Result<bool, StoreError> {
        check(&self.faults.feed_writes, "feed")?;
        let mut feed = lock(&self.feed);
        if feed.rows.contains_key(&notification.id) {
            return Ok(false);
        }
        if !notification.is_read {
            *feed.unread.entry(notification.user_id).or_insert(0) += 1;
        }
        feed.rows.insert(notification.id, notification.clone());
        Ok(true)
    }

    async fn find(
        &self,
        user_id: DbId,
        id: NotificationId,
    ) -> Result<Option<Notification>, StoreError> {
        Ok(lock(&self.feed)
            .rows
            .get(&id)
            .filter(|n| n.user_id == user_id)
            .cloned())
    }

    async fn list(
        &self,
        user_id: DbId,
        query: &ListQuery,
        now: Timestamp,
    ) -> Result<(Vec<Notification>, i64), StoreError> {
        let (limit, offset) = query.limit_offset();
        let feed = lock(&self.feed);
        let mut matching: Vec<&Notification> = feed
            .rows
            .values()
            .filter(|n| n.user_id == user_id)
            .filter(|n| !n.is_expired(now))
            .filter(|n| !query.unread_only || !n.is_read)
            .filter(|n| {
                query
                    .types
                    .as_ref()
                    .is_none_or(|types| types.contains(&n.notification_type))
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn mark_read(
        &self,
        user_id: DbId,
        id: NotificationId,
    ) -> Result<MarkReadResult, StoreError> {
        check(&self.faults.feed_writes, "feed")?;
        let mut feed = lock(&self.feed);
        let Some(row) = feed.rows.get_mut(&id).filter(|n| n.user_id == user_id) else {
            return Ok(MarkReadResult::NotFound);
        };
        if !row.mark_read(Utc::now()) {
            return Ok(MarkReadResult::AlreadyRead);
        }
        let counter = feed.unread.entry(user_id).or_insert(0);
        *counter = (*counter - 1).max(0);
        Ok(MarkReadResult::Updated)
    }

    async fn mark_all_read(&self, user_id: DbId) -> Result<u64, StoreError> {
        check(&self.faults.feed_writes, "feed")?;
        let now = Utc::now();
        let mut feed = lock(&self.feed);
        let changed = feed
            .rows
            .values_mut()
            .filter(|n| n.user_id == user_id)
            .fold(0u64, |acc, n| acc + u64::from(n.mark_read(now)));
        feed.unread.insert(user_id, 0);
        Ok(changed)
    }

    async fn unread_count(&self, user_id: DbId) -> Result<i64, StoreError> {
        Ok(lock(&self.feed).unread.get(&user_id).copied().unwrap_or(0))
    }

    async fn record_attempts(
        &self,
        user_id: DbId,
        attempts: &[DeliveryAttempt],
    ) -> Result<(), StoreError> {
        check(&self.faults.delivery_records, "delivery log")?;
        lock(&self.deliveries).extend(attempts.iter().map(|a| (user_id, a.clone())));
        Ok(())
    }

    async fn sent_channels(
        &self,
        notification_id: NotificationId,
    ) -> Result<BTreeSet<Channel>, StoreError> {
        Ok(lock(&self.deliveries)
            .iter()
            .filter(|(_, a)| a.notification_id == notification_id && a.status == DeliveryStatus::Sent)
            .map(|(_, a)| a.channel)
            .collect())
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get(&self, user_id: DbId) -> Result<Option<NotificationPreference>, StoreError> {
        check(&self.faults.preferences, "preferences")?;
        Ok(lock(&self.preferences).get(&user_id).cloned())
    }

    async fn put(
        &self,
        preferences: &NotificationPreference,
    ) -> Result<NotificationPreference, StoreError> {
        check(&self.faults.preferences, "preferences")?;
        let mut stored = preferences.clone();
        stored.updated_at = Some(Utc::now());
        lock(&self.preferences).insert(stored.user_id, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl PushSubscriptionStore for MemoryStore {
    async fn upsert(
        &self,
        user_id: DbId,
        subscription: &NewPushSubscription,
    ) -> Result<PushSubscription, StoreError> {
        let mut subs = lock(&self.push);
        if let Some(existing) = subs
            .iter_mut()
            .find(|s| s.user_id == user_id && s.endpoint == subscription.endpoint)
        {
            existing.p256dh = subscription.keys.p256dh.clone();
            existing.auth = subscription.keys.auth.clone();
            existing.user_agent = subscription.user_agent.clone();
            return Ok(existing.clone());
        }

        let created = PushSubscription {
            id: self.next_push_id.fetch_add(1, Ordering::SeqCst) + 1,
            user_id,
            endpoint: subscription.endpoint.clone(),
            p256dh: subscription.keys.p256dh.clone(),
            auth: subscription.keys.auth.clone(),
            user_agent: subscription.user_agent.clone(),
            created_at: Utc::now(),
            last_used_at: None,
        };
        subs.push(created.clone());
        Ok(created)
    }

    async fn list(&self, user_id: DbId) -> Result<Vec<PushSubscription>, StoreError> {
        Ok(lock(&self.push)
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn remove(&self, user_id: DbId, endpoint: &str) -> Result<bool, StoreError> {
        let mut subs = lock(&self.push);
        let before = subs.len();
        subs.retain(|s| !(s.user_id == user_id && s.endpoint == endpoint));
        Ok(subs.len() < before)
    }

    async fn touch(&self, user_id: DbId, endpoint: &str) -> Result<(), StoreError> {
        if let Some(sub) = lock(&self.push)
            .iter_mut()
            .find(|s| s.user_id == user_id && s.endpoint == endpoint)
        {
            sub.last_used_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn get(&self, user_id: DbId) -> Result<Option<UserContact>, StoreError> {
        Ok(lock(&self.contacts).get(&user_id).cloned())
    }
}

#[async_trait]
impl DigestStore for MemoryStore {
    async fn append(
        &self,
        user_id: DbId,
        interval: DigestInterval,
        item: &DigestItem,
    ) -> Result<usize, StoreError> {
        let mut digests = lock(&self.digests);
        digests.push(PendingDigestItem {
            user_id,
            interval,
            item: item.clone(),
        });
        Ok(digests
            .iter()
            .filter(|p| p.user_id == user_id && p.interval == interval)
            .count())
    }

    async fn users_with_pending(&self, interval: DigestInterval) -> Result<Vec<DbId>, StoreError> {
        let mut users: Vec<DbId> = lock(&self.digests)
            .iter()
            .filter(|p| p.interval == interval)
            .map(|p| p.user_id)
            .collect();
        users.sort_unstable();
        users.dedup();
        Ok(users)
    }

    async fn drain_into_delivery_job(
        &self,
        user_id: DbId,
        interval: DigestInterval,
        run_at: Timestamp,
    ) -> Result<usize, StoreError> {
        let mut digests = lock(&self.digests);
        let (batch, rest): (Vec<_>, Vec<_>) = digests
            .drain(..)
            .partition(|p| p.user_id == user_id && p.interval == interval);

        if batch.is_empty() {
            *digests = rest;
            return Ok(0);
        }

        // Vec order is append order, which is arrival order.
        let items: Vec<DigestItem> = batch.iter().map(|p| p.item.clone()).collect();
        let count = items.len();
        let job = Job::DigestDelivery(DigestDelivery {
            notification_id: NotificationId::now_v7(),
            user_id,
            interval,
            items,
        });

        let enqueued = self
            .queue
            .check_available()
            .and_then(|()| lock(&self.queue.state).insert(&job, EnqueueOptions::at(run_at)));

        match enqueued {
            Ok(_) => {
                *digests = rest;
                Ok(count)
            }
            Err(e) => {
                // Roll back: put the batch back where it was.
                *digests = rest.into_iter().chain(batch).collect();
                Err(StoreError::Unavailable(e.to_string()))
            }
        }
    }
}
