//! Storage seams used by the delivery pipeline.
//!
//! Each trait covers one table family. [`PgStore`](crate::PgStore) implements
//! all of them on PostgreSQL; [`MemoryStore`](crate::MemoryStore) implements
//! them in process for tests and single-node development.

use std::collections::BTreeSet;

use async_trait::async_trait;
use herald_core::channels::Channel;
use herald_core::delivery::DeliveryAttempt;
use herald_core::digest::DigestItem;
use herald_core::notification::{ListQuery, Notification};
use herald_core::preferences::{DigestInterval, NotificationPreference};
use herald_core::types::{DbId, NotificationId, Timestamp};
use herald_db::models::contact::UserContact;
use herald_db::models::notification::MarkReadResult;
use herald_db::models::push_subscription::{NewPushSubscription, PushSubscription};

use crate::error::StoreError;

/// Feed rows, unread counters and delivery outcomes.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a feed row and bump the unread counter. Idempotent on id:
    /// returns `false` and changes nothing if the row already exists.
    async fn insert(&self, notification: &Notification) -> Result<bool, StoreError>;

    async fn find(
        &self,
        user_id: DbId,
        id: NotificationId,
    ) -> Result<Option<Notification>, StoreError>;

    /// One page of the user's non-expired feed, newest first, plus the total
    /// number of rows matching the filter.
    async fn list(
        &self,
        user_id: DbId,
        query: &ListQuery,
        now: Timestamp,
    ) -> Result<(Vec<Notification>, i64), StoreError>;

    async fn mark_read(
        &self,
        user_id: DbId,
        id: NotificationId,
    ) -> Result<MarkReadResult, StoreError>;

    async fn mark_all_read(&self, user_id: DbId) -> Result<u64, StoreError>;

    async fn unread_count(&self, user_id: DbId) -> Result<i64, StoreError>;

    async fn record_attempts(
        &self,
        user_id: DbId,
        attempts: &[DeliveryAttempt],
    ) -> Result<(), StoreError>;

    /// Channels with a recorded `sent` outcome for this notification.
    async fn sent_channels(
        &self,
        notification_id: NotificationId,
    ) -> Result<BTreeSet<Channel>, StoreError>;
}

/// Stored preference documents. Absent rows mean "all defaults".
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, user_id: DbId) -> Result<Option<NotificationPreference>, StoreError>;

    /// Persist the full document, returning it as stored.
    async fn put(
        &self,
        preferences: &NotificationPreference,
    ) -> Result<NotificationPreference, StoreError>;
}

#[async_trait]
pub trait PushSubscriptionStore: Send + Sync {
    async fn upsert(
        &self,
        user_id: DbId,
        subscription: &NewPushSubscription,
    ) -> Result<PushSubscription, StoreError>;

    async fn list(&self, user_id: DbId) -> Result<Vec<PushSubscription>, StoreError>;

    /// Returns `true` if the endpoint existed.
    async fn remove(&self, user_id: DbId, endpoint: &str) -> Result<bool, StoreError>;

    async fn touch(&self, user_id: DbId, endpoint: &str) -> Result<(), StoreError>;
}

/// Read-only view of the user directory's contact data.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn get(&self, user_id: DbId) -> Result<Option<UserContact>, StoreError>;
}

/// Pending digest batches.
#[async_trait]
pub trait DigestStore: Send + Sync {
    /// Append an item and return the batch size afterwards.
    async fn append(
        &self,
        user_id: DbId,
        interval: DigestInterval,
        item: &DigestItem,
    ) -> Result<usize, StoreError>;

    async fn users_with_pending(&self, interval: DigestInterval) -> Result<Vec<DbId>, StoreError>;

    /// Empty the batch and enqueue a digest-delivery job for it in one
    /// atomic step. Returns the number of items drained.
    async fn drain_into_delivery_job(
        &self,
        user_id: DbId,
        interval: DigestInterval,
        run_at: Timestamp,
    ) -> Result<usize, StoreError>;
}
