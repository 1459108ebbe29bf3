//! Cached access to per-user notification preferences.
//!
//! Reads go through a TTL cache keyed by user id. Writes validate, merge,
//! persist and then drop the cached entry before returning, so the next read
//! in this process sees the new document.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use herald_core::preferences::{NotificationPreference, PreferenceUpdate};
use herald_core::types::DbId;
use tokio::time::Instant;

use crate::error::DeliveryError;
use crate::eviction::evict_oldest;
use crate::store::PreferenceStore;

/// Default lifetime of a cached preference document.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of cached users.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

struct CachedPreference {
    preferences: NotificationPreference,
    loaded_at: Instant,
}

/// Preference store accessor with a bounded TTL cache.
pub struct PreferenceAccessor {
    store: Arc<dyn PreferenceStore>,
    cache: DashMap<DbId, CachedPreference>,
    ttl: Duration,
    capacity: usize,
}

impl PreferenceAccessor {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self::with_cache(store, DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache(store: Arc<dyn PreferenceStore>, ttl: Duration, capacity: usize) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Resolved preferences for a user: stored overrides merged over the
    /// defaults, or pure defaults when nothing is stored.
    pub async fn get(&self, user_id: DbId) -> Result<NotificationPreference, DeliveryError> {
        if let Some(hit) = self.cached(user_id) {
            return Ok(hit);
        }

        let loaded = self
            .store
            .get(user_id)
            .await
            .map_err(|e| {
                tracing::error!(user_id, error = %e, "Failed to load preferences");
                DeliveryError::PreferenceUnavailable(e)
            })?
            .map(NotificationPreference::normalized)
            .unwrap_or_else(|| NotificationPreference::defaults(user_id));

        self.insert(user_id, loaded.clone());
        Ok(loaded)
    }

    /// Merge a partial update into the user's preferences and persist it.
    ///
    /// Invalid input (unknown timezone, malformed `HH:MM`) is rejected before
    /// anything is written.
    pub async fn update(
        &self,
        user_id: DbId,
        update: &PreferenceUpdate,
    ) -> Result<NotificationPreference, DeliveryError> {
        update.validate()?;

        let mut current = self.get(user_id).await?;
        current.apply(update)?;

        let stored = self
            .store
            .put(&current)
            .await
            .map_err(DeliveryError::PreferenceUnavailable)?;
        self.invalidate(user_id);

        tracing::info!(user_id, "Notification preferences updated");
        Ok(stored.normalized())
    }

    /// Drop a user's cached entry.
    pub fn invalidate(&self, user_id: DbId) {
        self.cache.remove(&user_id);
    }

    /// Evict every expired entry. Returns the number evicted.
    pub fn purge_expired(&self) -> usize {
        let before = self.cache.len();
        self.cache
            .retain(|_, entry| entry.loaded_at.elapsed() < self.ttl);
        before.saturating_sub(self.cache.len())
    }

    /// Number of cached users, including not-yet-purged expired entries.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn cached(&self, user_id: DbId) -> Option<NotificationPreference> {
        let fresh = {
            let entry = self.cache.get(&user_id)?;
            (entry.loaded_at.elapsed() < self.ttl).then(|| entry.preferences.clone())
        };
        if fresh.is_none() {
            self.cache.remove(&user_id);
        }
        fresh
    }

    fn insert(&self, user_id: DbId, preferences: NotificationPreference) {
        if self.cache.len() >= self.capacity && !self.cache.contains_key(&user_id) {
            // Expired entries are the oldest, so they go first.
            let evicted = evict_oldest(&self.cache, self.capacity, |entry| entry.loaded_at);
            tracing::debug!(evicted, capacity = self.capacity, "Preference cache full");
        }
        self.cache.insert(
            user_id,
            CachedPreference {
                preferences,
                loaded_at: Instant::now(),
            },
        );
    }
}
