//! Periodic eviction of expired in-process cache entries.
//!
//! Reads already ignore stale preferences and stale unread snapshots; this
//! sweep only bounds the memory held for users who went quiet.

use std::sync::Arc;
use std::time::Duration;

use herald_delivery::{PreferenceAccessor, SessionRegistry};
use tokio_util::sync::CancellationToken;

/// How often the sweep runs.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Run the purge loop until `cancel` is triggered.
pub async fn run(
    preferences: Arc<PreferenceAccessor>,
    sessions: Arc<SessionRegistry>,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = PURGE_INTERVAL.as_secs(),
        "Cache purge started"
    );

    let mut interval = tokio::time::interval(PURGE_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Cache purge stopping");
                break;
            }
            _ = interval.tick() => {
                purge_once(&preferences, &sessions);
            }
        }
    }
}

fn purge_once(preferences: &PreferenceAccessor, sessions: &SessionRegistry) {
    let preferences_purged = preferences.purge_expired();
    let snapshots_purged = sessions.purge_expired();
    if preferences_purged + snapshots_purged > 0 {
        tracing::debug!(
            preferences_purged,
            snapshots_purged,
            cached_preferences = preferences.cached_len(),
            buffered_snapshots = sessions.buffered_len(),
            "Purged expired cache entries"
        );
    }
}
