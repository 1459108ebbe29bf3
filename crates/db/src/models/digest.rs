//! Digest batch models.

use herald_core::digest::DigestItem;
use herald_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `digest_items` table.
#[derive(Debug, Clone, FromRow)]
pub struct DigestItemRow {
    pub id: DbId,
    pub user_id: DbId,
    pub digest_interval: String,
    pub bucket: String,
    pub item: serde_json::Value,
    pub arrived_at: Timestamp,
}

impl DigestItemRow {
    pub fn into_item(self) -> Result<DigestItem, serde_json::Error> {
        serde_json::from_value(self.item)
    }
}
