//! Contact data read from the user directory.

use herald_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `user_contacts` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct UserContact {
    pub user_id: DbId,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(skip)]
    pub updated_at: Option<Timestamp>,
}
