//! Durable job queue models.

use herald_core::jobs::{Job, Repeat};
use herald_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `queued_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct QueuedJobRow {
    pub id: DbId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_at: Timestamp,
    pub attempts: i32,
    pub max_attempts: i32,
    pub repeat: Option<String>,
    pub dedupe_key: Option<String>,
    pub last_error: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl QueuedJobRow {
    /// Decode the typed job. Fails for unknown kinds or malformed payloads.
    pub fn job(&self) -> Result<Job, serde_json::Error> {
        Job::from_parts(&self.kind, self.payload.clone())
    }

    pub fn repeat(&self) -> Option<Repeat> {
        self.repeat.as_deref().and_then(|r| r.parse().ok())
    }
}

/// DTO for inserting a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: String,
    pub payload: serde_json::Value,
    pub run_at: Timestamp,
    pub max_attempts: i32,
    pub repeat: Option<Repeat>,
    /// Unique key; a second insert with the same key is ignored.
    pub dedupe_key: Option<String>,
}

impl NewJob {
    pub fn new(job: &Job, run_at: Timestamp, max_attempts: i32) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: job.kind().as_str().to_string(),
            payload: job.payload()?,
            run_at,
            max_attempts,
            repeat: None,
            dedupe_key: None,
        })
    }
}
