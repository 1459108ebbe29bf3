//! Domain types and pure rules for the Herald notification delivery core.
//!
//! Nothing in this crate performs I/O. The delivery crate builds the
//! orchestration pipeline on top of these types and the db crate maps them
//! to PostgreSQL rows.

pub mod channels;
pub mod delivery;
pub mod digest;
pub mod error;
pub mod jobs;
pub mod notification;
pub mod preferences;
pub mod quiet_hours;
pub mod types;
