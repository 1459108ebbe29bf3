//! Row models and DTOs, one module per table family.

pub mod contact;
pub mod digest;
pub mod job;
pub mod notification;
pub mod preference;
pub mod push_subscription;
