//! Herald notification delivery pipeline.
//!
//! This crate wires the pure rules from `herald_core` to storage, transports
//! and live connections:
//!
//! - [`PreferenceAccessor`] - TTL-cached preference lookups.
//! - [`SessionRegistry`] - process-local registry of open real-time
//!   connections.
//! - [`channels`] - one [`ChannelSender`] per delivery medium.
//! - [`DeliveryOrchestrator`] - the gate/fan-out/persist pipeline behind
//!   `send`.
//! - [`queue`] and [`scheduler`] - durable deferred work (quiet-hours
//!   deliveries, channel retries, digest flushes).
//! - [`NotificationService`] - the inbound API surface.
//!
//! Storage is abstracted behind the traits in [`store`]; [`PgStore`] backs
//! them with PostgreSQL and [`MemoryStore`] keeps everything in process.

pub mod channels;
pub mod error;
mod eviction;
pub mod memory;
pub mod orchestrator;
pub mod postgres;
pub mod preferences;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod store;

pub use channels::{ChannelSender, ChannelSet};
pub use error::{DeliveryError, QueueError, StoreError};
pub use memory::{MemoryQueue, MemoryStore};
pub use orchestrator::{DeliveryOrchestrator, OrchestratorConfig};
pub use postgres::PgStore;
pub use preferences::PreferenceAccessor;
pub use queue::{JobHandler, JobQueue, QueueWorker};
pub use service::NotificationService;
pub use session::{RealtimeEvent, SessionMessage, SessionRegistry};
