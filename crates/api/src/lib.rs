//! Herald API server library.
//!
//! Hosts the real-time transport of the notification core: the
//! authenticated WebSocket upgrade feeding the session registry, the health
//! check, and the wiring that assembles the delivery pipeline. Exposed as a
//! library so integration tests and the binary entrypoint share it.

pub mod auth;
pub mod background;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
