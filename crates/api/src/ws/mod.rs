//! WebSocket transport for the session registry.
//!
//! Provides the authenticated upgrade handler and the heartbeat task. The
//! registry itself lives in `herald_delivery::session`.

mod handler;
mod heartbeat;

pub use handler::{frame_for, ws_handler, WsParams};
pub use heartbeat::{start_heartbeat, HEARTBEAT_INTERVAL_SECS};
