//! Token authentication shared by the HTTP routes and the WebSocket upgrade.

pub mod jwt;
