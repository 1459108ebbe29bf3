use std::sync::Arc;

use herald_delivery::session::SessionAuthorizer;
use herald_delivery::SessionRegistry;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool, used by the health check.
    pub pool: herald_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Open real-time connections.
    pub sessions: Arc<SessionRegistry>,
    /// Credential check for WebSocket upgrades.
    pub authorizer: Arc<dyn SessionAuthorizer>,
}
