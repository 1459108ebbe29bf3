use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald_api::auth::jwt::JwtAuthorizer;
use herald_api::config::ServerConfig;
use herald_api::pipeline::{build_pipeline, Transports};
use herald_api::router::build_app_router;
use herald_api::state::AppState;
use herald_api::{background, ws};
use herald_delivery::scheduler::register_recurring_flushes;
use herald_delivery::{JobQueue, PgStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "herald_api=debug,herald_delivery=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = herald_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    herald_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    herald_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Delivery pipeline ---
    let store = Arc::new(PgStore::new(pool.clone()));
    let queue: Arc<dyn JobQueue> = store.clone();
    let pipeline = build_pipeline(
        store,
        Arc::clone(&queue),
        Transports::from_env(),
        &config.delivery,
    );
    tracing::info!(
        channels = ?pipeline.orchestrator.senders().channels().collect::<Vec<_>>(),
        "Delivery pipeline ready"
    );

    match register_recurring_flushes(queue.as_ref(), Utc::now()).await {
        Ok(added) => tracing::info!(added, "Digest flush schedule registered"),
        Err(e) => tracing::error!(error = %e, "Failed to register digest flush schedule"),
    }

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let worker = pipeline.worker;
    let worker_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { worker.run(cancel).await }
    });

    let purge_handle = tokio::spawn(background::cache_purge::run(
        Arc::clone(&pipeline.preferences),
        Arc::clone(&pipeline.sessions),
        cancel.clone(),
    ));

    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&pipeline.sessions));
    tracing::info!("WebSocket heartbeat started");

    // --- Router ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        sessions: Arc::clone(&pipeline.sessions),
        authorizer: Arc::new(JwtAuthorizer::new(config.jwt.clone())),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid HOST:PORT combination");

    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(shutdown_timeout, worker_handle).await.is_err() {
        tracing::warn!("Queue worker did not stop in time");
    }
    let _ = tokio::time::timeout(shutdown_timeout, purge_handle).await;
    tracing::info!("Background tasks stopped");

    pipeline.sessions.shutdown_all();

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
