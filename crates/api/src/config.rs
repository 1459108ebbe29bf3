use std::time::Duration;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. In production,
/// override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for the queue worker to stop (default: `5`).
    pub shutdown_timeout_secs: u64,
    /// JWT validation settings shared by HTTP and WebSocket auth.
    pub jwt: JwtConfig,
    /// Delivery pipeline tuning.
    pub delivery: DeliverySettings,
}

/// Tunables for the delivery pipeline.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// How long resolved preferences stay cached (default: `300` seconds).
    pub preference_cache_ttl: Duration,
    /// Maximum number of users held in the preference cache.
    pub preference_cache_capacity: usize,
    /// How long an offline user's unread-count snapshot is kept (default: `86400` seconds).
    pub unread_buffer_ttl: Duration,
    /// Maximum number of offline users with a buffered unread count.
    pub unread_buffer_capacity: usize,
    /// Delay before a retryable channel failure is retried (default: `60` seconds).
    pub channel_retry_delay: Duration,
    /// Queue worker poll interval (default: `1000` ms).
    pub queue_poll_interval: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            preference_cache_ttl: herald_delivery::preferences::DEFAULT_CACHE_TTL,
            preference_cache_capacity: herald_delivery::preferences::DEFAULT_CACHE_CAPACITY,
            unread_buffer_ttl: herald_delivery::session::DEFAULT_UNREAD_BUFFER_TTL,
            unread_buffer_capacity: herald_delivery::session::DEFAULT_UNREAD_BUFFER_CAPACITY,
            channel_retry_delay: herald_delivery::orchestrator::DEFAULT_CHANNEL_RETRY_DELAY,
            queue_poll_interval: herald_delivery::queue::DEFAULT_POLL_INTERVAL,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                 |
    /// |------------------------------|-------------------------|
    /// | `HOST`                       | `0.0.0.0`               |
    /// | `PORT`                       | `3000`                  |
    /// | `CORS_ORIGINS`               | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`       | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`      | `5`                     |
    /// | `PREFERENCE_CACHE_TTL_SECS`  | `300`                   |
    /// | `PREFERENCE_CACHE_CAPACITY`  | `10000`                 |
    /// | `UNREAD_BUFFER_TTL_SECS`     | `86400`                 |
    /// | `UNREAD_BUFFER_CAPACITY`     | `100000`                |
    /// | `CHANNEL_RETRY_DELAY_SECS`   | `60`                    |
    /// | `QUEUE_POLL_INTERVAL_MS`     | `1000`                  |
    ///
    /// # Panics
    ///
    /// Panics on unparsable values and when `JWT_SECRET` is missing.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let defaults = DeliverySettings::default();
        let delivery = DeliverySettings {
            preference_cache_ttl: Duration::from_secs(env_or(
                "PREFERENCE_CACHE_TTL_SECS",
                defaults.preference_cache_ttl.as_secs(),
            )),
            preference_cache_capacity: env_or(
                "PREFERENCE_CACHE_CAPACITY",
                defaults.preference_cache_capacity,
            ),
            unread_buffer_ttl: Duration::from_secs(env_or(
                "UNREAD_BUFFER_TTL_SECS",
                defaults.unread_buffer_ttl.as_secs(),
            )),
            unread_buffer_capacity: env_or(
                "UNREAD_BUFFER_CAPACITY",
                defaults.unread_buffer_capacity,
            ),
            channel_retry_delay: Duration::from_secs(env_or(
                "CHANNEL_RETRY_DELAY_SECS",
                defaults.channel_retry_delay.as_secs(),
            )),
            queue_poll_interval: Duration::from_millis(env_or(
                "QUEUE_POLL_INTERVAL_MS",
                defaults.queue_poll_interval.as_millis() as u64,
            )),
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 5),
            jwt: JwtConfig::from_env(),
            delivery,
        }
    }
}
