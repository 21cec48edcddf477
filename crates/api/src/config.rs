use std::str::FromStr;
use std::time::Duration;

use typology_core::run_state::DEFAULT_RETRY_CEILING;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
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
    /// How long shutdown waits for the queue worker to stop (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Public origin used for canonical URLs in page metadata.
    pub site_url: String,
    /// Which [`RunStore`](typology_db::store::RunStore) backs the server.
    pub store_backend: StoreBackend,
    /// Base URL of the scoring service.
    pub scorer_url: String,
    pub queue: QueueConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    /// | `SITE_URL`             | `http://localhost:3000`    |
    /// | `STORE_BACKEND`        | `postgres`                 |
    /// | `SCORER_URL`           | `http://localhost:8090`    |
    ///
    /// Queue settings are read by [`QueueConfig::from_env`].
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

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let site_url = std::env::var("SITE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .trim_end_matches('/')
            .to_string();

        let store_backend: StoreBackend = std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".into())
            .parse()
            .unwrap_or_else(|e| panic!("{e}"));

        let scorer_url = std::env::var("SCORER_URL")
            .unwrap_or_else(|_| "http://localhost:8090".into())
            .trim_end_matches('/')
            .to_string();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            site_url,
            store_backend,
            scorer_url,
            queue: QueueConfig::from_env(),
        }
    }
}

/// Backing store selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local; runs are lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!(
                "STORE_BACKEND must be 'postgres' or 'memory', got '{other}'"
            )),
        }
    }
}

/// Run queue worker settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Sleep between empty polls.
    pub poll_interval: Duration,
    /// The worker loop exits after this long without claiming anything.
    pub idle_shutdown: Duration,
    /// Failures tolerated before a run becomes `ERROR`.
    pub retry_ceiling: i32,
    /// `PROCESSING` claims older than this are requeued as failures.
    pub stale_after: Duration,
    /// Upper bound on a single scoring call. Must stay below `stale_after`.
    pub execution_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            idle_shutdown: Duration::from_secs(60),
            retry_ceiling: DEFAULT_RETRY_CEILING,
            stale_after: Duration::from_secs(900),
            execution_timeout: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    /// Load queue settings from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `RUN_POLL_INTERVAL_MS`       | `1000`  |
    /// | `RUN_IDLE_SHUTDOWN_SECS`     | `60`    |
    /// | `RUN_RETRY_CEILING`          | `3`     |
    /// | `RUN_STALE_AFTER_SECS`       | `900`   |
    /// | `RUN_EXECUTION_TIMEOUT_SECS` | `300`   |
    ///
    /// Panics when the execution timeout is not below the stale timeout,
    /// since a slow but healthy scoring call would then be reclaimed.
    pub fn from_env() -> Self {
        let poll_interval_ms: u64 = std::env::var("RUN_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("RUN_POLL_INTERVAL_MS must be a valid u64");

        let idle_shutdown_secs: u64 = std::env::var("RUN_IDLE_SHUTDOWN_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("RUN_IDLE_SHUTDOWN_SECS must be a valid u64");

        let retry_ceiling: i32 = std::env::var("RUN_RETRY_CEILING")
            .unwrap_or_else(|_| DEFAULT_RETRY_CEILING.to_string())
            .parse()
            .expect("RUN_RETRY_CEILING must be a valid i32");
        assert!(retry_ceiling >= 1, "RUN_RETRY_CEILING must be at least 1");

        let stale_after_secs: u64 = std::env::var("RUN_STALE_AFTER_SECS")
            .unwrap_or_else(|_| "900".into())
            .parse()
            .expect("RUN_STALE_AFTER_SECS must be a valid u64");

        let execution_timeout_secs: u64 = std::env::var("RUN_EXECUTION_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("RUN_EXECUTION_TIMEOUT_SECS must be a valid u64");
        assert!(
            execution_timeout_secs < stale_after_secs,
            "RUN_EXECUTION_TIMEOUT_SECS must be below RUN_STALE_AFTER_SECS"
        );

        Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            idle_shutdown: Duration::from_secs(idle_shutdown_secs),
            retry_ceiling,
            stale_after: Duration::from_secs(stale_after_secs),
            execution_timeout: Duration::from_secs(execution_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_backend_parses_case_insensitively() {
        let postgres = "Postgres".parse::<StoreBackend>();
        let memory = " memory ".parse::<StoreBackend>();
        assert_eq!(postgres, Ok(StoreBackend::Postgres));
        assert_eq!(memory, Ok(StoreBackend::Memory));
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn queue_defaults_keep_execution_below_staleness() {
        let config = QueueConfig::default();
        assert_eq!(config.retry_ceiling, 3);
        assert!(config.execution_timeout < config.stale_after);
    }
}
