//! Store connection configuration.
//!
//! Environment-based configuration for the remote store connection and the
//! supervisor's retry/probe behavior.

use std::time::Duration;

/// Remote store connection configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Remote store host (e.g., "127.0.0.1")
    pub host: String,
    /// Remote store port
    pub port: u16,
    /// Password for authentication (optional)
    pub password: Option<String>,
    /// Connection timeout per connect attempt
    pub connect_timeout: Duration,
    /// Max initial-connect attempts before activating fallback
    pub max_connect_retries: u32,
    /// Liveness probe interval while connected
    pub probe_interval: Duration,
    /// Expired-entry sweep interval while in fallback mode
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            connect_timeout: Duration::from_secs(10),
            max_connect_retries: 5,
            probe_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STORE_HOST`: Remote host (default: 127.0.0.1)
    /// - `STORE_PORT`: Remote port (default: 6379)
    /// - `STORE_PASSWORD`: Authentication password (default: none)
    /// - `STORE_CONNECT_TIMEOUT_MS`: Connect timeout in ms (default: 10000)
    /// - `STORE_MAX_CONNECT_RETRIES`: Connect attempts before fallback (default: 5)
    /// - `STORE_PROBE_INTERVAL_MS`: Liveness probe interval in ms (default: 60000)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("STORE_HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("STORE_PORT") {
            if let Ok(n) = port.parse() {
                config.port = n;
            }
        }

        if let Ok(password) = std::env::var("STORE_PASSWORD") {
            if !password.is_empty() {
                config.password = Some(password);
            }
        }

        if let Ok(ms) = std::env::var("STORE_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                config.connect_timeout = Duration::from_millis(n);
            }
        }

        if let Ok(retries) = std::env::var("STORE_MAX_CONNECT_RETRIES") {
            if let Ok(n) = retries.parse() {
                config.max_connect_retries = n;
            }
        }

        if let Ok(ms) = std::env::var("STORE_PROBE_INTERVAL_MS") {
            if let Ok(n) = ms.parse() {
                config.probe_interval = Duration::from_millis(n);
            }
        }

        config
    }

    /// Connection URL for the remote store.
    pub fn url(&self) -> String {
        match self.password {
            Some(ref pw) => format!("redis://:{}@{}:{}/", pw, self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }

    /// Delay before the given (1-based) connect attempt retries.
    #[inline]
    pub fn retry_delay(attempt: u32) -> Duration {
        Duration::from_millis((u64::from(attempt) * 1_000).min(5_000))
    }
}
