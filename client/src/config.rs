//! Configuration management for the sync engine.

use crate::backoff::BackoffPolicy;
use sitesync_engine::QueueLimits;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the project service
    pub server_url: String,
    /// SQLite connection string
    pub database: String,
    /// Client id; generated and persisted on first start when unset
    pub client_id: Option<String>,
    /// Bearer token supplied by the login flow
    pub session_token: Option<String>,
    /// Maximum mutations per batch
    pub batch_size: usize,
    /// Live mutations allowed before enqueue fails
    pub max_pending: usize,
    /// Failed deliveries tolerated before a mutation is discarded
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra random wait as a fraction of the nominal delay, 0.0 to 1.0
    pub jitter: f64,
    /// Periodic sync tick while online
    pub tick: Duration,
    /// Deadline for one batch round trip
    pub batch_timeout: Duration,
    /// Reachability probe period
    pub probe_interval: Duration,
    /// Minimum time a connectivity change must hold before it is published
    pub dwell: Duration,
    /// Start a batch right after enqueue when online and idle
    pub sync_on_enqueue: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            database: "sqlite://sitesync.db".to_string(),
            client_id: None,
            session_token: None,
            batch_size: 20,
            max_pending: sitesync_engine::queue::DEFAULT_MAX_PENDING,
            max_retries: sitesync_engine::queue::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(60_000),
            jitter: 0.2,
            tick: Duration::from_millis(5_000),
            batch_timeout: Duration::from_millis(15_000),
            probe_interval: Duration::from_millis(10_000),
            dwell: Duration::from_millis(2_000),
            sync_on_enqueue: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let jitter: f64 = parse_var("SITESYNC_JITTER", defaults.jitter)?;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::Invalid {
                var: "SITESYNC_JITTER",
                value: jitter.to_string(),
            });
        }

        let batch_size: usize = parse_var("SITESYNC_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                var: "SITESYNC_BATCH_SIZE",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            server_url: env::var("SITESYNC_SERVER_URL").unwrap_or(defaults.server_url),
            database: env::var("SITESYNC_DATABASE").unwrap_or(defaults.database),
            client_id: env::var("SITESYNC_CLIENT_ID").ok(),
            session_token: env::var("SITESYNC_SESSION_TOKEN").ok(),
            batch_size,
            max_pending: parse_var("SITESYNC_MAX_PENDING", defaults.max_pending)?,
            max_retries: parse_var("SITESYNC_MAX_RETRIES", defaults.max_retries)?,
            base_delay: parse_millis("SITESYNC_BASE_DELAY_MS", defaults.base_delay)?,
            max_delay: parse_millis("SITESYNC_MAX_DELAY_MS", defaults.max_delay)?,
            jitter,
            tick: parse_millis("SITESYNC_TICK_MS", defaults.tick)?,
            batch_timeout: parse_millis("SITESYNC_BATCH_TIMEOUT_MS", defaults.batch_timeout)?,
            probe_interval: parse_millis("SITESYNC_PROBE_MS", defaults.probe_interval)?,
            dwell: parse_millis("SITESYNC_DWELL_MS", defaults.dwell)?,
            sync_on_enqueue: defaults.sync_on_enqueue,
        })
    }

    pub fn queue_limits(&self) -> QueueLimits {
        QueueLimits {
            max_pending: self.max_pending,
            max_retries: self.max_retries,
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.base_delay,
            max: self.max_delay,
            jitter: self.jitter,
        }
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}

fn parse_millis(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let ms: u64 = parse_var(var, default.as_millis() as u64)?;
    if ms == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {var} value: {value}")]
    Invalid { var: &'static str, value: String },
}
