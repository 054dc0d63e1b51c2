// Dispatch configuration
// Every knob is fixed at construction; the queue manager never re-reads it.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const ENV_MAX_CONCURRENT: &str = "CODEQ_MAX_CONCURRENT";
pub const ENV_MAX_QUEUE_SIZE: &str = "CODEQ_MAX_QUEUE_SIZE";
pub const ENV_MAX_RETRIES: &str = "CODEQ_MAX_RETRIES";
pub const ENV_RESULT_TTL_SECS: &str = "CODEQ_RESULT_TTL_SECS";
pub const ENV_FAILURE_THRESHOLD: &str = "CODEQ_FAILURE_THRESHOLD";
pub const ENV_RECOVERY_TIMEOUT_SECS: &str = "CODEQ_RECOVERY_TIMEOUT_SECS";
pub const ENV_EXECUTION_TIMEOUT_SECS: &str = "CODEQ_EXECUTION_TIMEOUT_SECS";
pub const ENV_BACKOFF_UNIT_MS: &str = "CODEQ_BACKOFF_UNIT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "CODEQ_POLL_INTERVAL_MS";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "CODEQ_CLEANUP_INTERVAL_SECS";

/// Upper bound for `max_concurrent` and `max_queue_size`.
/// Well below the permit limit of the runtime's semaphore and channel.
pub const MAX_CAPACITY: usize = 1 << 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("{key} out of range: {reason}")]
    OutOfRange { key: &'static str, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Capacity of the concurrency gate
    pub max_concurrent: usize,
    /// Admission bound on requests not yet dispatched
    pub max_queue_size: usize,
    /// Extra attempts after the first one
    pub max_retries: u32,
    pub result_ttl: Duration,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Per-attempt budget handed to the executor client
    pub execution_timeout: Duration,
    /// Retry backoff is `backoff_unit * 2^(attempt-1)`
    pub backoff_unit: Duration,
    /// Bounded wait of the dispatch loop between stop-signal checks
    pub poll_interval: Duration,
    /// Enables the periodic result sweep; `None` keeps eviction lazy
    pub cleanup_interval: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_queue_size: 50,
            max_retries: 2,
            result_ttl: Duration::from_secs(300),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            execution_timeout: Duration::from_secs(10),
            backoff_unit: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            cleanup_interval: None,
        }
    }
}

impl DispatchConfig {
    /// Defaults overlaid with `CODEQ_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each key
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse(&lookup, ENV_MAX_CONCURRENT)? {
            config.max_concurrent = v;
        }
        if let Some(v) = parse(&lookup, ENV_MAX_QUEUE_SIZE)? {
            config.max_queue_size = v;
        }
        if let Some(v) = parse(&lookup, ENV_MAX_RETRIES)? {
            config.max_retries = v;
        }
        if let Some(secs) = parse(&lookup, ENV_RESULT_TTL_SECS)? {
            config.result_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = parse(&lookup, ENV_FAILURE_THRESHOLD)? {
            config.failure_threshold = v;
        }
        if let Some(secs) = parse(&lookup, ENV_RECOVERY_TIMEOUT_SECS)? {
            config.recovery_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, ENV_EXECUTION_TIMEOUT_SECS)? {
            config.execution_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse(&lookup, ENV_BACKOFF_UNIT_MS)? {
            config.backoff_unit = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64, _>(&lookup, ENV_CLEANUP_INTERVAL_SECS)? {
            config.cleanup_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::OutOfRange {
                key: ENV_MAX_CONCURRENT,
                reason: "must be at least 1",
            });
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::OutOfRange {
                key: ENV_MAX_QUEUE_SIZE,
                reason: "must be at least 1",
            });
        }
        if self.max_concurrent > MAX_CAPACITY {
            return Err(ConfigError::OutOfRange {
                key: ENV_MAX_CONCURRENT,
                reason: "too large",
            });
        }
        if self.max_queue_size > MAX_CAPACITY {
            return Err(ConfigError::OutOfRange {
                key: ENV_MAX_QUEUE_SIZE,
                reason: "too large",
            });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::OutOfRange {
                key: ENV_FAILURE_THRESHOLD,
                reason: "must be at least 1",
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: ENV_POLL_INTERVAL_MS,
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
