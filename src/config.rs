//! Configuration consumed by the event layer.
//!
//! Settings come from a flat property map (`audit.broker_url = vm://0`) or
//! from the environment (`AUDIT_BROKER_URL=vm://0`). Anything not set keeps
//! its default.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const ENABLED: &str = "audit.enabled";
pub const BROKER_URL: &str = "audit.broker_url";
pub const LARGE_MSG_SIZE: &str = "audit.large_msg_size";
pub const LISTENERS: &str = "audit.listeners";
pub const RECEIVER_POLL_INTERVAL: &str = "audit.receiver.poll_interval";
pub const RECEIVER_RETRY_INTERVAL: &str = "audit.receiver.retry_interval";
pub const FILTER_ENABLED: &str = "audit.filter.enabled";
pub const FILTER_POLICY: &str = "audit.filter.policy";
pub const FILTER_DO_NOT_FILTER: &str = "audit.filter.donotfilter";
pub const FILTER_DO_FILTER: &str = "audit.filter.dofilter";
pub const SECONDARY_ENABLED: &str = "audit.secondary.enabled";
pub const SECONDARY_BROKER_URL: &str = "audit.secondary.broker_url";
pub const SECONDARY_EXCHANGE: &str = "audit.secondary.exchange";
pub const SECONDARY_RETRY_ATTEMPTS: &str = "audit.secondary.retry_attempts";
pub const SECONDARY_RETRY_INTERVAL: &str = "audit.secondary.retry_interval";
pub const SECONDARY_RECEIVE_TIMEOUT: &str = "audit.secondary.receive_timeout";
pub const MONITOR_INTERVAL: &str = "audit.monitor.interval";
pub const JOB_WORKER_THREADS: &str = "jobs.worker_threads";
pub const JOBS_ENABLED: &str = "jobs.enabled";

/// Events other integrations depend on; never filtered by default.
pub const DEFAULT_DO_NOT_FILTER: [&str; 5] = [
    "CREATED-ENTITLEMENT",
    "DELETED-ENTITLEMENT",
    "CREATED-POOL",
    "DELETED-POOL",
    "CREATED-COMPLIANCE",
];

/// Event filter settings. Validated when the filter is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    pub enabled: bool,
    pub policy: String,
    pub do_not_filter: Vec<String>,
    pub do_filter: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: "DO_FILTER".to_string(),
            do_not_filter: DEFAULT_DO_NOT_FILTER.iter().map(|s| s.to_string()).collect(),
            do_filter: Vec::new(),
        }
    }
}

/// Secondary broker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryConfig {
    pub enabled: bool,
    pub broker_url: String,
    pub exchange: String,
    pub retry_attempts: u32,
    pub retry_interval: Duration,
    pub receive_timeout: Duration,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: "vm://secondary".to_string(),
            exchange: "event".to_string(),
            retry_attempts: 1,
            retry_interval: Duration::from_secs(10),
            receive_timeout: Duration::from_millis(5000),
        }
    }
}

/// Async job dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub worker_threads: usize,
    pub enabled: Vec<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            worker_threads: 10,
            enabled: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConfig {
    /// When false the outbox accepts and drops every event.
    pub enabled: bool,
    pub broker_url: String,
    pub large_message_size: usize,
    /// Registry ids of the listeners to bind at startup.
    pub listeners: Vec<String>,
    pub receiver_poll_interval: Duration,
    pub receiver_retry_interval: Duration,
    pub filter: FilterConfig,
    pub secondary: SecondaryConfig,
    pub monitor_interval: Duration,
    pub jobs: JobConfig,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker_url: "vm://0".to_string(),
            large_message_size: 100 * 1024,
            listeners: vec!["logging".to_string()],
            receiver_poll_interval: Duration::from_millis(100),
            receiver_retry_interval: Duration::from_millis(1000),
            filter: FilterConfig::default(),
            secondary: SecondaryConfig::default(),
            monitor_interval: Duration::from_millis(5000),
            jobs: JobConfig::default(),
        }
    }
}

impl EventConfig {
    /// Load from a flat property map.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let source = Source {
            lookup: |key: &str| props.get(key).cloned(),
        };
        source.load()
    }

    /// Load from environment variables; `audit.broker_url` is read from `AUDIT_BROKER_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let source = Source {
            lookup: |key: &str| std::env::var(env_key(key)).ok(),
        };
        source.load()
    }
}

/// Environment variable name for a property key.
pub fn env_key(key: &str) -> String {
    key.replace('.', "_").to_ascii_uppercase()
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn load(&self) -> Result<EventConfig, ConfigError> {
        let defaults = EventConfig::default();

        Ok(EventConfig {
            enabled: self.boolean(ENABLED, defaults.enabled)?,
            broker_url: self.string(BROKER_URL, defaults.broker_url),
            large_message_size: self.parsed(LARGE_MSG_SIZE, defaults.large_message_size)?,
            listeners: self.list(LISTENERS, defaults.listeners),
            receiver_poll_interval: self
                .millis(RECEIVER_POLL_INTERVAL, defaults.receiver_poll_interval)?,
            receiver_retry_interval: self
                .millis(RECEIVER_RETRY_INTERVAL, defaults.receiver_retry_interval)?,
            filter: FilterConfig {
                enabled: self.boolean(FILTER_ENABLED, defaults.filter.enabled)?,
                policy: self.string(FILTER_POLICY, defaults.filter.policy),
                do_not_filter: self.list(FILTER_DO_NOT_FILTER, defaults.filter.do_not_filter),
                do_filter: self.list(FILTER_DO_FILTER, defaults.filter.do_filter),
            },
            secondary: SecondaryConfig {
                enabled: self.boolean(SECONDARY_ENABLED, defaults.secondary.enabled)?,
                broker_url: self.string(SECONDARY_BROKER_URL, defaults.secondary.broker_url),
                exchange: self.string(SECONDARY_EXCHANGE, defaults.secondary.exchange),
                retry_attempts: self
                    .parsed(SECONDARY_RETRY_ATTEMPTS, defaults.secondary.retry_attempts)?,
                retry_interval: self
                    .seconds(SECONDARY_RETRY_INTERVAL, defaults.secondary.retry_interval)?,
                receive_timeout: self
                    .millis(SECONDARY_RECEIVE_TIMEOUT, defaults.secondary.receive_timeout)?,
            },
            monitor_interval: self.millis(MONITOR_INTERVAL, defaults.monitor_interval)?,
            jobs: JobConfig {
                worker_threads: self.parsed(JOB_WORKER_THREADS, defaults.jobs.worker_threads)?,
                enabled: self.list(JOBS_ENABLED, defaults.jobs.enabled),
            },
        })
    }

    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.raw(key).filter(|v| !v.is_empty()).unwrap_or(default)
    }

    /// Comma separated list; an explicitly empty value means an empty list.
    fn list(&self, key: &str, default: Vec<String>) -> Vec<String> {
        match self.raw(key) {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => default,
        }
    }

    fn boolean(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, &value)),
            },
        }
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| invalid(key, &value)),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map(Duration::from_millis)
                .map_err(|_| invalid(key, &value)),
        }
    }

    fn seconds(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map(Duration::from_secs)
                .map_err(|_| invalid(key, &value)),
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
