//! Bridge configuration
//!
//! Configuration can be built in code, deserialized, or loaded from
//! environment variables on top of the defaults.

use serde::{Deserialize, Serialize};

/// How calls on a freed connection or channel are answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClosedCallPolicy {
    /// Answer with an Error response carrying code `Closed`
    #[default]
    Error,
    /// Produce no response at all
    Silent,
}

impl std::str::FromStr for ClosedCallPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(ClosedCallPolicy::Error),
            "silent" => Ok(ClosedCallPolicy::Silent),
            other => Err(ConfigError::InvalidValue {
                key: "closed_calls",
                value: other.to_string(),
            }),
        }
    }
}

/// Main configuration for a bridge instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Worker threads of the engine runtime
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Answer policy for calls on freed connections and channels
    #[serde(default)]
    pub closed_calls: ClosedCallPolicy,

    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub json_logging: bool,

    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_worker_threads() -> usize {
    num_cpus::get().max(1)
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            closed_calls: ClosedCallPolicy::default(),
            json_logging: false,
            log_filter: default_log_filter(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = BridgeConfig::default();

        if let Ok(threads) = std::env::var("RTC_BRIDGE_WORKER_THREADS") {
            match threads.parse::<usize>() {
                Ok(t) if t > 0 => config.worker_threads = t,
                _ => tracing::warn!(
                    "Ignoring invalid RTC_BRIDGE_WORKER_THREADS value: {}",
                    threads
                ),
            }
        }

        if let Ok(policy) = std::env::var("RTC_BRIDGE_CLOSED_CALLS") {
            match policy.parse() {
                Ok(p) => config.closed_calls = p,
                Err(e) => tracing::warn!("Ignoring RTC_BRIDGE_CLOSED_CALLS: {}", e),
            }
        }

        config.json_logging = env_bool("RTC_BRIDGE_JSON_LOGGING", config.json_logging);

        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.trim().is_empty() {
                config.log_filter = filter;
            }
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "worker_threads",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
