//! Client configuration — TOML host list, pool sizing, and host policy.
//!
//! Durations are integer milliseconds. Keys may be written as tables or as
//! dotted keys, which TOML treats identically:
//!
//! ```toml
//! hosts = "rpc-a:9090,rpc-b:9090"
//! pool.maxActive = 16
//! pool.maxWait = 2000
//!
//! [host]
//! retry = "cooldown"
//! cooldown = 5000
//! weights = { "rpc-a:9090" = 3 }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::host::{HostAddr, HostRegistry, RetryPolicy};

/// Sizing and timing of a [`ConnectionPool`](crate::ConnectionPool).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Idle connections to pre-warm and maintain (default: 0).
    pub min_idle: usize,
    /// Hard cap on checked-out + idle connections (default: 10).
    pub max_active: usize,
    /// Longest an `acquire` blocks before `PoolExhausted` (default: 20s).
    #[serde(with = "millis")]
    pub max_wait: Duration,
    /// Idle time after which eviction probes a connection (default: 300s).
    #[serde(with = "millis")]
    pub max_idle_time: Duration,
    /// Period of the background eviction run; zero disables it (default: 30s).
    #[serde(with = "millis")]
    pub evict_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 0,
            max_active: 10,
            max_wait: Duration::from_secs(20),
            max_idle_time: Duration::from_secs(300),
            evict_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_active == 0 {
            return Err(ConfigError::Invalid("pool.maxActive must be at least 1".to_string()));
        }
        if self.min_idle > self.max_active {
            return Err(ConfigError::Invalid(format!(
                "pool.minIdle ({}) exceeds pool.maxActive ({})",
                self.min_idle, self.max_active
            )));
        }
        Ok(())
    }
}

/// How unhealthy hosts are retried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    #[default]
    Cycle,
    Cooldown,
}

/// Host selection and connect settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct HostConfig {
    pub retry: RetryMode,
    /// Rest period for an unhealthy host under `retry = "cooldown"` (default: 5s).
    #[serde(with = "millis")]
    pub cooldown: Duration,
    /// TCP connect timeout (default: 3s).
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Selection weight per `host:port`; unlisted hosts weigh 1.
    pub weights: HashMap<String, u32>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            retry: RetryMode::Cycle,
            cooldown: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
            weights: HashMap::new(),
        }
    }
}

impl HostConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self.retry {
            RetryMode::Cycle => RetryPolicy::EveryCycle,
            RetryMode::Cooldown => RetryPolicy::Cooldown(self.cooldown),
        }
    }
}

/// Top-level client configuration file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Comma-separated `host:port` endpoints.
    pub hosts: String,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub host: HostConfig,
}

impl ClientConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        let hosts = self.host_list()?;
        if hosts.is_empty() {
            return Err(ConfigError::Invalid("hosts must list at least one host:port".to_string()));
        }
        for (name, weight) in &self.host.weights {
            let addr: HostAddr = name.parse()?;
            if !hosts.contains(&addr) {
                return Err(ConfigError::Invalid(format!(
                    "host.weights names {name}, which is not in hosts"
                )));
            }
            if *weight == 0 {
                return Err(ConfigError::Invalid(format!("host.weights.{name} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn host_list(&self) -> Result<Vec<HostAddr>, ConfigError> {
        HostAddr::parse_list(&self.hosts)
    }

    /// Build the host registry described by `hosts` and `[host]`.
    pub fn build_registry(&self) -> Result<Arc<HostRegistry>, ConfigError> {
        let weights: HashMap<HostAddr, u32> = self
            .host
            .weights
            .iter()
            .map(|(name, weight)| Ok((name.parse::<HostAddr>()?, *weight)))
            .collect::<Result<_, ConfigError>>()?;
        let hosts = self
            .host_list()?
            .into_iter()
            .map(|addr| {
                let weight = weights.get(&addr).copied().unwrap_or(1);
                (addr, weight)
            })
            .collect();
        Ok(Arc::new(
            HostRegistry::weighted(hosts).with_policy(self.host.retry_policy()),
        ))
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Serde adapter: `Duration` as integer milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
