use std::env;

use serde::{Deserialize, Serialize};

pub const ENV_CONCURRENCY_LIMIT: &str = "ACTQ_CONCURRENCY_LIMIT";
pub const ENV_PER_KEY_LIMIT: &str = "ACTQ_PER_KEY_LIMIT";
pub const ENV_BOOST_OFFSET: &str = "ACTQ_BOOST_OFFSET";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency_limit must be at least 1")]
    ZeroConcurrency,
    #[error("boost_offset must not be negative (got {0})")]
    NegativeBoostOffset(i64),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Scheduler configuration, typically deserialized from a config file or
/// built from the environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum entries in flight at once. 1 models a single embedded engine
    /// connection; larger values model a bounded remote API.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Maximum entries in flight per key. 0 = unlimited.
    #[serde(default)]
    pub per_key_limit: usize,
    /// Weight subtracted per active boost of a sub-key lane.
    #[serde(default = "default_boost_offset")]
    pub boost_offset: i64,
}

fn default_concurrency_limit() -> usize {
    1
}

fn default_boost_offset() -> i64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            per_key_limit: 0,
            boost_offset: default_boost_offset(),
        }
    }
}

impl SchedulerConfig {
    /// Configuration for a bounded remote resource with `limit` concurrent calls.
    pub fn bounded(limit: usize) -> Self {
        Self {
            concurrency_limit: limit,
            ..Self::default()
        }
    }

    /// Build config from `ACTQ_*` environment variables, falling back to
    /// defaults for unset ones. Call `dotenvy::dotenv()` first to pick up a
    /// `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = env_parse(ENV_CONCURRENCY_LIMIT)? {
            config.concurrency_limit = value;
        }
        if let Some(value) = env_parse(ENV_PER_KEY_LIMIT)? {
            config.per_key_limit = value;
        }
        if let Some(value) = env_parse(ENV_BOOST_OFFSET)? {
            config.boost_offset = value;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.boost_offset < 0 {
            return Err(ConfigError::NegativeBoostOffset(self.boost_offset));
        }
        Ok(())
    }
}

fn env_parse<V: std::str::FromStr>(var: &'static str) -> Result<Option<V>, ConfigError> {
    let Some(raw) = env::var(var).ok().filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { var, value: raw })
}
