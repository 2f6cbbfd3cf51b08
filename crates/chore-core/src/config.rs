//! Typed configuration for the queue and its workers.
//!
//! Values come from serde (any format the host prefers) or from `CHORE_*`
//! environment variables. Missing values fall back to defaults.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::queue::FullPolicy;

pub const ENV_CAPACITY: &str = "CHORE_CAPACITY";
pub const ENV_POLICY: &str = "CHORE_POLICY";
pub const ENV_WORKERS: &str = "CHORE_WORKERS";

const DEFAULT_CAPACITY: usize = 64;
const DEFAULT_WORKERS: usize = 1;

/// Queue sizing and backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Items buffered before the policy applies. 0 means unbounded.
    pub capacity: usize,
    pub policy: FullPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: FullPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChoreConfig {
    pub queue: QueueConfig,
    /// Number of worker loops sharing the queue.
    pub workers: usize,
}

impl Default for ChoreConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            workers: DEFAULT_WORKERS,
        }
    }
}

impl ChoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_CAPACITY) {
            config.queue.capacity = parse_count(ENV_CAPACITY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_POLICY) {
            config.queue.policy = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            config.workers = parse_count(ENV_WORKERS, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_WORKERS,
                value: self.workers.to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_count(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
