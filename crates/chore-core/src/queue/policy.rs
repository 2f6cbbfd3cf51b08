//! Full-queue policy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What `enqueue` does when the queue is at capacity.
///
/// `Block` is the default: producers feel the load instead of the queue
/// growing without limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullPolicy {
    /// Suspend the producer until space frees, the queue closes, or the
    /// token fires.
    #[default]
    Block,

    /// Fail immediately with `QueueFull`.
    Reject,

    /// Ignore capacity entirely.
    Unbounded,
}

impl FullPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FullPolicy::Block => "block",
            FullPolicy::Reject => "reject",
            FullPolicy::Unbounded => "unbounded",
        }
    }
}

impl fmt::Display for FullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FullPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(FullPolicy::Block),
            "reject" => Ok(FullPolicy::Reject),
            "unbounded" => Ok(FullPolicy::Unbounded),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}
