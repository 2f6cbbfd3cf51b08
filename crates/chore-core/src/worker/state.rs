//! Worker loop lifecycle.

use serde::{Deserialize, Serialize};

/// Worker loop state.
///
/// State transitions:
/// - Idle -> Running (`run` called)
/// - Running -> Stopping (token fired, or queue closed and drained)
/// - Stopping -> Stopped (in-flight item finished)
///
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped)
    }

    /// Only an idle loop may be started.
    pub fn can_start(self) -> bool {
        matches!(self, WorkerState::Idle)
    }
}
