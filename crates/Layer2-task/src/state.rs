//! Task state machine

use serde::{Deserialize, Serialize};

/// Possible states of a task
///
/// `Ready -> Running -> {Succeeded, Failed, Interrupted}`. No state is
/// revisited and terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Created, `run` not called yet
    Ready,

    /// Work unit invoked, not finalized
    Running,

    /// Resolved with a result
    Succeeded,

    /// Rejected with a failure reason
    Failed,

    /// Stopped by an interruption
    Interrupted,
}

impl TaskState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Interrupted
        )
    }

    /// Check if task is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running)
    }

    /// Check if task has not been started
    pub fn is_ready(&self) -> bool {
        matches!(self, TaskState::Ready)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match self {
            TaskState::Ready => next == TaskState::Running,
            TaskState::Running => next.is_terminal(),
            _ => false,
        }
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Ready => "READY",
            TaskState::Running => "RUNNING",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
            TaskState::Interrupted => "INTERRUPTED",
        }
    }

    /// Get a symbol for the state (for tree output)
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskState::Ready => "◯",
            TaskState::Running => "⟳",
            TaskState::Succeeded => "✓",
            TaskState::Failed => "✗",
            TaskState::Interrupted => "⊘",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
