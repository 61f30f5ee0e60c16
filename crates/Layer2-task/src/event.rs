//! Task events
//!
//! Every task emits a closed set of events through its own listener
//! registry. Emission is synchronous, from within the call that caused it.

use crate::failure::Failure;
use crate::progress::Progress;
use crate::state::TaskState;
use crate::tree::TaskRef;
use serde::{Deserialize, Serialize};
use tasktree_foundation::Event;

/// Event kinds, used to filter subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEventKind {
    Started,
    Succeeded,
    Failed,
    Interrupted,
    Finished,
    StateChange,
    ProgressUpdate,
    SubProgressUpdate,
    Custom,
}

impl TaskEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::Finished => "finished",
            Self::StateChange => "stateChange",
            Self::ProgressUpdate => "progressUpdate",
            Self::SubProgressUpdate => "subProgressUpdate",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller-defined event, emitted through [`TaskHandle::emit`](crate::TaskHandle::emit)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

impl CustomEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Events emitted by a task with result type `T` and interruption result `I`
#[derive(Clone)]
pub enum TaskEvent<T, I> {
    /// The task entered RUNNING and is about to invoke its work unit
    Started,

    /// The task resolved
    Succeeded(T),

    /// The task failed
    Failed(Failure),

    /// The task was interrupted
    Interrupted(Option<I>),

    /// Always follows exactly one of the three terminal events
    Finished,

    /// Emitted for every transition, terminal ones included
    StateChange {
        current: TaskState,
        previous: TaskState,
    },

    /// The task's own progress changed
    ProgressUpdate(Progress),

    /// A child's progress changed; carries the child's raw progress
    SubProgressUpdate { child: TaskRef, progress: Progress },

    /// Caller-defined event
    Custom(CustomEvent),
}

impl<T, I> Event for TaskEvent<T, I> {
    type Kind = TaskEventKind;

    fn kind(&self) -> TaskEventKind {
        match self {
            TaskEvent::Started => TaskEventKind::Started,
            TaskEvent::Succeeded(_) => TaskEventKind::Succeeded,
            TaskEvent::Failed(_) => TaskEventKind::Failed,
            TaskEvent::Interrupted(_) => TaskEventKind::Interrupted,
            TaskEvent::Finished => TaskEventKind::Finished,
            TaskEvent::StateChange { .. } => TaskEventKind::StateChange,
            TaskEvent::ProgressUpdate(_) => TaskEventKind::ProgressUpdate,
            TaskEvent::SubProgressUpdate { .. } => TaskEventKind::SubProgressUpdate,
            TaskEvent::Custom(_) => TaskEventKind::Custom,
        }
    }
}

impl<T: std::fmt::Debug, I: std::fmt::Debug> std::fmt::Debug for TaskEvent<T, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskEvent::Started => f.write_str("Started"),
            TaskEvent::Succeeded(result) => f.debug_tuple("Succeeded").field(result).finish(),
            TaskEvent::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
            TaskEvent::Interrupted(result) => f.debug_tuple("Interrupted").field(result).finish(),
            TaskEvent::Finished => f.write_str("Finished"),
            TaskEvent::StateChange { current, previous } => f
                .debug_struct("StateChange")
                .field("current", current)
                .field("previous", previous)
                .finish(),
            TaskEvent::ProgressUpdate(progress) => {
                f.debug_tuple("ProgressUpdate").field(progress).finish()
            }
            TaskEvent::SubProgressUpdate { child, progress } => f
                .debug_struct("SubProgressUpdate")
                .field("child", &child.name())
                .field("progress", progress)
                .finish(),
            TaskEvent::Custom(event) => f.debug_tuple("Custom").field(event).finish(),
        }
    }
}
