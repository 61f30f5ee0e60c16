//! Interruption flags, cancellers and the errors seen by awaiters

use crate::failure::Failure;
use crate::work::Rejection;
use bitflags::bitflags;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tasktree_foundation::Error;

bitflags! {
    /// Origin and provenance of an interruption request.
    ///
    /// Origin bits (`USER`, `EXIT`, `TEST`) are set by whoever asks for the
    /// interruption; provenance bits are added by the cascade. `FORCE` is
    /// advisory and only passed through.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InterruptFlags: u32 {
        const USER = 1;
        const EXIT = 1 << 1;
        const TEST = 1 << 2;
        const FROM_PARENT = 1 << 3;
        const FROM_CHILD = 1 << 4;
        const FROM_FAILURE = 1 << 5;
        const FORCE = 1 << 6;
    }
}

impl InterruptFlags {
    /// Flags used when a failing child cancels its parent
    pub const FAILURE_CASCADE: InterruptFlags =
        InterruptFlags::FROM_FAILURE.union(InterruptFlags::FROM_CHILD);

    pub fn is_forced(&self) -> bool {
        self.contains(InterruptFlags::FORCE)
    }

    pub fn is_cascade(&self) -> bool {
        self.intersects(
            InterruptFlags::FROM_PARENT | InterruptFlags::FROM_CHILD | InterruptFlags::FROM_FAILURE,
        )
    }
}

impl fmt::Display for InterruptFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        f.write_str(&names.join("|"))
    }
}

// ============================================================================
// Interrupter
// ============================================================================

/// A registered canceller: given the request flags, stop the work and yield
/// an interruption result (or reject with [`Rejection::Interrupt`] carrying
/// one). A [`Rejection::Failure`] propagates to whoever asked.
pub type Interrupter<I> = Arc<dyn Fn(InterruptFlags) -> BoxFuture<'static, Result<I, Rejection<I>>> + Send + Sync>;

pub(crate) fn interrupter<I, F, Fut>(func: F) -> Interrupter<I>
where
    I: Send + 'static,
    F: Fn(InterruptFlags) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<I, Rejection<I>>> + Send + 'static,
{
    Arc::new(
        move |flags: InterruptFlags| -> BoxFuture<'static, Result<I, Rejection<I>>> {
            Box::pin(func(flags))
        },
    )
}

// ============================================================================
// Outcomes
// ============================================================================

/// Terminal outcome of a task run
#[derive(Debug, Clone)]
pub enum TaskOutcome<T, I> {
    Succeeded(T),
    Failed(Failure),
    Interrupted(InterruptionError<I>),
}

/// What a call to [`Task::interrupt`](crate::Task::interrupt) produced
#[derive(Debug, Clone, PartialEq)]
pub enum InterruptOutcome<I> {
    /// The task stopped as requested, yielding its interruption result
    Interrupted(Option<I>),

    /// The task succeeded on its own before the interruption took effect
    Completed,
}

impl<I> InterruptOutcome<I> {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, InterruptOutcome::Interrupted(_))
    }

    /// The interruption result, if the task was interrupted with one
    pub fn into_result(self) -> Option<I> {
        match self {
            InterruptOutcome::Interrupted(result) => result,
            InterruptOutcome::Completed => None,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Rejection reason of an interrupted task's completion future
#[derive(Debug, Clone)]
pub struct InterruptionError<I> {
    /// Name of the interrupted task
    pub task: String,

    /// What the canceller (or the work unit) yielded
    pub result: Option<I>,

    /// Flags of the request; empty when the work unit stopped itself
    pub flags: InterruptFlags,
}

impl<I> fmt::Display for InterruptionError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flags.is_empty() {
            write!(f, "Task '{}' was interrupted", self.task)
        } else {
            write!(f, "Task '{}' was interrupted ({})", self.task, self.flags)
        }
    }
}

impl<I: fmt::Debug> std::error::Error for InterruptionError<I> {}

/// Error produced when awaiting a task
#[derive(Debug)]
pub enum TaskError<I> {
    /// The task failed; the reason is the original failure, unwrapped
    Failed(Failure),

    /// The task was interrupted
    Interrupted(InterruptionError<I>),

    /// The engine refused the operation (misuse, missing runtime)
    Engine(Error),
}

impl<I> TaskError<I> {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TaskError::Interrupted(_))
    }

    /// The failure, if the task failed
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            TaskError::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Turn into a rejection for the awaiting work unit, keeping failures
    /// and interruptions apart
    pub fn into_rejection(self) -> Rejection<I>
    where
        I: fmt::Debug + Send + Sync + 'static,
    {
        match self {
            TaskError::Failed(failure) => Rejection::Failure(failure),
            TaskError::Interrupted(interruption) => Rejection::Interrupt(interruption.result),
            TaskError::Engine(error) => Rejection::Failure(Failure::new(error)),
        }
    }

    /// Collapse into a failure, keeping an existing failure's identity
    pub fn into_failure(self) -> Failure
    where
        I: fmt::Debug + Send + Sync + 'static,
    {
        match self {
            TaskError::Failed(failure) => failure,
            other => Failure::new(other),
        }
    }
}

impl<I> From<Error> for TaskError<I> {
    fn from(error: Error) -> Self {
        TaskError::Engine(error)
    }
}

impl<I> fmt::Display for TaskError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Failed(failure) => write!(f, "{}", failure),
            TaskError::Interrupted(interruption) => write!(f, "{}", interruption),
            TaskError::Engine(error) => write!(f, "{}", error),
        }
    }
}

impl<I: fmt::Debug> std::error::Error for TaskError<I> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskError::Engine(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let flags = InterruptFlags::USER | InterruptFlags::FROM_PARENT;
        assert!(flags.contains(InterruptFlags::USER));
        assert!(flags.is_cascade());
        assert!(!flags.is_forced());
        assert_eq!(flags.to_string(), "USER|FROM_PARENT");
        assert_eq!(InterruptFlags::empty().to_string(), "NONE");
    }

    #[test]
    fn test_failure_cascade_flags() {
        let flags = InterruptFlags::FAILURE_CASCADE;
        assert!(flags.contains(InterruptFlags::FROM_FAILURE | InterruptFlags::FROM_CHILD));
        assert!(!flags.contains(InterruptFlags::FROM_PARENT));
    }

    #[test]
    fn test_into_rejection_keeps_failure_identity() {
        let failure = Failure::msg("broken");
        let error: TaskError<()> = TaskError::Failed(failure.clone());
        match error.into_rejection() {
            Rejection::Failure(inner) => assert!(inner.ptr_eq(&failure)),
            Rejection::Interrupt(_) => panic!("expected failure"),
        }

        let interrupted: TaskError<u8> = TaskError::Interrupted(InterruptionError {
            task: "fetch".into(),
            result: Some(7),
            flags: InterruptFlags::USER,
        });
        assert!(matches!(interrupted.into_rejection(), Rejection::Interrupt(Some(7))));
    }

    #[test]
    fn test_interruption_error_display() {
        let err: InterruptionError<()> = InterruptionError {
            task: "build".into(),
            result: None,
            flags: InterruptFlags::USER | InterruptFlags::FORCE,
        };
        assert_eq!(err.to_string(), "Task 'build' was interrupted (USER|FORCE)");
    }
}
