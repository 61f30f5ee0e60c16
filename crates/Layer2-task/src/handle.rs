//! Task handle
//!
//! The capability object passed to a running work unit. Everything a work
//! unit may do to its own task goes through here.

use crate::cleanup::{CleanupArgs, CleanupTask};
use crate::event::CustomEvent;
use crate::interrupt::{self, InterruptFlags};
use crate::prepared::PreparedTask;
use crate::progress::{Progress, ProgressInheritance};
use crate::task::Task;
use crate::work::{Payload, Rejection, WorkUnit};
use std::future::Future;
use tasktree_foundation::Result;

/// Handle given to a work unit for the duration of its run
pub struct TaskHandle<A: Payload, T: Payload, I: Payload = ()> {
    task: Task<A, T, I>,
    args: A,
}

impl<A: Payload, T: Payload, I: Payload> TaskHandle<A, T, I> {
    pub(crate) fn new(task: Task<A, T, I>, args: A) -> Self {
        Self { task, args }
    }

    /// The task this handle drives
    pub fn task(&self) -> &Task<A, T, I> {
        &self.task
    }

    /// Arguments the task was run with
    pub fn args(&self) -> &A {
        &self.args
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn progress(&self) -> Progress {
        self.task.progress()
    }

    // ========================================================================
    // Outcome
    // ========================================================================

    /// Succeed with `result`
    pub fn resolve(&self, result: T) -> Result<()> {
        self.task.resolve(result)
    }

    /// Fail, or interrupt when given [`Rejection::Interrupt`]
    pub fn reject(&self, rejection: impl Into<Rejection<I>>) -> Result<()> {
        self.task.reject(rejection.into())
    }

    /// Stop with `result` without calling the canceller
    pub fn interrupt(&self, result: I) -> Result<()> {
        self.task.soft_interrupt(Some(result))
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Register the canceller invoked by [`Task::interrupt`] and by cascades.
    /// Replaces any previous one.
    pub fn set_interrupter<F, Fut>(&self, canceller: F)
    where
        F: Fn(InterruptFlags) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<I, Rejection<I>>> + Send + 'static,
    {
        self.task.set_interrupter(Some(interrupt::interrupter(canceller)));
    }

    pub fn clear_interrupter(&self) {
        self.task.set_interrupter(None);
    }

    // ========================================================================
    // Sub-tasks
    // ========================================================================

    /// Create a child task without starting it
    pub fn add_sub_task<A2, T2, I2>(
        &self,
        work: WorkUnit<A2, T2, I2>,
        rule: impl Into<ProgressInheritance>,
        suffix: Option<&str>,
    ) -> Result<Task<A2, T2, I2>>
    where
        A2: Payload,
        T2: Payload,
        I2: Payload,
    {
        self.task.add_sub_task(work, rule, suffix)
    }

    /// Create a child task and run it with `args`
    pub fn run_sub_task<A2, T2, I2>(
        &self,
        work: WorkUnit<A2, T2, I2>,
        rule: impl Into<ProgressInheritance>,
        suffix: Option<&str>,
        args: A2,
    ) -> Result<Task<A2, T2, I2>>
    where
        A2: Payload,
        T2: Payload,
        I2: Payload,
    {
        let child = self.task.add_sub_task(work, rule, suffix)?;
        child.run(args)?;
        Ok(child)
    }

    /// Adopt a task created elsewhere
    pub fn attach_sub_task<A2, T2, I2>(
        &self,
        child: &Task<A2, T2, I2>,
        rule: impl Into<ProgressInheritance>,
    ) -> Result<()>
    where
        A2: Payload,
        T2: Payload,
        I2: Payload,
    {
        self.task.attach_sub_task(child, rule)
    }

    /// Adopt a prepared task and run it with its bound arguments
    pub fn run_prepared<A2, T2, I2>(
        &self,
        prepared: &PreparedTask<A2, T2, I2>,
        rule: impl Into<ProgressInheritance>,
    ) -> Result<Task<A2, T2, I2>>
    where
        A2: Payload,
        T2: Payload,
        I2: Payload,
    {
        self.task.attach_sub_task(prepared.task(), rule)?;
        prepared.run()?;
        Ok(prepared.task().clone())
    }

    /// Register a cleanup task, run later by the cleanup pipeline
    pub fn add_cleanup_task(
        &self,
        work: WorkUnit<CleanupArgs<T, I>, (), ()>,
        weight: Option<f64>,
        suffix: Option<&str>,
    ) -> Result<CleanupTask<T, I>> {
        self.task.add_cleanup_task(work, weight, suffix)
    }

    // ========================================================================
    // Progress
    // ========================================================================

    pub fn set_progress(&self, current: f64) -> Result<()> {
        self.task.change_progress(Some(current), None, None)
    }

    pub fn set_progress_total(&self, total: f64) -> Result<()> {
        self.task.change_progress(None, Some(total), None)
    }

    pub fn set_progress_message(&self, message: impl Into<String>) -> Result<()> {
        self.task.change_progress(None, None, Some(message.into()))
    }

    /// Change any combination of current, total and message at once
    pub fn change_progress(
        &self,
        current: Option<f64>,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<()> {
        self.task.change_progress(current, total, message)
    }

    pub fn increment_progress(&self, delta: f64) -> Result<()> {
        self.task.increment_progress(delta)
    }

    // ========================================================================
    // Custom events
    // ========================================================================

    /// Emit a caller-defined event on the task
    pub fn emit(&self, name: impl Into<String>, payload: serde_json::Value) {
        self.task.emit_custom(CustomEvent::new(name, payload));
    }
}

impl<A: Payload, T: Payload, I: Payload> Clone for TaskHandle<A, T, I> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            args: self.args.clone(),
        }
    }
}

impl<A: Payload, T: Payload, I: Payload> std::fmt::Debug for TaskHandle<A, T, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task", &self.task)
            .field("args", &self.args)
            .finish()
    }
}
