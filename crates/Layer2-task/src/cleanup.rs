//! Cleanup tasks and the cleanup pipeline
//!
//! Cleanup actions are registered on a task while it runs and executed at
//! most once, on demand, after it reached a terminal state. The pipeline is an
//! ordinary `Task<(), (), ()>` so callers can observe and cancel it like any
//! other task.

use crate::failure::Failure;
use crate::handle::TaskHandle;
use crate::interrupt::TaskError;
use crate::state::TaskState;
use crate::task::Task;
use crate::tree::TaskRef;
use crate::work::{Payload, Rejection, WorkResult, WorkUnit};
use parking_lot::Mutex;
use std::sync::Arc;
use tasktree_foundation::{EngineConfig, Error};
use tracing::{debug, info};

/// What a cleanup action is run with: the terminal outcome of its task
#[derive(Debug, Clone)]
pub struct CleanupArgs<T, I> {
    pub failure: Option<Failure>,
    pub interruption: Option<I>,
    pub result: Option<T>,
}

impl<T, I> CleanupArgs<T, I> {
    pub fn succeeded(&self) -> bool {
        self.result.is_some()
    }
}

/// A registered cleanup action.
///
/// Clones share the same slot. An attempt that failed or was interrupted is
/// replaced by a fresh task from the same work unit when the pipeline is
/// retried; a successful attempt is never repeated.
pub struct CleanupTask<T: Payload, I: Payload> {
    task: Arc<Mutex<Task<CleanupArgs<T, I>, (), ()>>>,
    work: WorkUnit<CleanupArgs<T, I>, (), ()>,
    suffix: Option<String>,
    weight: f64,
}

impl<T: Payload, I: Payload> CleanupTask<T, I> {
    pub(crate) fn new(
        work: WorkUnit<CleanupArgs<T, I>, (), ()>,
        suffix: Option<&str>,
        weight: f64,
        config: Arc<EngineConfig>,
    ) -> Self {
        let task = Task::with_config(work.clone(), suffix, config);
        Self {
            task: Arc::new(Mutex::new(task)),
            work,
            suffix: suffix.map(str::to_string),
            weight,
        }
    }

    /// The current attempt
    pub fn task(&self) -> Task<CleanupArgs<T, I>, (), ()> {
        self.task.lock().clone()
    }

    /// Share of the pipeline's progress this action accounts for
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn name(&self) -> String {
        self.task.lock().name().to_string()
    }

    pub fn state(&self) -> TaskState {
        self.task().state()
    }

    /// Task to run for this action, `None` once it succeeded
    pub(crate) fn next_attempt(&self) -> Result<Option<Task<CleanupArgs<T, I>, (), ()>>, Error> {
        let mut task = self.task.lock();
        match task.state() {
            TaskState::Succeeded => Ok(None),
            TaskState::Ready => Ok(Some(task.clone())),
            TaskState::Running => Err(Error::invalid_state(task.name(), "READY or finished", TaskState::Running)),
            TaskState::Failed | TaskState::Interrupted => {
                let retry = Task::with_config(self.work.clone(), self.suffix.as_deref(), Arc::clone(task.config()));
                debug!(cleanup = %retry.name(), previous = %task.id(), "Retrying cleanup action");
                *task = retry.clone();
                Ok(Some(retry))
            }
        }
    }
}

impl<T: Payload, I: Payload> Clone for CleanupTask<T, I> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            work: self.work.clone(),
            suffix: self.suffix.clone(),
            weight: self.weight,
        }
    }
}

impl<T: Payload, I: Payload> std::fmt::Debug for CleanupTask<T, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupTask")
            .field("task", &self.task())
            .field("weight", &self.weight)
            .finish()
    }
}

/// Snapshot of what a pipeline run has to do
pub(crate) struct CleanupPlan<T: Payload, I: Payload> {
    pub(crate) args: CleanupArgs<T, I>,
    pub(crate) cleanups: Vec<CleanupTask<T, I>>,
    pub(crate) children: Vec<TaskRef>,
}

/// How a pipeline run proceeds for its task
pub(crate) enum CleanupStep<T: Payload, I: Payload> {
    /// Already cleaned
    Done,
    /// Another pipeline is cleaning the task; wait for it
    Join(Task<(), (), ()>),
    Run(CleanupPlan<T, I>),
}

// ============================================================================
// Pipeline
// ============================================================================

impl<A: Payload, T: Payload, I: Payload> Task<A, T, I> {
    /// Build the cleanup pipeline of this task, READY and not started.
    ///
    /// Running it asserts this task is terminal, runs every cleanup action in
    /// registration order, then the pipelines of all children, and finally
    /// marks this task cleaned. A second successful run is a no-op; a run
    /// that overlaps another one waits for it. After a failed run, a new
    /// pipeline retries the actions that did not succeed.
    pub fn cleanup_task(&self) -> Task<(), (), ()> {
        let target = self.clone();
        let work = WorkUnit::named(
            format!("cleanup {}", self.name()),
            move |handle: TaskHandle<(), (), ()>, _: ()| target.clone().run_cleanup(handle),
        );
        Task::with_config(work, None, Arc::clone(self.config()))
    }

    /// Build, run and await the cleanup pipeline
    pub async fn cleanup(&self) -> Result<(), TaskError<()>> {
        self.cleanup_task().run_and_wait(()).await
    }

    async fn run_cleanup(self, handle: TaskHandle<(), (), ()>) -> WorkResult<(), ()> {
        let plan = match self.begin_cleanup(handle.task())? {
            CleanupStep::Done => {
                debug!(task = %self.id(), name = %self.name(), "Already cleaned, nothing to do");
                return Ok(Some(()));
            }
            CleanupStep::Join(active) => {
                debug!(task = %self.id(), pipeline = %active.id(), "Cleanup in progress, waiting for it");
                active.wait().await.map_err(TaskError::into_rejection)?;
                return Ok(Some(()));
            }
            CleanupStep::Run(plan) => plan,
        };

        let outcome = self.execute_cleanup(&handle, plan).await;
        self.finish_cleanup(handle.task(), outcome.is_ok());
        if outcome.is_ok() {
            debug!(task = %self.id(), name = %self.name(), "Cleaned");
        }
        outcome.map(|()| Some(()))
    }

    async fn execute_cleanup(
        &self,
        handle: &TaskHandle<(), (), ()>,
        plan: CleanupPlan<T, I>,
    ) -> Result<(), Rejection<()>> {
        let weights: f64 = plan.cleanups.iter().map(CleanupTask::weight).sum();
        let total = weights + plan.children.len() as f64;
        if total > 0.0 {
            handle.set_progress_total(total)?;
        }

        info!(
            task = %self.id(),
            name = %self.name(),
            cleanups = plan.cleanups.len(),
            children = plan.children.len(),
            "Cleaning up"
        );

        let mut offset = 0.0;
        for cleanup in &plan.cleanups {
            let end = offset + cleanup.weight();
            match cleanup.next_attempt()? {
                Some(task) => {
                    handle.attach_sub_task(&task, (offset, end))?;
                    task.run(plan.args.clone())?;
                    task.wait().await.map_err(TaskError::into_rejection)?;
                }
                // succeeded on an earlier run
                None => handle.set_progress(end)?,
            }
            offset = end;
        }

        for child in &plan.children {
            match child.state() {
                TaskState::Ready => {
                    debug!(child = %child.name(), "Child never ran, skipping its cleanup");
                }
                TaskState::Running => {
                    return Err(Rejection::Failure(Failure::new(Error::invalid_state(
                        child.name(),
                        "a terminal state",
                        TaskState::Running,
                    ))));
                }
                _ => {
                    let pipeline = child.cleanup_pipeline();
                    handle.attach_sub_task(&pipeline, (offset, offset + 1.0))?;
                    pipeline.run(())?;
                    pipeline.wait().await.map_err(TaskError::into_rejection)?;
                }
            }
            offset += 1.0;
        }
        Ok(())
    }
}
