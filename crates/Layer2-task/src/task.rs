//! Task definition and lifecycle
//!
//! A [`Task`] wraps a [`WorkUnit`] and drives it through
//! `READY -> RUNNING -> {SUCCEEDED, FAILED, INTERRUPTED}`. It owns its
//! children and cleanup tasks, aggregates child progress, and routes
//! interruption and failure between relatives.
//!
//! State transitions are synchronous: the core is updated under the task's
//! lock, the lock is released, and only then are events emitted. Listeners can
//! therefore call back into the task (or its parent) freely.

use crate::cleanup::{CleanupArgs, CleanupPlan, CleanupStep, CleanupTask};
use crate::event::{CustomEvent, TaskEvent, TaskEventKind};
use crate::failure::Failure;
use crate::handle::TaskHandle;
use crate::interrupt::{
    InterruptFlags, InterruptOutcome, Interrupter, InterruptionError, TaskError, TaskOutcome,
};
use crate::progress::{Progress, ProgressInheritance, ProgressLink};
use crate::state::TaskState;
use crate::tree::{self, TaskNode, TaskRef, TaskSnapshot};
use crate::work::{Payload, Rejection, WorkResult, WorkUnit};
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tasktree_foundation::{EngineConfig, Error, Event, EventFilter, ListenerId, ListenerRegistry, Result};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl<T, I> TaskOutcome<T, I> {
    /// Terminal state matching this outcome
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Succeeded(_) => TaskState::Succeeded,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::Interrupted(_) => TaskState::Interrupted,
        }
    }
}

/// Who is finalizing the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    /// A handle call; misuse is an error
    Explicit,
    /// The work unit's return value; dropped once the task is final or a
    /// failure cascade owns the outcome
    Work,
    /// The engine's own cascades; dropped once the task is final
    Cascade,
}

// ============================================================================
// Internal state
// ============================================================================

pub(crate) struct TaskCore<T: Payload, I: Payload> {
    state: TaskState,
    progress: Progress,
    result: Option<T>,
    failure: Option<Failure>,
    interruption_result: Option<I>,
    interrupt_flags: InterruptFlags,
    interrupter: Option<Interrupter<I>>,
    children: Vec<TaskRef>,
    cleanups: Vec<CleanupTask<T, I>>,
    cleaned: bool,
    /// Pipeline currently cleaning this task
    cleaning: Option<Task<(), (), ()>>,
    /// A child failed and the failure cascade is running
    failing: bool,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl<T: Payload, I: Payload> TaskCore<T, I> {
    fn new() -> Self {
        Self {
            state: TaskState::Ready,
            progress: Progress::default(),
            result: None,
            failure: None,
            interruption_result: None,
            interrupt_flags: InterruptFlags::empty(),
            interrupter: None,
            children: Vec::new(),
            cleanups: Vec::new(),
            cleaned: false,
            cleaning: None,
            failing: false,
            started_at: None,
            finished_at: None,
        }
    }
}

pub(crate) struct TaskInner<A: Payload, T: Payload, I: Payload> {
    id: TaskId,
    name: String,
    created_at: DateTime<Utc>,
    config: Arc<EngineConfig>,
    work: WorkUnit<A, T, I>,
    core: Mutex<TaskCore<T, I>>,
    listeners: ListenerRegistry<TaskEvent<T, I>>,
    outcome: watch::Sender<Option<TaskOutcome<T, I>>>,
}

// ============================================================================
// Task
// ============================================================================

/// A node in the work tree.
///
/// `A` is the argument type passed to `run`, `T` the result type and `I` the
/// interruption result type. `Task` is a cheap handle; clones refer to the
/// same node.
pub struct Task<A: Payload, T: Payload, I: Payload = ()> {
    inner: Arc<TaskInner<A, T, I>>,
}

/// Non-owning reference to a task, used by listeners wired between relatives
pub(crate) struct WeakTask<A: Payload, T: Payload, I: Payload>(Weak<TaskInner<A, T, I>>);

impl<A: Payload, T: Payload, I: Payload> WeakTask<A, T, I> {
    pub(crate) fn upgrade(&self) -> Option<Task<A, T, I>> {
        self.0.upgrade().map(|inner| Task { inner })
    }
}

impl<A: Payload, T: Payload, I: Payload> Task<A, T, I> {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create a task with the shared default config
    pub fn new(work: WorkUnit<A, T, I>) -> Self {
        Self::with_config(work, None, EngineConfig::shared_default())
    }

    /// Create a task whose name carries a caller supplied suffix
    pub fn with_suffix(work: WorkUnit<A, T, I>, suffix: &str) -> Self {
        Self::with_config(work, Some(suffix), EngineConfig::shared_default())
    }

    /// Create a task with an explicit config
    pub fn with_config(work: WorkUnit<A, T, I>, suffix: Option<&str>, config: Arc<EngineConfig>) -> Self {
        let base = work
            .name()
            .unwrap_or_else(|| config.default_task_name.clone());
        let name = match suffix {
            Some(suffix) if !suffix.is_empty() => format!("{} ({})", base, suffix),
            _ => base,
        };
        let (outcome, _) = watch::channel(None);

        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                name,
                created_at: Utc::now(),
                config,
                work,
                core: Mutex::new(TaskCore::new()),
                listeners: ListenerRegistry::new(),
                outcome,
            }),
        }
    }

    /// Shorthand for a task around an unnamed async function
    pub fn from_fn<F, Fut>(func: F) -> Self
    where
        F: Fn(TaskHandle<A, T, I>, A) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = WorkResult<T, I>> + Send + 'static,
    {
        Self::new(WorkUnit::function(func))
    }

    pub(crate) fn downgrade(&self) -> WeakTask<A, T, I> {
        WeakTask(Arc::downgrade(&self.inner))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.inner.config
    }

    pub fn state(&self) -> TaskState {
        self.inner.core.lock().state
    }

    pub fn progress(&self) -> Progress {
        self.inner.core.lock().progress.clone()
    }

    /// `current / total`, when the total is known
    pub fn progress_fraction(&self) -> Option<f64> {
        self.inner.core.lock().progress.fraction()
    }

    pub fn result(&self) -> Option<T> {
        self.inner.core.lock().result.clone()
    }

    pub fn failure(&self) -> Option<Failure> {
        self.inner.core.lock().failure.clone()
    }

    pub fn interruption_result(&self) -> Option<I> {
        self.inner.core.lock().interruption_result.clone()
    }

    /// Flags of the interruption that stopped this task (empty otherwise)
    pub fn interrupt_flags(&self) -> InterruptFlags {
        self.inner.core.lock().interrupt_flags
    }

    pub fn children(&self) -> Vec<TaskRef> {
        self.inner.core.lock().children.clone()
    }

    pub fn cleanup_tasks(&self) -> Vec<CleanupTask<T, I>> {
        self.inner.core.lock().cleanups.clone()
    }

    pub fn is_cleaned(&self) -> bool {
        self.inner.core.lock().cleaned
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.core.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.inner.core.lock().finished_at
    }

    /// Run time so far, or total run time once finished
    pub fn duration(&self) -> Option<Duration> {
        let (start, end) = {
            let core = self.inner.core.lock();
            (core.started_at?, core.finished_at)
        };
        let end = end.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }

    /// Terminal outcome, once there is one
    pub fn outcome(&self) -> Option<TaskOutcome<T, I>> {
        self.inner.outcome.borrow().clone()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Listen to every event
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TaskEvent<T, I>) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .subscribe(EventFilter::all(), Arc::new(listener))
    }

    /// Listen to one kind of event
    pub fn on<F>(&self, kind: TaskEventKind, listener: F) -> ListenerId
    where
        F: Fn(&TaskEvent<T, I>) + Send + Sync + 'static,
    {
        self.on_kinds([kind], listener)
    }

    /// Listen to several kinds of event
    pub fn on_kinds<F>(&self, kinds: impl IntoIterator<Item = TaskEventKind>, listener: F) -> ListenerId
    where
        F: Fn(&TaskEvent<T, I>) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .subscribe(EventFilter::kinds(kinds), Arc::new(listener))
    }

    /// Listen to the next event of `kind` only
    pub fn once<F>(&self, kind: TaskEventKind, listener: F) -> ListenerId
    where
        F: Fn(&TaskEvent<T, I>) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .subscribe_once(EventFilter::kinds([kind]), Arc::new(listener))
    }

    /// Remove a listener
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.listener_count()
    }

    pub(crate) fn emit(&self, event: TaskEvent<T, I>) {
        if self.inner.config.trace_events {
            trace!(task = %self.inner.id, name = %self.inner.name, event = %event.kind(), "Task event");
        }
        self.inner.listeners.emit(&event);
    }

    pub(crate) fn emit_custom(&self, event: CustomEvent) {
        self.emit(TaskEvent::Custom(event));
    }

    // ========================================================================
    // Run
    // ========================================================================

    /// Start the task.
    ///
    /// Transitions `READY -> RUNNING`, emits `stateChange`, `started` and the
    /// reset `progressUpdate`, then invokes the work unit and drives it on
    /// the current tokio runtime. Calling `run` twice is an error.
    pub fn run(&self, args: A) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::NoRuntime(format!("cannot run '{}': {}", self.inner.name, e)))?;

        let progress = {
            let mut core = self.inner.core.lock();
            if !core.state.can_transition_to(TaskState::Running) {
                return Err(Error::invalid_state(&self.inner.name, TaskState::Ready, core.state));
            }
            core.state = TaskState::Running;
            core.started_at = Some(Utc::now());
            core.progress = Progress::default();
            core.progress.clone()
        };

        self.emit(TaskEvent::StateChange {
            current: TaskState::Running,
            previous: TaskState::Ready,
        });
        self.emit(TaskEvent::Started);
        self.emit(TaskEvent::ProgressUpdate(progress));
        info!(task = %self.inner.id, name = %self.inner.name, "Task started");

        let handle = TaskHandle::new(self.clone(), args.clone());
        let worker = self.clone();
        let task = self.clone();
        runtime.spawn(async move {
            // invoked lazily so a panic while building the future is caught too
            let work = AssertUnwindSafe(async move { worker.inner.work.invoke(handle, args).await });
            let result = match work.catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let failure = Failure::from_panic(payload);
                    warn!(task = %task.inner.id, name = %task.inner.name, error = %failure, "Work unit panicked");
                    Err(Rejection::Failure(failure))
                }
            };
            task.settle_work(result);
        });

        Ok(())
    }

    /// Run and wait for the outcome
    pub async fn run_and_wait(&self, args: A) -> std::result::Result<T, TaskError<I>> {
        self.run(args)?;
        self.wait().await
    }

    /// Wait for the task to finish.
    ///
    /// Resolves with the result, or rejects with the original failure or an
    /// [`InterruptionError`]. May be awaited any number of times.
    pub async fn wait(&self) -> std::result::Result<T, TaskError<I>> {
        let mut receiver = self.inner.outcome.subscribe();
        match Self::next_outcome(&mut receiver).await? {
            TaskOutcome::Succeeded(result) => Ok(result),
            TaskOutcome::Failed(failure) => Err(TaskError::Failed(failure)),
            TaskOutcome::Interrupted(interruption) => Err(TaskError::Interrupted(interruption)),
        }
    }

    async fn next_outcome(
        receiver: &mut watch::Receiver<Option<TaskOutcome<T, I>>>,
    ) -> Result<TaskOutcome<T, I>> {
        let outcome = receiver
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| Error::Internal("task dropped before finishing".to_string()))?
            .clone();
        outcome.ok_or_else(|| Error::Internal("task finished without an outcome".to_string()))
    }

    fn settle_work(&self, result: WorkResult<T, I>) {
        let outcome = match result {
            Ok(None) => return,
            Ok(Some(value)) => TaskOutcome::Succeeded(value),
            Err(Rejection::Failure(failure)) => TaskOutcome::Failed(failure),
            Err(Rejection::Interrupt(result)) => TaskOutcome::Interrupted(self.interruption(result, InterruptFlags::empty())),
        };
        let state = outcome.state();

        match self.finalize(outcome, Settle::Work) {
            Ok(true) => {}
            Ok(false) => debug!(
                task = %self.inner.id,
                name = %self.inner.name,
                dropped = %state,
                "Work unit settled after the task was finalized"
            ),
            Err(error) => warn!(task = %self.inner.id, error = %error, "Failed to settle work unit"),
        }
    }

    fn interruption(&self, result: Option<I>, flags: InterruptFlags) -> InterruptionError<I> {
        InterruptionError {
            task: self.inner.name.clone(),
            result,
            flags,
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    pub(crate) fn resolve(&self, result: T) -> Result<()> {
        self.finalize(TaskOutcome::Succeeded(result), Settle::Explicit)
            .map(|_| ())
    }

    /// Reject: an interruption rejection becomes an interruption, anything
    /// else a failure
    pub(crate) fn reject(&self, rejection: Rejection<I>) -> Result<()> {
        let outcome = match rejection {
            Rejection::Failure(failure) => TaskOutcome::Failed(failure),
            Rejection::Interrupt(result) => {
                TaskOutcome::Interrupted(self.interruption(result, InterruptFlags::empty()))
            }
        };
        self.finalize(outcome, Settle::Explicit).map(|_| ())
    }

    /// Stop without invoking the canceller
    pub(crate) fn soft_interrupt(&self, result: Option<I>) -> Result<()> {
        let outcome = TaskOutcome::Interrupted(self.interruption(result, InterruptFlags::empty()));
        self.finalize(outcome, Settle::Explicit).map(|_| ())
    }

    /// Move to a terminal state. Returns whether this call finalized the task.
    fn finalize(&self, outcome: TaskOutcome<T, I>, mode: Settle) -> Result<bool> {
        self.finalize_with(outcome, mode, None)
    }

    /// Like [`finalize`](Self::finalize), also recording the canceller result
    /// of a failure cascade. The result is stored only if this call finalizes.
    fn finalize_with(&self, outcome: TaskOutcome<T, I>, mode: Settle, cancelled: Option<I>) -> Result<bool> {
        let (previous, final_progress) = {
            let mut core = self.inner.core.lock();
            if !core.state.can_transition_to(outcome.state()) {
                return match mode {
                    Settle::Explicit => Err(Error::invalid_state(
                        &self.inner.name,
                        TaskState::Running,
                        core.state,
                    )),
                    Settle::Work | Settle::Cascade => Ok(false),
                };
            }
            if mode == Settle::Work && core.failing {
                return Ok(false);
            }

            let previous = core.state;
            core.state = outcome.state();
            core.finished_at = Some(Utc::now());
            core.interrupter = None;

            let mut final_progress = None;
            match &outcome {
                TaskOutcome::Succeeded(result) => {
                    core.result = Some(result.clone());
                    let completed = core.progress.completed();
                    if completed != core.progress {
                        core.progress = completed.clone();
                        final_progress = Some(completed);
                    }
                }
                TaskOutcome::Failed(failure) => {
                    core.failure = Some(failure.clone());
                    core.interruption_result = cancelled;
                }
                TaskOutcome::Interrupted(interruption) => {
                    core.interruption_result = interruption.result.clone();
                    core.interrupt_flags = interruption.flags;
                }
            }
            (previous, final_progress)
        };

        self.emit(TaskEvent::StateChange {
            current: outcome.state(),
            previous,
        });
        if let Some(progress) = final_progress {
            self.emit(TaskEvent::ProgressUpdate(progress));
        }

        match &outcome {
            TaskOutcome::Succeeded(result) => {
                info!(task = %self.inner.id, name = %self.inner.name, "Task succeeded");
                self.emit(TaskEvent::Succeeded(result.clone()));
            }
            TaskOutcome::Failed(failure) => {
                info!(task = %self.inner.id, name = %self.inner.name, error = %failure, "Task failed");
                self.emit(TaskEvent::Failed(failure.clone()));
            }
            TaskOutcome::Interrupted(interruption) => {
                info!(
                    task = %self.inner.id,
                    name = %self.inner.name,
                    flags = %interruption.flags,
                    "Task interrupted"
                );
                self.emit(TaskEvent::Interrupted(interruption.result.clone()));
            }
        }
        self.emit(TaskEvent::Finished);

        self.inner.outcome.send_replace(Some(outcome));
        Ok(true)
    }

    // ========================================================================
    // Progress
    // ========================================================================

    /// Change progress. Missing values keep their current value; an update
    /// that changes nothing emits nothing.
    pub(crate) fn change_progress(
        &self,
        current: Option<f64>,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<()> {
        self.update_progress(|progress| progress.updated(current, total, message))
    }

    pub(crate) fn increment_progress(&self, delta: f64) -> Result<()> {
        self.update_progress(|progress| progress.updated(Some(progress.current + delta), None, None))
    }

    fn update_progress<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&Progress) -> Result<Progress>,
    {
        let progress = {
            let mut core = self.inner.core.lock();
            if core.state != TaskState::Running {
                return Err(Error::invalid_state(&self.inner.name, TaskState::Running, core.state));
            }
            let next = update(&core.progress)?;
            if next == core.progress {
                return Ok(());
            }
            core.progress = next.clone();
            next
        };

        self.emit(TaskEvent::ProgressUpdate(progress));
        Ok(())
    }

    fn inherit_progress(&self, link: &ProgressLink, child: &Progress) {
        let current = link.map_current(child);
        let message = link.map_message(child);

        match self.update_progress(|progress| progress.updated(Some(current), None, message)) {
            Ok(()) => {}
            Err(Error::InvalidState { .. }) => debug!(
                task = %self.inner.id,
                "Ignoring child progress, parent is no longer running"
            ),
            Err(error) => warn!(
                task = %self.inner.id,
                name = %self.inner.name,
                error = %error,
                "Inherited progress rejected"
            ),
        }
    }

    // ========================================================================
    // Sub-tasks
    // ========================================================================

    /// Create a child task and attach it with `rule`.
    ///
    /// The child shares this task's config. Allowed while READY (pre-registration)
    /// or RUNNING.
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
        let child = Task::with_config(work, suffix, Arc::clone(&self.inner.config));
        self.attach_sub_task(&child, rule)?;
        Ok(child)
    }

    /// Attach an existing, unfinished task as a child.
    ///
    /// Wires progress aggregation, `subProgressUpdate`, custom event
    /// forwarding and the failure cascade. The wiring is removed when the
    /// child finishes.
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
        let rule = rule.into();
        let child_state = child.state();
        if child_state.is_terminal() {
            return Err(Error::invalid_state(child.name(), "READY or RUNNING", child_state));
        }

        let child_ref: TaskRef = Arc::new(child.clone());
        let link = {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                return Err(Error::invalid_state(&self.inner.name, "READY or RUNNING", core.state));
            }
            let link = rule.link(core.progress.current)?;
            core.children.push(Arc::clone(&child_ref));
            link
        };
        let weak_child: Weak<dyn TaskNode> = Arc::downgrade(&child_ref);

        let parent = self.downgrade();
        let progress_listener = child.on_kinds(
            [TaskEventKind::ProgressUpdate, TaskEventKind::Custom],
            move |event| {
                let Some(parent) = parent.upgrade() else {
                    return;
                };
                match event {
                    TaskEvent::ProgressUpdate(progress) => {
                        if let Some(link) = &link {
                            parent.inherit_progress(link, progress);
                        }
                        if let Some(child) = weak_child.upgrade() {
                            parent.emit(TaskEvent::SubProgressUpdate {
                                child,
                                progress: progress.clone(),
                            });
                        }
                    }
                    TaskEvent::Custom(custom) => {
                        if link.as_ref().is_some_and(|link| link.forwards(&custom.name)) {
                            parent.emit(TaskEvent::Custom(custom.clone()));
                        }
                    }
                    _ => {}
                }
            },
        );

        let parent = self.downgrade();
        let failure_listener = child.on(TaskEventKind::Failed, move |event| {
            if let (TaskEvent::Failed(failure), Some(parent)) = (event, parent.upgrade()) {
                parent.on_child_failed(failure.clone());
            }
        });

        let weak = child.downgrade();
        child.once(TaskEventKind::Finished, move |_| {
            if let Some(child) = weak.upgrade() {
                child.off(progress_listener);
                child.off(failure_listener);
            }
        });

        debug!(
            parent = %self.inner.id,
            child = %child.id(),
            child_name = %child.name(),
            "Sub-task attached"
        );
        Ok(())
    }

    // ========================================================================
    // Interruption
    // ========================================================================

    pub(crate) fn set_interrupter(&self, interrupter: Option<Interrupter<I>>) {
        self.inner.core.lock().interrupter = interrupter;
    }

    pub fn has_interrupter(&self) -> bool {
        self.inner.core.lock().interrupter.is_some()
    }

    /// Request cancellation.
    ///
    /// Invokes the registered canceller (if any) with `flags`, moves the task
    /// to INTERRUPTED and cascades to every running child with
    /// `flags | FROM_PARENT`. Resolves with the interruption result once the
    /// task has finished; with [`InterruptOutcome::Completed`] if it succeeded
    /// on its own in the meantime; rejects with the failure if it failed.
    pub async fn interrupt(
        &self,
        flags: InterruptFlags,
    ) -> std::result::Result<InterruptOutcome<I>, TaskError<I>> {
        self.expect_running()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::NoRuntime(format!("cannot interrupt '{}': {}", self.inner.name, e)))?;
        info!(task = %self.inner.id, name = %self.inner.name, flags = %flags, "Interrupt requested");

        let mut receiver = self.inner.outcome.subscribe();
        let task = self.clone();
        let mut cascade = runtime.spawn(async move { task.call_interrupter(flags, true).await });

        tokio::select! {
            biased;
            outcome = Self::next_outcome(&mut receiver) => Self::interrupt_outcome(outcome?),
            joined = &mut cascade => {
                let cascade_error = match joined {
                    Ok(Ok(_)) => None,
                    Ok(Err(error)) => Some(error),
                    Err(join_error) => Some(TaskError::Engine(Error::Internal(format!(
                        "interrupt cascade aborted: {}",
                        join_error
                    )))),
                };
                // Once the task is terminal its outcome wins over cascade errors
                if let Some(outcome) = self.outcome() {
                    return Self::interrupt_outcome(outcome);
                }
                match cascade_error {
                    Some(error) => Err(error),
                    None => Self::interrupt_outcome(Self::next_outcome(&mut receiver).await?),
                }
            }
        }
    }

    fn interrupt_outcome(
        outcome: TaskOutcome<T, I>,
    ) -> std::result::Result<InterruptOutcome<I>, TaskError<I>> {
        match outcome {
            TaskOutcome::Succeeded(_) => Ok(InterruptOutcome::Completed),
            TaskOutcome::Failed(failure) => Err(TaskError::Failed(failure)),
            TaskOutcome::Interrupted(interruption) => Ok(InterruptOutcome::Interrupted(interruption.result)),
        }
    }

    fn expect_running(&self) -> Result<()> {
        let state = self.state();
        if state != TaskState::Running {
            return Err(Error::invalid_state(&self.inner.name, TaskState::Running, state));
        }
        Ok(())
    }

    /// Canceller protocol.
    ///
    /// Calls the canceller, optionally finalizes to INTERRUPTED, then
    /// interrupts every running child concurrently and waits for all of them.
    pub(crate) fn call_interrupter(
        &self,
        flags: InterruptFlags,
        set_state: bool,
    ) -> BoxFuture<'static, std::result::Result<Option<I>, TaskError<I>>> {
        Box::pin(self.clone().run_interrupter(flags, set_state))
    }

    async fn run_interrupter(
        self,
        flags: InterruptFlags,
        set_state: bool,
    ) -> std::result::Result<Option<I>, TaskError<I>> {
        let interrupter = {
            let core = self.inner.core.lock();
            if core.state != TaskState::Running {
                return Err(Error::invalid_state(&self.inner.name, TaskState::Running, core.state).into());
            }
            core.interrupter.clone()
        };

        debug!(
            task = %self.inner.id,
            flags = %flags,
            has_interrupter = interrupter.is_some(),
            set_state,
            "Calling interrupter"
        );

        let result = match interrupter {
            Some(cancel) => match cancel(flags).await {
                Ok(result) => Some(result),
                Err(Rejection::Interrupt(result)) => result,
                Err(Rejection::Failure(failure)) => return Err(TaskError::Failed(failure)),
            },
            None => None,
        };

        if set_state {
            let interruption = self.interruption(result.clone(), flags);
            self.finalize(TaskOutcome::Interrupted(interruption), Settle::Cascade)?;
        }

        let running: Vec<TaskRef> = self
            .children()
            .into_iter()
            .filter(|child| child.state().is_running())
            .collect();
        let child_flags = flags | InterruptFlags::FROM_PARENT;
        let results = join_all(running.iter().map(|child| child.interrupt_node(child_flags))).await;

        for (child, outcome) in running.iter().zip(results) {
            if let Err(failure) = outcome {
                debug!(task = %self.inner.id, child = %child.name(), error = %failure, "Child interruption failed");
                return Err(TaskError::Failed(failure));
            }
        }

        Ok(result)
    }

    /// Failure cascade entry point, called from a child's `failed` event
    fn on_child_failed(&self, failure: Failure) {
        {
            let mut core = self.inner.core.lock();
            if core.state != TaskState::Running || core.failing {
                return;
            }
            core.failing = true;
        }
        debug!(task = %self.inner.id, name = %self.inner.name, error = %failure, "Child failed, cascading");

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task = self.clone();
                runtime.spawn(async move { task.fail_from_child(failure).await });
            }
            Err(_) => {
                warn!(task = %self.inner.id, "No runtime for the failure cascade, failing without cancelling");
                let _ = self.finalize(TaskOutcome::Failed(failure), Settle::Cascade);
            }
        }
    }

    async fn fail_from_child(&self, failure: Failure) {
        let cancelled = match self.call_interrupter(InterruptFlags::FAILURE_CASCADE, false).await {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    task = %self.inner.id,
                    name = %self.inner.name,
                    error = %error,
                    "Interrupter failed during failure cascade"
                );
                None
            }
        };
        if let Ok(false) = self.finalize_with(TaskOutcome::Failed(failure), Settle::Cascade, cancelled) {
            debug!(task = %self.inner.id, name = %self.inner.name, "Task already finalized, dropping the cascaded failure");
        }
    }

    // ========================================================================
    // Cleanup bookkeeping
    // ========================================================================

    /// Register a cleanup task. Not started automatically.
    pub fn add_cleanup_task(
        &self,
        work: WorkUnit<CleanupArgs<T, I>, (), ()>,
        weight: Option<f64>,
        suffix: Option<&str>,
    ) -> Result<CleanupTask<T, I>> {
        let weight = weight.unwrap_or(self.inner.config.default_cleanup_weight);
        if !(weight > 0.0) || !weight.is_finite() {
            return Err(Error::InvalidWeight(weight));
        }

        let cleanup = CleanupTask::new(work, suffix, weight, Arc::clone(&self.inner.config));

        let mut core = self.inner.core.lock();
        if core.cleaned {
            return Err(Error::AlreadyCleaned(self.inner.name.clone()));
        }
        core.cleanups.push(cleanup.clone());
        Ok(cleanup)
    }

    /// Claim this task for `pipeline`.
    ///
    /// Yields the work to do, the pipeline already cleaning it, or nothing
    /// once cleaned.
    pub(crate) fn begin_cleanup(&self, pipeline: &Task<(), (), ()>) -> Result<CleanupStep<T, I>> {
        let mut core = self.inner.core.lock();
        if !core.state.is_terminal() {
            return Err(Error::invalid_state(&self.inner.name, "a terminal state", core.state));
        }
        if core.cleaned {
            return Ok(CleanupStep::Done);
        }
        // a finished pipeline may not have released its claim yet
        if let Some(active) = core.cleaning.as_ref().filter(|active| !active.state().is_terminal()) {
            return Ok(CleanupStep::Join(active.clone()));
        }
        core.cleaning = Some(pipeline.clone());

        Ok(CleanupStep::Run(CleanupPlan {
            args: CleanupArgs {
                failure: core.failure.clone(),
                interruption: core.interruption_result.clone(),
                result: core.result.clone(),
            },
            cleanups: core.cleanups.clone(),
            children: core.children.clone(),
        }))
    }

    /// Release the claim `pipeline` took in `begin_cleanup`
    pub(crate) fn finish_cleanup(&self, pipeline: &Task<(), (), ()>, cleaned: bool) {
        let mut core = self.inner.core.lock();
        if core.cleaning.as_ref().is_some_and(|active| active.id() == pipeline.id()) {
            core.cleaning = None;
        }
        core.cleaned |= cleaned;
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Indented multi-line tree of this task and its descendants
    pub fn debug_tree(&self) -> String {
        tree::render_tree(self, self.inner.config.tree_indent)
    }

    /// Serializable view of this task and its descendants
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskNode::snapshot(self)
    }
}

impl<A: Payload, T: Payload, I: Payload> Clone for Task<A, T, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Payload, T: Payload, I: Payload> std::fmt::Debug for Task<A, T, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<A: Payload, T: Payload, I: Payload> TaskNode for Task<A, T, I> {
    fn id(&self) -> TaskId {
        self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn state(&self) -> TaskState {
        Task::state(self)
    }

    fn progress(&self) -> Progress {
        Task::progress(self)
    }

    fn children(&self) -> Vec<TaskRef> {
        Task::children(self)
    }

    fn is_cleaned(&self) -> bool {
        Task::is_cleaned(self)
    }

    fn interrupt_node(&self, flags: InterruptFlags) -> BoxFuture<'static, std::result::Result<(), Failure>> {
        let task = self.clone();
        Box::pin(async move {
            task.interrupt(flags)
                .await
                .map(|_| ())
                .map_err(TaskError::into_failure)
        })
    }

    fn cleanup_pipeline(&self) -> Task<(), (), ()> {
        self.cleanup_task()
    }
}
