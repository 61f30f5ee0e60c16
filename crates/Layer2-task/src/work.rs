//! Work-unit contract
//!
//! A work unit is what a [`Task`](crate::Task) actually runs: either a plain
//! async function of `(handle, args)` or an object implementing
//! [`WorkProvider`]. Both are normalized into [`WorkUnit`] at construction.

use crate::failure::Failure;
use crate::handle::TaskHandle;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// Bound shared by task arguments, results and interruption results
pub trait Payload: Clone + Debug + Send + Sync + 'static {}

impl<P: Clone + Debug + Send + Sync + 'static> Payload for P {}

// ============================================================================
// Rejection
// ============================================================================

/// Why a work unit (or a canceller) stopped without a result.
///
/// This is the only channel that distinguishes "this is a cancellation" from
/// "this is a failure" across the work-unit, canceller and cascade boundaries.
#[derive(Debug, Clone)]
pub enum Rejection<I> {
    /// The work failed
    Failure(Failure),

    /// The work was interrupted, optionally yielding an interruption result
    Interrupt(Option<I>),
}

impl<I> Rejection<I> {
    /// Interruption carrying `result`
    pub fn interrupted(result: I) -> Self {
        Rejection::Interrupt(Some(result))
    }

    /// Failure from a plain message
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + Debug + Send + Sync + 'static,
    {
        Rejection::Failure(Failure::msg(message))
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Rejection::Interrupt(_))
    }
}

impl<I, E> From<E> for Rejection<I>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Rejection::Failure(Failure::new(error))
    }
}

impl<I> From<Failure> for Rejection<I> {
    fn from(failure: Failure) -> Self {
        Rejection::Failure(failure)
    }
}

/// What a work unit returns.
///
/// `Ok(Some(v))` resolves the task with `v`; `Ok(None)` leaves the task
/// running until the handle finalizes it; `Err` rejects it.
pub type WorkResult<T, I> = Result<Option<T>, Rejection<I>>;

// ============================================================================
// WorkProvider
// ============================================================================

/// Object-style work unit
#[async_trait]
pub trait WorkProvider<A: Payload, T: Payload, I: Payload>: Send + Sync + 'static {
    /// Name used for tasks built from this provider
    fn task_name(&self) -> Option<String> {
        None
    }

    /// Do the work
    async fn task(&self, handle: TaskHandle<A, T, I>, args: A) -> WorkResult<T, I>;
}

// ============================================================================
// WorkUnit
// ============================================================================

/// Boxed work function
pub type WorkFn<A, T, I> =
    Arc<dyn Fn(TaskHandle<A, T, I>, A) -> BoxFuture<'static, WorkResult<T, I>> + Send + Sync>;

/// A work unit, either variant of the contract
pub enum WorkUnit<A: Payload, T: Payload, I: Payload> {
    /// Plain async function, optionally named
    Function {
        name: Option<String>,
        func: WorkFn<A, T, I>,
    },

    /// Object exposing a `task` method and an optional name
    Provider(Arc<dyn WorkProvider<A, T, I>>),
}

impl<A: Payload, T: Payload, I: Payload> WorkUnit<A, T, I> {
    /// Unnamed function work unit
    pub fn function<F, Fut>(func: F) -> Self
    where
        F: Fn(TaskHandle<A, T, I>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<T, I>> + Send + 'static,
    {
        WorkUnit::Function {
            name: None,
            func: boxed(func),
        }
    }

    /// Named function work unit
    pub fn named<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskHandle<A, T, I>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<T, I>> + Send + 'static,
    {
        WorkUnit::Function {
            name: Some(name.into()),
            func: boxed(func),
        }
    }

    /// Object work unit
    pub fn provider<P: WorkProvider<A, T, I>>(provider: P) -> Self {
        WorkUnit::Provider(Arc::new(provider))
    }

    /// The work unit's own name, if it has one
    pub fn name(&self) -> Option<String> {
        match self {
            WorkUnit::Function { name, .. } => name.clone(),
            WorkUnit::Provider(provider) => provider.task_name(),
        }
    }

    /// Start the work. The synchronous part of a function runs right here.
    pub(crate) fn invoke(&self, handle: TaskHandle<A, T, I>, args: A) -> BoxFuture<'static, WorkResult<T, I>> {
        match self {
            WorkUnit::Function { func, .. } => func(handle, args),
            WorkUnit::Provider(provider) => {
                let provider = Arc::clone(provider);
                Box::pin(async move { provider.task(handle, args).await })
            }
        }
    }
}

fn boxed<A, T, I, F, Fut>(func: F) -> WorkFn<A, T, I>
where
    A: Payload,
    T: Payload,
    I: Payload,
    F: Fn(TaskHandle<A, T, I>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkResult<T, I>> + Send + 'static,
{
    Arc::new(
        move |handle: TaskHandle<A, T, I>, args: A| -> BoxFuture<'static, WorkResult<T, I>> {
            Box::pin(func(handle, args))
        },
    )
}

impl<A: Payload, T: Payload, I: Payload> Clone for WorkUnit<A, T, I> {
    fn clone(&self) -> Self {
        match self {
            WorkUnit::Function { name, func } => WorkUnit::Function {
                name: name.clone(),
                func: Arc::clone(func),
            },
            WorkUnit::Provider(provider) => WorkUnit::Provider(Arc::clone(provider)),
        }
    }
}

impl<A: Payload, T: Payload, I: Payload> std::fmt::Debug for WorkUnit<A, T, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkUnit::Function { name, .. } => f.debug_struct("Function").field("name", name).finish(),
            WorkUnit::Provider(provider) => f
                .debug_struct("Provider")
                .field("name", &provider.task_name())
                .finish(),
        }
    }
}
