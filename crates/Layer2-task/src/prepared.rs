//! Prepared tasks: a task bound to its arguments, runnable later

use crate::interrupt::TaskError;
use crate::task::Task;
use crate::work::Payload;
use futures::future::BoxFuture;
use std::future::IntoFuture;
use tasktree_foundation::Result;

/// A task together with the arguments it will be run with.
///
/// Awaiting a `PreparedTask` runs it and waits for the outcome.
pub struct PreparedTask<A: Payload, T: Payload, I: Payload = ()> {
    task: Task<A, T, I>,
    args: A,
}

impl<A: Payload, T: Payload, I: Payload> PreparedTask<A, T, I> {
    pub fn new(task: Task<A, T, I>, args: A) -> Self {
        Self { task, args }
    }

    pub fn task(&self) -> &Task<A, T, I> {
        &self.task
    }

    pub fn args(&self) -> &A {
        &self.args
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Start the task with the bound arguments
    pub fn run(&self) -> Result<()> {
        self.task.run(self.args.clone())
    }

    pub async fn wait(&self) -> std::result::Result<T, TaskError<I>> {
        self.task.wait().await
    }

    pub fn into_task(self) -> Task<A, T, I> {
        self.task
    }
}

impl<A: Payload, T: Payload, I: Payload> Task<A, T, I> {
    /// Bind `args` without running
    pub fn prepare(&self, args: A) -> PreparedTask<A, T, I> {
        PreparedTask::new(self.clone(), args)
    }
}

impl<A: Payload, T: Payload, I: Payload> IntoFuture for PreparedTask<A, T, I> {
    type Output = std::result::Result<T, TaskError<I>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        let PreparedTask { task, args } = self;
        Box::pin(async move { task.run_and_wait(args).await })
    }
}

impl<A: Payload, T: Payload, I: Payload> Clone for PreparedTask<A, T, I> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            args: self.args.clone(),
        }
    }
}

impl<A: Payload, T: Payload, I: Payload> std::fmt::Debug for PreparedTask<A, T, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedTask")
            .field("task", &self.task)
            .field("args", &self.args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskState;
    use crate::work::WorkUnit;

    fn doubler() -> Task<u32, u32> {
        Task::new(WorkUnit::named("double", |_, n: u32| async move { Ok(Some(n * 2)) }))
    }

    #[tokio::test]
    async fn test_await_runs_with_bound_args() {
        let prepared = doubler().prepare(5);
        assert_eq!(prepared.name(), "double");
        assert_eq!(*prepared.args(), 5);
        assert_eq!(prepared.task().state(), TaskState::Ready);

        let task = prepared.task().clone();
        assert_eq!(prepared.await.unwrap(), 10);
        assert_eq!(task.state(), TaskState::Succeeded);
    }

    #[tokio::test]
    async fn test_run_then_wait() {
        let prepared = doubler().prepare(4);
        prepared.run().unwrap();
        assert!(prepared.run().is_err());
        assert_eq!(prepared.wait().await.unwrap(), 8);
    }
}
