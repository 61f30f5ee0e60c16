//! Lifecycle integration tests - state machine, events, work-unit variants
//!
//! `cargo test -p tasktree --test lifecycle`

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tasktree::{
    Error, Failure, Rejection, Task, TaskError, TaskEvent, TaskEventKind, TaskHandle, TaskState,
    WorkProvider, WorkResult, WorkUnit,
};
use tasktree_foundation::Event;
use tokio_test::{assert_err, assert_ok};

fn state_changes<A, T, I>(task: &Task<A, T, I>) -> Arc<Mutex<Vec<(TaskState, TaskState)>>>
where
    A: tasktree::Payload,
    T: tasktree::Payload,
    I: tasktree::Payload,
{
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    task.on(TaskEventKind::StateChange, move |event| {
        if let TaskEvent::StateChange { current, previous } = event {
            sink.lock().unwrap().push((*previous, *current));
        }
    });
    changes
}

#[tokio::test]
async fn test_state_path_is_monotonic() {
    let ok: Task<(), ()> = Task::from_fn(|_, _| async { Ok(Some(())) });
    let failing: Task<(), ()> = Task::from_fn(|_, _| async { Err(Rejection::msg("boom")) });
    let stopping: Task<(), (), u8> = Task::from_fn(|_, _| async { Err(Rejection::interrupted(1)) });

    let ok_changes = state_changes(&ok);
    let failing_changes = state_changes(&failing);
    let stopping_changes = state_changes(&stopping);

    assert_ok!(ok.run_and_wait(()).await);
    assert_err!(failing.run_and_wait(()).await);
    assert_err!(stopping.run_and_wait(()).await);

    for (changes, terminal) in [
        (ok_changes, TaskState::Succeeded),
        (failing_changes, TaskState::Failed),
        (stopping_changes, TaskState::Interrupted),
    ] {
        let changes = changes.lock().unwrap().clone();
        assert_eq!(
            changes,
            vec![
                (TaskState::Ready, TaskState::Running),
                (TaskState::Running, terminal),
            ]
        );
    }
}

#[tokio::test]
async fn test_started_precedes_progress_and_finished_follows_terminal() {
    let task: Task<(), u8> = Task::from_fn(|handle, _| async move {
        handle.set_progress(1.0)?;
        Ok(Some(1))
    });
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = kinds.clone();
    task.subscribe(move |event| sink.lock().unwrap().push(event.kind()));

    task.run_and_wait(()).await.expect("task should succeed");

    let kinds = kinds.lock().unwrap().clone();
    let started = kinds.iter().position(|k| *k == TaskEventKind::Started).unwrap();
    let first_progress = kinds
        .iter()
        .position(|k| *k == TaskEventKind::ProgressUpdate)
        .unwrap();
    assert!(started < first_progress);

    let terminal = kinds
        .iter()
        .filter(|k| {
            matches!(
                k,
                TaskEventKind::Succeeded | TaskEventKind::Failed | TaskEventKind::Interrupted
            )
        })
        .count();
    assert_eq!(terminal, 1);
    assert_eq!(kinds.last(), Some(&TaskEventKind::Finished));
    assert_eq!(kinds[kinds.len() - 2], TaskEventKind::Succeeded);
}

#[tokio::test]
async fn test_wait_many_times() {
    let task: Task<(), String> = Task::from_fn(|_, _| async { Ok(Some("done".to_string())) });
    task.run(()).expect("run failed");

    let (a, b) = tokio::join!(task.wait(), task.wait());
    assert_eq!(a.unwrap(), "done");
    assert_eq!(b.unwrap(), "done");
    assert_eq!(task.wait().await.unwrap(), "done");
}

#[tokio::test]
async fn test_deferred_resolution_through_handle() {
    let (tx, rx) = tokio::sync::oneshot::channel::<TaskHandle<(), u32>>();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let task: Task<(), u32> = Task::from_fn(move |handle, _| {
        let tx = tx.clone();
        async move {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(handle);
            }
            Ok(None)
        }
    });

    task.run(()).expect("run failed");
    let handle = rx.await.expect("handle not sent");
    assert_eq!(task.state(), TaskState::Running);

    handle.resolve(11).expect("resolve failed");
    assert_eq!(task.wait().await.unwrap(), 11);
    assert!(matches!(handle.resolve(12), Err(Error::InvalidState { .. })));
    assert!(matches!(handle.reject(Failure::msg("late")), Err(Error::InvalidState { .. })));
    assert!(matches!(handle.interrupt(()), Err(Error::InvalidState { .. })));
}

#[tokio::test]
async fn test_std_error_becomes_failure() {
    let task: Task<(), ()> = Task::from_fn(|_, _| async {
        let parsed: u32 = "not a number".parse()?;
        let _ = parsed;
        Ok(Some(()))
    });

    let err = task.run_and_wait(()).await.unwrap_err();
    let failure = err.failure().expect("expected a failure");
    assert!(failure.downcast_ref::<std::num::ParseIntError>().is_some());
    assert!(task.failure().unwrap().ptr_eq(failure));
}

#[tokio::test]
async fn test_once_listener_fires_once() {
    let task: Task<(), ()> = Task::from_fn(|handle, _| async move {
        handle.set_progress(1.0)?;
        handle.set_progress(2.0)?;
        Ok(Some(()))
    });
    let count = Arc::new(Mutex::new(0));
    let sink = count.clone();
    task.once(TaskEventKind::ProgressUpdate, move |_| *sink.lock().unwrap() += 1);

    task.run_and_wait(()).await.unwrap();
    assert_eq!(*count.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_off_removes_listener() {
    let task: Task<(), ()> = Task::from_fn(|_, _| async { Ok(Some(())) });
    let count = Arc::new(Mutex::new(0));
    let sink = count.clone();
    let id = task.subscribe(move |_| *sink.lock().unwrap() += 1);
    assert!(task.off(id));
    assert!(!task.off(id));

    task.run_and_wait(()).await.unwrap();
    assert_eq!(*count.lock().unwrap(), 0);
}

// ============================================================================
// Provider work units
// ============================================================================

struct Greeter {
    greeting: String,
}

#[async_trait]
impl WorkProvider<String, String, ()> for Greeter {
    fn task_name(&self) -> Option<String> {
        Some("greet".to_string())
    }

    async fn task(&self, handle: TaskHandle<String, String, ()>, name: String) -> WorkResult<String, ()> {
        handle.set_progress_message(format!("greeting {}", name))?;
        Ok(Some(format!("{}, {}!", self.greeting, name)))
    }
}

#[tokio::test]
async fn test_provider_work_unit() {
    let task = Task::with_suffix(
        WorkUnit::provider(Greeter {
            greeting: "Hello".into(),
        }),
        "en",
    );
    assert_eq!(task.name(), "greet (en)");

    let greeting = task.run_and_wait("world".to_string()).await.unwrap();
    assert_eq!(greeting, "Hello, world!");
    assert_eq!(task.progress().message.as_deref(), Some("greeting world"));
    assert_eq!(task.progress().current, 1.0);
}

#[tokio::test]
async fn test_awaiting_interrupted_task_yields_interruption_error() {
    let task: Task<(), (), &'static str> = Task::from_fn(|handle, _| async move {
        handle.interrupt("user quit")?;
        Ok(None)
    });

    match task.run_and_wait(()).await {
        Err(TaskError::Interrupted(interruption)) => {
            assert_eq!(interruption.result, Some("user quit"));
            assert_eq!(interruption.task, "task");
        }
        other => panic!("expected interruption, got {:?}", other),
    }
}

#[tokio::test]
async fn test_panicking_work_unit_fails_the_task() {
    let task: Task<bool, ()> = Task::from_fn(|_, crash| async move {
        if crash {
            panic!("linker crashed");
        }
        Ok(Some(()))
    });

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), task.run_and_wait(true))
        .await
        .expect("task must not hang after a panic");
    let failure = outcome.unwrap_err().failure().expect("panic must fail the task").clone();
    assert_eq!(failure.to_string(), "work unit panicked: linker crashed");
    assert_eq!(task.state(), TaskState::Failed);
}

#[tokio::test]
async fn test_panic_while_invoking_work_unit_fails_the_task() {
    let task: Task<bool, ()> = Task::new(WorkUnit::function(|_, crash: bool| {
        if crash {
            panic!("bad arguments");
        }
        async { Ok(Some(())) }
    }));

    let err = tokio::time::timeout(std::time::Duration::from_secs(5), task.run_and_wait(true))
        .await
        .expect("task must not hang after a panic")
        .unwrap_err();
    assert!(err.failure().unwrap().to_string().contains("bad arguments"));
}

#[tokio::test]
async fn test_panicking_child_fails_the_parent() {
    let root: Task<(), ()> = Task::from_fn(|handle, _| async move {
        handle.run_sub_task(
            WorkUnit::<bool, (), ()>::named("worker", |_, crash| async move {
                if crash {
                    panic!("index out of bounds");
                }
                Ok(Some(()))
            }),
            tasktree::ProgressInheritance::None,
            None,
            true,
        )?;
        Ok(None)
    });

    let err = tokio::time::timeout(std::time::Duration::from_secs(5), root.run_and_wait(()))
        .await
        .expect("parent must not hang")
        .unwrap_err();
    assert!(err.failure().unwrap().to_string().contains("index out of bounds"));
    assert_eq!(root.children()[0].state(), TaskState::Failed);
}
