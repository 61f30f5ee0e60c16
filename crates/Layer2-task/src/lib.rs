//! # tasktree
//!
//! Task lifecycle and work-tree coordination engine.
//! Turns a unit of work into a managed, observable, cancellable node in a
//! tree of work.
//!
//! ## Features
//!
//! - Uniform state machine: `READY -> RUNNING -> {SUCCEEDED, FAILED, INTERRUPTED}`
//! - Progress reporting with parent aggregation (offset, range, explicit rules)
//! - Interruption cascade down the tree, failure cascade up the tree
//! - Cleanup pipeline run once, on demand, after a task finished
//! - Prepared (deferred) tasks and a debug tree view
//!
//! ## Example
//!
//! ```no_run
//! use tasktree::{ProgressInheritance, Task, WorkUnit};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let build: Task<(), u32> = Task::new(WorkUnit::named("build", |handle, _| async move {
//!     handle.set_progress_total(2.0)?;
//!     let step = handle.run_sub_task(
//!         WorkUnit::<(), (), ()>::named("compile", |_, _| async { Ok(Some(())) }),
//!         ProgressInheritance::Range(0.0, 2.0),
//!         None,
//!         (),
//!     )?;
//!     step.wait().await.map_err(|e| e.into_rejection())?;
//!     Ok(Some(42))
//! }));
//!
//! assert_eq!(build.run_and_wait(()).await?, 42);
//! println!("{}", build.debug_tree());
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod event;
pub mod failure;
pub mod handle;
pub mod interrupt;
pub mod prepared;
pub mod progress;
pub mod state;
pub mod task;
pub mod tree;
pub mod work;

// Task system
pub use handle::TaskHandle;
pub use state::TaskState;
pub use task::{Task, TaskId};
pub use work::{Payload, Rejection, WorkFn, WorkProvider, WorkResult, WorkUnit};

// Failures and interruption
pub use failure::Failure;
pub use interrupt::{
    InterruptFlags, InterruptOutcome, Interrupter, InterruptionError, TaskError, TaskOutcome,
};

// Progress
pub use progress::{InheritanceRule, Progress, ProgressInheritance, ProgressLink};

// Events
pub use event::{CustomEvent, TaskEvent, TaskEventKind};

// Cleanup and deferred tasks
pub use cleanup::{CleanupArgs, CleanupTask};
pub use prepared::PreparedTask;

// Tree view
pub use tree::{render_tree, TaskNode, TaskRef, TaskSnapshot};

// Foundation
pub use tasktree_foundation::{init_logging, EngineConfig, Error, ListenerId, Result};
