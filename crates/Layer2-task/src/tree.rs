//! Type-erased view of the work tree
//!
//! Children of a task may have any argument, result and interruption types.
//! The parent only needs to see them through [`TaskNode`].

use crate::failure::Failure;
use crate::interrupt::InterruptFlags;
use crate::progress::Progress;
use crate::state::TaskState;
use crate::task::{Task, TaskId};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;

/// What a parent can do with a child of unknown type
pub trait TaskNode: Send + Sync {
    fn id(&self) -> TaskId;

    fn name(&self) -> &str;

    fn state(&self) -> TaskState;

    fn progress(&self) -> Progress;

    fn children(&self) -> Vec<TaskRef>;

    fn is_cleaned(&self) -> bool;

    /// Interrupt as part of a cascade. Resolves once the node is terminal;
    /// an error is the node's own failure.
    fn interrupt_node(&self, flags: InterruptFlags) -> BoxFuture<'static, Result<(), Failure>>;

    /// Fresh cleanup pipeline for this node
    fn cleanup_pipeline(&self) -> Task<(), (), ()>;

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id(),
            name: self.name().to_string(),
            state: self.state(),
            progress: self.progress(),
            cleaned: self.is_cleaned(),
            children: self.children().iter().map(|child| child.snapshot()).collect(),
        }
    }
}

/// Shared, type-erased reference to a task
pub type TaskRef = Arc<dyn TaskNode>;

/// Serializable view of a task subtree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub progress: Progress,
    pub cleaned: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskSnapshot>,
}

impl TaskSnapshot {
    /// Number of tasks in this subtree, root included
    pub fn task_count(&self) -> usize {
        1 + self.children.iter().map(TaskSnapshot::task_count).sum::<usize>()
    }
}

/// Render `root` and its descendants, one line per task
pub fn render_tree(root: &dyn TaskNode, indent: usize) -> String {
    let mut out = String::new();
    render_node(root, 0, indent, &mut out);
    out
}

fn render_node(node: &dyn TaskNode, depth: usize, indent: usize, out: &mut String) {
    let state = node.state();
    let _ = writeln!(
        out,
        "{:pad$}{} {} [{}] {}",
        "",
        state.symbol(),
        node.name(),
        state,
        node.progress(),
        pad = depth * indent
    );
    for child in node.children() {
        render_node(child.as_ref(), depth + 1, indent, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::WorkUnit;
    use crate::ProgressInheritance;

    #[tokio::test]
    async fn test_render_tree() {
        let root: Task<(), ()> = Task::new(WorkUnit::named("root", |_, _| async { Ok(None) }));
        let child = root
            .add_sub_task(
                WorkUnit::<(), (), ()>::named("child", |_, _| async { Ok(None) }),
                ProgressInheritance::None,
                None,
            )
            .unwrap();
        root.run(()).unwrap();
        child.run(()).unwrap();

        let tree = root.debug_tree();
        let lines: Vec<&str> = tree.lines().collect();
        assert_eq!(lines, vec!["⟳ root [RUNNING] 0/?", "  ⟳ child [RUNNING] 0/?"]);
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let root: Task<(), ()> = Task::new(WorkUnit::named("root", |_, _| async { Ok(Some(())) }));
        root.run_and_wait(()).await.unwrap();

        let snapshot = root.snapshot();
        assert_eq!(snapshot.task_count(), 1);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["name"], "root");
        assert_eq!(json["state"], "SUCCEEDED");
        assert!(json.get("children").is_none());
    }
}
