//! Groups of components, run sequentially or in parallel.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::component::Component;
use crate::error::{Result, WorkflowError};
use crate::store::OutputStore;
use crate::unit::UnitStatus;

/// How a group runs its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// One after another, in declaration order; stops at the first failure.
    Sequential,
    /// All at once; the first failure cancels the rest.
    Parallel,
}

impl fmt::Display for GroupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupMode::Sequential => write!(f, "sequential"),
            GroupMode::Parallel => write!(f, "parallel"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Timing {
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl Timing {
    pub(crate) fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// A named, ordered collection of components.
///
/// A group's status is derived from its children; it merges no outputs of
/// its own.
pub struct Group {
    id: Uuid,
    name: String,
    description: String,
    mode: GroupMode,
    components: Vec<Component>,
    timing: Mutex<Timing>,
    error: Mutex<Option<WorkflowError>>,
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}

impl Group {
    /// Creates an empty group.
    pub fn new(name: impl Into<String>, mode: GroupMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            mode,
            components: Vec::new(),
            timing: Mutex::new(Timing::default()),
            error: Mutex::new(None),
        }
    }

    /// Creates an empty sequential group.
    pub fn sequential(name: impl Into<String>) -> Self {
        Self::new(name, GroupMode::Sequential)
    }

    /// Creates an empty parallel group.
    pub fn parallel(name: impl Into<String>) -> Self {
        Self::new(name, GroupMode::Parallel)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a component.
    #[must_use]
    pub fn add(mut self, component: impl Into<Component>) -> Self {
        self.components.push(component.into());
        self
    }

    /// Unique id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Execution mode.
    pub fn mode(&self) -> GroupMode {
        self.mode
    }

    /// Children, in declaration order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Derived status.
    ///
    /// `Failed` if any child failed, `Completed` once every child completed,
    /// `InProgress` while some child has started, `Pending` otherwise.
    pub fn status(&self) -> UnitStatus {
        if self.components.is_empty() {
            return if self.timing().completed_at.is_some() {
                UnitStatus::Completed
            } else {
                UnitStatus::Pending
            };
        }

        let statuses: Vec<UnitStatus> = self.components.iter().map(Component::status).collect();
        if statuses.contains(&UnitStatus::Failed) {
            UnitStatus::Failed
        } else if statuses.iter().all(|s| *s == UnitStatus::Completed) {
            UnitStatus::Completed
        } else if statuses.iter().any(|s| *s != UnitStatus::Pending) {
            UnitStatus::InProgress
        } else {
            UnitStatus::Pending
        }
    }

    pub(crate) fn timing(&self) -> Timing {
        *self.lock_timing()
    }

    /// Error the last run propagated, if it failed.
    pub fn error(&self) -> Option<WorkflowError> {
        self.lock_error().clone()
    }

    fn lock_timing(&self) -> MutexGuard<'_, Timing> {
        self.timing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_error(&self) -> MutexGuard<'_, Option<WorkflowError>> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reverts every child to `Pending` and clears timings and errors.
    pub fn reset(&self) {
        *self.lock_timing() = Timing::default();
        *self.lock_error() = None;
        for child in &self.components {
            child.reset();
        }
    }

    pub(crate) async fn execute(&self, store: &OutputStore, token: &CancellationToken) -> Result<()> {
        {
            let mut timing = self.lock_timing();
            *timing = Timing { started_at: Some(Utc::now()), completed_at: None };
        }
        *self.lock_error() = None;
        debug!(group = %self.name, mode = %self.mode, children = self.components.len(), "Running group");

        let result = match self.mode {
            GroupMode::Sequential => self.run_sequential(store, token).await,
            GroupMode::Parallel => self.run_parallel(store, token).await,
        };

        self.lock_timing().completed_at = Some(Utc::now());
        match &result {
            Ok(()) => info!(group = %self.name, "Group completed"),
            Err(err) => {
                warn!(group = %self.name, error = %err, "Group failed");
                *self.lock_error() = Some(err.clone());
            }
        }
        result
    }

    async fn run_sequential(&self, store: &OutputStore, token: &CancellationToken) -> Result<()> {
        for child in &self.components {
            if token.is_cancelled() {
                return Err(WorkflowError::Cancelled(self.name.clone()));
            }
            child.execute(store, token).await?;
        }
        Ok(())
    }

    async fn run_parallel(&self, store: &OutputStore, token: &CancellationToken) -> Result<()> {
        let scope = token.child_token();
        let mut tasks = JoinSet::new();

        for child in &self.components {
            let child = child.clone();
            let store = store.clone();
            let scope = scope.clone();
            tasks.spawn(async move {
                let result = child.execute(&store, &scope).await;
                if result.is_err() {
                    // Cancel siblings before this task is even joined.
                    scope.cancel();
                }
                result
            });
        }

        let mut first_error: Option<WorkflowError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|join_err| {
                Err(WorkflowError::TaskPanicked { task: self.name.clone(), message: join_err.to_string() })
            });

            if let Err(err) = result {
                scope.cancel();
                // A sibling's cancellation is a consequence, not the cause.
                let replace = first_error.as_ref().is_none_or(|e| e.is_cancelled() && !err.is_cancelled());
                if replace {
                    first_error = Some(err);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskOutputs, outputs};
    use crate::unit::UnitOfWork;
    use crate::value::Value;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn ok_unit(name: &str, key: &str, value: &str) -> UnitOfWork {
        let pair = (key.to_string(), value.to_string());
        UnitOfWork::from_fn(name, move |_inputs, _ctx| {
            let pair = pair.clone();
            async move { Ok(outputs([pair])) }
        })
    }

    fn failing_unit(name: &str) -> UnitOfWork {
        UnitOfWork::from_fn(name, |_inputs, ctx| async move {
            Err(WorkflowError::execution(ctx.name(), "boom"))
        })
    }

    #[tokio::test]
    async fn test_sequential_passes_outputs_forward() {
        let group = Group::sequential("Pipeline").add(ok_unit("A", "x", "1")).add(
            UnitOfWork::from_fn("B", |inputs, _ctx| async move {
                Ok(outputs([("seen", inputs.get("from_a").cloned().unwrap_or_default())]))
            })
            .with_reference("from_a", "A", "x"),
        );
        let store = OutputStore::new();

        group.execute(&store, &CancellationToken::new()).await.unwrap();

        assert_eq!(store.get("B.seen"), Some(Value::from("1")));
        assert_eq!(group.status(), UnitStatus::Completed);
        assert_eq!(group.error(), None);
        assert!(group.timing().duration_ms().is_some());
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let group = Group::sequential("Pipeline")
            .add(ok_unit("A", "x", "1"))
            .add(failing_unit("B"))
            .add(UnitOfWork::from_fn("C", move |_inputs, _ctx| {
                flag.store(true, Ordering::SeqCst);
                async { Ok(TaskOutputs::new()) }
            }));

        let err = group.execute(&OutputStore::new(), &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, WorkflowError::execution("B", "boom"));
        assert_eq!(group.error(), Some(err));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(group.components()[2].status(), UnitStatus::Pending);
        assert_eq!(group.status(), UnitStatus::Failed);
    }

    #[tokio::test]
    async fn test_parallel_runs_all_children() {
        let group = Group::parallel("Fanout").add(ok_unit("A", "a", "1")).add(ok_unit("B", "b", "2"));
        let store = OutputStore::new();

        group.execute(&store, &CancellationToken::new()).await.unwrap();

        assert_eq!(store.get("A.a"), Some(Value::from("1")));
        assert_eq!(store.get("B.b"), Some(Value::from("2")));
        assert_eq!(group.status(), UnitStatus::Completed);
    }

    #[tokio::test]
    async fn test_parallel_failure_cancels_siblings() {
        let group = Group::parallel("Fanout")
            .add(UnitOfWork::from_fn("Slow", |_inputs, _ctx| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(outputs([("late", true)]))
            }))
            .add(failing_unit("Fast"));
        let store = OutputStore::new();

        let err = group.execute(&store, &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, WorkflowError::execution("Fast", "boom"));
        assert_eq!(group.status(), UnitStatus::Failed);
        assert_eq!(group.components()[0].status(), UnitStatus::Failed);
        assert_eq!(store.get("Slow.late"), None);
    }

    #[tokio::test]
    async fn test_parallel_cancellation_does_not_leak_to_parent() {
        let parent = CancellationToken::new();
        let group = Group::parallel("Fanout").add(failing_unit("Fast"));

        let _ = group.execute(&OutputStore::new(), &parent).await;

        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_group_completes() {
        let group = Group::parallel("Empty");
        assert_eq!(group.status(), UnitStatus::Pending);

        group.execute(&OutputStore::new(), &CancellationToken::new()).await.unwrap();

        assert_eq!(group.status(), UnitStatus::Completed);
    }

    #[tokio::test]
    async fn test_nested_groups() {
        let group = Group::sequential("Outer")
            .add(Group::parallel("Inner").add(ok_unit("A", "a", "1")).add(ok_unit("B", "b", "2")))
            .add(
                UnitOfWork::from_fn("Join", |inputs, _ctx| async move {
                    let joined = format!(
                        "{}{}",
                        inputs.get_str("a").unwrap_or_default(),
                        inputs.get_str("b").unwrap_or_default()
                    );
                    Ok(outputs([("joined", joined)]))
                })
                .with_reference("a", "A", "a")
                .with_reference("b", "B", "b"),
            );
        let store = OutputStore::new();

        group.execute(&store, &CancellationToken::new()).await.unwrap();

        assert_eq!(store.get("Join.joined"), Some(Value::from("12")));
        assert!(store.get("Inner.a").is_none());
    }
}
