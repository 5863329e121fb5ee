//! Workflow orchestrator: the root container and its state machine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::component::Component;
use crate::error::{Result, WorkflowError};
use crate::group::Timing;
use crate::reference;
use crate::report::WorkflowReport;
use crate::store::OutputStore;
use crate::value::Value;

/// Lifecycle state of a workflow.
///
/// Transitions only move forward, except `Stopped`, which can be entered
/// from any state and is terminal.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WorkflowState {
    /// Built but not started (or reset).
    #[default]
    NotStarted,
    /// Running its components.
    InProgress,
    /// Every component completed.
    Completed,
    /// A component failed; carries its error unchanged.
    Failed(WorkflowError),
    /// Stopped by a caller, or abandoned when its `start` future was dropped.
    Stopped,
}

impl WorkflowState {
    /// Returns `true` for `Completed`, `Failed` and `Stopped`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Stopped)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::NotStarted => write!(f, "notStarted"),
            WorkflowState::InProgress => write!(f, "inProgress"),
            WorkflowState::Completed => write!(f, "completed"),
            WorkflowState::Failed(_) => write!(f, "failed"),
            WorkflowState::Stopped => write!(f, "stopped"),
        }
    }
}

/// An ordered list of components sharing one output store.
///
/// Top-level components always run sequentially. A workflow runs once;
/// call [`Workflow::reset`] before running it again.
pub struct Workflow {
    id: Uuid,
    name: String,
    description: String,
    components: Vec<Component>,
    state: Mutex<WorkflowState>,
    store: OutputStore,
    token: Mutex<CancellationToken>,
    timing: Mutex<Timing>,
    running: AtomicBool,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &*self.lock_state())
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}

impl Workflow {
    /// Starts building a workflow named `name`.
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
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

    /// Top-level components, in run order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Current state.
    pub fn state(&self) -> WorkflowState {
        self.lock_state().clone()
    }

    /// Snapshot of every output merged so far, keyed `"<component>.<key>"`.
    pub fn outputs(&self) -> HashMap<String, Value> {
        self.store.snapshot()
    }

    /// Returns one output by its full `"<component>.<key>"` key.
    pub fn output(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    /// Finds a component anywhere in the tree by name.
    pub fn component(&self, name: &str) -> Option<&Component> {
        let mut found = None;
        for top in &self.components {
            top.walk(&mut |component| {
                if found.is_none() && component.name() == name {
                    found = Some(component);
                }
            });
        }
        found
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkflowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_token(&self) -> MutexGuard<'_, CancellationToken> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timing(&self) -> MutexGuard<'_, Timing> {
        self.timing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs every component in order.
    ///
    /// Does nothing unless the workflow is `NotStarted`; a finished,
    /// failed or stopped workflow keeps its state and outputs.
    ///
    /// # Returns
    /// The state after the run (or the unchanged current state).
    pub async fn start(&self) -> WorkflowState {
        let token = {
            let mut state = self.lock_state();
            if *state != WorkflowState::NotStarted {
                debug!(workflow_id = %self.id, state = %state, "Workflow already started, ignoring start");
                return state.clone();
            }
            *state = WorkflowState::InProgress;
            self.running.store(true, Ordering::SeqCst);
            self.lock_token().clone()
        };
        // Clears `running` even if this future is dropped mid-run.
        let guard = RunGuard { workflow: self };

        *self.lock_timing() = Timing { started_at: Some(Utc::now()), completed_at: None };
        info!(workflow_id = %self.id, workflow = %self.name, components = self.components.len(), "Starting workflow");

        let result = self.run_components(&token).await;

        self.lock_timing().completed_at = Some(Utc::now());
        let finished = {
            let mut state = self.lock_state();
            if *state == WorkflowState::Stopped {
                info!(workflow_id = %self.id, "Workflow stopped");
                WorkflowState::Stopped
            } else {
                *state = match result {
                    Ok(()) => {
                        info!(workflow_id = %self.id, outputs = self.store.len(), "Workflow completed");
                        WorkflowState::Completed
                    }
                    Err(err) => {
                        error!(workflow_id = %self.id, error = %err, "Workflow failed");
                        WorkflowState::Failed(err)
                    }
                };
                state.clone()
            }
        };
        drop(guard);
        finished
    }

    async fn run_components(&self, token: &CancellationToken) -> Result<()> {
        for component in &self.components {
            if token.is_cancelled() {
                return Err(WorkflowError::Cancelled(self.name.clone()));
            }
            component.execute(&self.store, token).await?;
        }
        Ok(())
    }

    /// Stops the workflow.
    ///
    /// Sets `Stopped` and cancels running components. Calling it again is
    /// a no-op.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if *state == WorkflowState::Stopped {
            return;
        }
        warn!(workflow_id = %self.id, previous = %state, "Stopping workflow");
        *state = WorkflowState::Stopped;
        self.lock_token().cancel();
    }

    /// Returns the workflow to `NotStarted` so it can run again.
    ///
    /// Every component goes back to pending and the output store is
    /// cleared.
    ///
    /// # Errors
    /// Returns `InvalidState` while a run is still in flight.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.lock_state();
        if self.running.load(Ordering::SeqCst) {
            return Err(WorkflowError::InvalidState(format!(
                "workflow '{}' cannot be reset while running",
                self.name
            )));
        }

        for component in &self.components {
            component.reset();
        }
        self.store.clear();
        *self.lock_token() = CancellationToken::new();
        *self.lock_timing() = Timing::default();
        *state = WorkflowState::NotStarted;
        debug!(workflow_id = %self.id, "Workflow reset");
        Ok(())
    }

    /// Builds the read-only report of the workflow and its components.
    pub fn report(&self) -> WorkflowReport {
        let state = self.state();
        let timing = *self.lock_timing();
        let error = match &state {
            WorkflowState::Failed(err) => Some(err.to_string()),
            _ => None,
        };

        WorkflowReport {
            id: self.id.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            state: state.to_string(),
            error,
            started_at: timing.started_at,
            execution_time_ms: timing.duration_ms(),
            components: self.components.iter().map(Component::report).collect(),
            outputs: self.store.snapshot().into_iter().collect::<BTreeMap<_, _>>(),
        }
    }
}

/// Marks the end of a run.
///
/// A run whose `start` future is dropped before finishing (for example by
/// a caller's timeout) is moved to `Stopped` and its token cancelled.
struct RunGuard<'a> {
    workflow: &'a Workflow,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let workflow = self.workflow;
        let mut state = workflow.lock_state();
        workflow.running.store(false, Ordering::SeqCst);
        if *state != WorkflowState::InProgress {
            return;
        }

        warn!(workflow_id = %workflow.id, "Workflow run abandoned before finishing, marking stopped");
        *state = WorkflowState::Stopped;
        workflow.lock_token().cancel();
        let mut timing = workflow.lock_timing();
        if timing.completed_at.is_none() {
            timing.completed_at = Some(Utc::now());
        }
    }
}

/// Builder for [`Workflow`].
#[derive(Debug)]
pub struct WorkflowBuilder {
    name: String,
    description: String,
    components: Vec<Component>,
}

impl WorkflowBuilder {
    /// Creates a builder with no components.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: String::new(), components: Vec::new() }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a top-level component.
    #[must_use]
    pub fn add(mut self, component: impl Into<Component>) -> Self {
        self.components.push(component.into());
        self
    }

    /// Builds the workflow.
    ///
    /// References to components that do not exist are allowed (they
    /// resolve to null) but logged.
    ///
    /// # Errors
    /// Returns `InvalidName` if a component name is empty or contains
    /// whitespace, braces or a dot, and `DuplicateName` if two components
    /// anywhere in the tree share a name.
    pub fn build(self) -> Result<Workflow> {
        let mut names = HashSet::new();
        let mut invalid = None;
        let mut duplicate = None;
        for top in &self.components {
            top.walk(&mut |component| {
                if !reference::is_addressable(component.name()) && invalid.is_none() {
                    invalid = Some(component.name().to_string());
                }
                if !names.insert(component.name().to_string()) && duplicate.is_none() {
                    duplicate = Some(component.name().to_string());
                }
            });
        }
        if let Some(name) = invalid {
            return Err(WorkflowError::InvalidName(name));
        }
        if let Some(name) = duplicate {
            return Err(WorkflowError::DuplicateName(name));
        }

        for top in &self.components {
            top.walk(&mut |component| {
                let Some(unit) = component.as_unit() else { return };
                for value in unit.inputs().values() {
                    for target in reference::referenced_components(value) {
                        if !names.contains(&target) {
                            warn!(task = %unit.name(), component = %target, "Input references an unknown component");
                        }
                    }
                }
            });
        }

        let workflow = Workflow {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            components: self.components,
            state: Mutex::new(WorkflowState::NotStarted),
            store: OutputStore::new(),
            token: Mutex::new(CancellationToken::new()),
            timing: Mutex::new(Timing::default()),
            running: AtomicBool::new(false),
        };
        debug!(workflow_id = %workflow.id, workflow = %workflow.name, components = names.len(), "Workflow built");
        Ok(workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;
    use crate::task::outputs;
    use crate::unit::{UnitOfWork, UnitStatus};

    fn constant(name: &str, value: &str) -> UnitOfWork {
        let value = value.to_string();
        UnitOfWork::from_fn(name, move |_inputs, _ctx| {
            let value = value.clone();
            async move { Ok(outputs([("result", value)])) }
        })
    }

    #[test]
    fn test_state_display() {
        assert_eq!(WorkflowState::NotStarted.to_string(), "notStarted");
        assert_eq!(WorkflowState::Failed(WorkflowError::Cancelled("x".into())).to_string(), "failed");
        assert!(WorkflowState::Stopped.is_terminal());
        assert!(!WorkflowState::InProgress.is_terminal());
    }

    #[test]
    fn test_build_rejects_duplicate_names() {
        let err = Workflow::builder("wf")
            .add(constant("A", "1"))
            .add(Group::parallel("G").add(constant("A", "2")))
            .build()
            .unwrap_err();

        assert_eq!(err, WorkflowError::DuplicateName("A".to_string()));
    }

    #[test]
    fn test_build_rejects_unaddressable_names() {
        let err = Workflow::builder("wf")
            .add(constant("Task One", "A"))
            .add(constant("Task2", "B").with_reference("u", "Task One", "result"))
            .build()
            .unwrap_err();
        assert_eq!(err, WorkflowError::InvalidName("Task One".to_string()));

        let err = Workflow::builder("wf").add(Group::sequential("Stage.1")).build().unwrap_err();
        assert_eq!(err, WorkflowError::InvalidName("Stage.1".to_string()));
    }

    #[test]
    fn test_build_allows_unknown_references() {
        let workflow = Workflow::builder("wf")
            .add(constant("A", "1").with_reference("x", "Nowhere", "y"))
            .build()
            .unwrap();

        assert_eq!(workflow.state(), WorkflowState::NotStarted);
        assert!(workflow.component("A").is_some());
        assert!(workflow.component("Nowhere").is_none());
    }

    #[tokio::test]
    async fn test_start_runs_once() {
        let workflow = Workflow::builder("wf").add(constant("A", "1")).build().unwrap();

        assert_eq!(workflow.start().await, WorkflowState::Completed);
        assert_eq!(workflow.output("A.result"), Some(Value::from("1")));
        assert_eq!(workflow.start().await, WorkflowState::Completed);
    }

    #[tokio::test]
    async fn test_stop_is_terminal_and_idempotent() {
        let workflow = Workflow::builder("wf").add(constant("A", "1")).build().unwrap();

        workflow.stop();
        workflow.stop();

        assert_eq!(workflow.state(), WorkflowState::Stopped);
        assert_eq!(workflow.start().await, WorkflowState::Stopped);
        assert!(workflow.outputs().is_empty());
    }

    #[tokio::test]
    async fn test_reset_allows_rerun() {
        let workflow = Workflow::builder("wf").add(constant("A", "1")).build().unwrap();
        workflow.start().await;

        workflow.reset().unwrap();

        assert_eq!(workflow.state(), WorkflowState::NotStarted);
        assert!(workflow.outputs().is_empty());
        assert_eq!(workflow.components()[0].status(), UnitStatus::Pending);

        assert_eq!(workflow.start().await, WorkflowState::Completed);
        assert_eq!(workflow.output("A.result"), Some(Value::from("1")));
    }

    #[tokio::test]
    async fn test_reset_after_stop_gets_fresh_token() {
        let workflow = Workflow::builder("wf").add(constant("A", "1")).build().unwrap();
        workflow.stop();

        workflow.reset().unwrap();

        assert_eq!(workflow.start().await, WorkflowState::Completed);
    }
}
