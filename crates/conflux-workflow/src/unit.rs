//! Unit of work: the smallest schedulable item of a workflow.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::reference;
use crate::store::OutputStore;
use crate::task::{FnTask, Task, TaskContext, TaskInputs, TaskOutputs};
use crate::value::Value;

/// Execution status of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnitStatus {
    /// Not run yet (or reset).
    Pending,
    /// Currently running, including between retries.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Pending => write!(f, "pending"),
            UnitStatus::InProgress => write!(f, "inProgress"),
            UnitStatus::Completed => write!(f, "completed"),
            UnitStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone)]
struct UnitState {
    status: UnitStatus,
    retry_count: u32,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    outputs: Option<TaskOutputs>,
    error: Option<WorkflowError>,
}

impl Default for UnitState {
    fn default() -> Self {
        Self {
            status: UnitStatus::Pending,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            outputs: None,
            error: None,
        }
    }
}

/// Point-in-time view of a unit's execution state.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSnapshot {
    /// Current status.
    pub status: UnitStatus,
    /// Retries performed in the last run.
    pub retry_count: u32,
    /// When the last run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the last run finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Outputs of the last successful run.
    pub outputs: Option<TaskOutputs>,
    /// Error of the last failed run.
    pub error: Option<WorkflowError>,
}

impl UnitSnapshot {
    /// Duration of the last run in milliseconds, once it finished.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// A named task with inputs, retried up to `max_retries` times.
///
/// Shape (name, inputs, body) is fixed at construction; only the execution
/// state changes while a workflow runs.
pub struct UnitOfWork {
    id: Uuid,
    name: String,
    description: String,
    inputs: HashMap<String, Value>,
    body: Arc<dyn Task>,
    max_retries: u32,
    state: Mutex<UnitState>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("max_retries", &self.max_retries)
            .field("status", &self.lock().status)
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    /// Creates a unit running `body`.
    pub fn new(name: impl Into<String>, body: impl Task + 'static) -> Self {
        Self::with_body(name, Arc::new(body))
    }

    /// Creates a unit from a shared task body.
    pub fn with_body(name: impl Into<String>, body: Arc<dyn Task>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            inputs: HashMap::new(),
            body,
            max_retries: 0,
            state: Mutex::new(UnitState::default()),
        }
    }

    /// Creates a unit from an async closure.
    ///
    /// # Example
    /// ```
    /// use conflux_workflow::{UnitOfWork, outputs};
    ///
    /// let unit = UnitOfWork::from_fn("Greet", |inputs, _ctx| async move {
    ///     let name = inputs.require_str("name")?.to_string();
    ///     Ok(outputs([("greeting", format!("hello {name}"))]))
    /// })
    /// .with_input("name", "world");
    /// ```
    pub fn from_fn<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskInputs, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutputs>> + Send + 'static,
    {
        Self::new(name, FnTask::new(func))
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a literal input (strings may contain `{Name.key}` references).
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Adds an input resolved from output `output` of `component`.
    #[must_use]
    pub fn with_reference(mut self, key: impl Into<String>, component: &str, output: &str) -> Self {
        self.inputs.insert(key.into(), Value::String(reference::reference(component, output)));
        self
    }

    /// Sets how many times a failed run is retried.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Unique id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name, also the namespace of its outputs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Unresolved inputs.
    pub fn inputs(&self) -> &HashMap<String, Value> {
        &self.inputs
    }

    /// Retry limit.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Current status.
    pub fn status(&self) -> UnitStatus {
        self.lock().status
    }

    /// Retries performed in the last run.
    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    /// Outputs of the last successful run.
    pub fn outputs(&self) -> Option<TaskOutputs> {
        self.lock().outputs.clone()
    }

    /// Error of the last failed run.
    pub fn error(&self) -> Option<WorkflowError> {
        self.lock().error.clone()
    }

    /// Copies the whole execution state.
    pub fn snapshot(&self) -> UnitSnapshot {
        let state = self.lock();
        UnitSnapshot {
            status: state.status,
            retry_count: state.retry_count,
            started_at: state.started_at,
            completed_at: state.completed_at,
            outputs: state.outputs.clone(),
            error: state.error.clone(),
        }
    }

    /// Reverts to `Pending`, clearing outputs, errors and timings.
    pub fn reset(&self) {
        *self.lock() = UnitState::default();
    }

    fn lock(&self) -> MutexGuard<'_, UnitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, status: UnitStatus, outputs: Option<TaskOutputs>, error: Option<WorkflowError>) {
        let mut state = self.lock();
        state.status = status;
        state.completed_at = Some(Utc::now());
        state.outputs = outputs;
        state.error = error;
    }

    /// Runs the unit: resolves inputs, invokes the body, merges outputs.
    ///
    /// Inputs are re-resolved before every attempt. Outputs are merged into
    /// `store` only if `token` has not been cancelled by then; late outputs
    /// stay on the unit but never reach the store.
    pub(crate) async fn execute(&self, store: &OutputStore, token: &CancellationToken) -> Result<()> {
        {
            let mut state = self.lock();
            *state = UnitState::default();
            state.status = UnitStatus::InProgress;
            state.started_at = Some(Utc::now());
        }

        loop {
            let inputs = TaskInputs::new(
                &self.name,
                self.inputs.iter().map(|(k, v)| (k.clone(), store.resolve(v))).collect(),
            );
            debug!(task = %self.name, inputs = inputs.len(), "Running task");

            let result = self.attempt(inputs, token).await;

            match result {
                Ok(outputs) => {
                    if !store.merge_unless_cancelled(token, &self.name, &outputs) {
                        warn!(task = %self.name, "Task finished after cancellation, outputs not merged");
                    }
                    info!(task = %self.name, outputs = outputs.len(), "Task completed");
                    self.finish(UnitStatus::Completed, Some(outputs), None);
                    return Ok(());
                }
                Err(err) => {
                    let retry = {
                        let mut state = self.lock();
                        let retry = !err.is_cancelled()
                            && !token.is_cancelled()
                            && state.retry_count < self.max_retries;
                        if retry {
                            state.retry_count += 1;
                        }
                        retry.then_some(state.retry_count)
                    };

                    if let Some(attempt) = retry {
                        warn!(task = %self.name, error = %err, retry = attempt, max_retries = self.max_retries, "Task failed, retrying");
                        continue;
                    }

                    if err.is_cancelled() {
                        warn!(task = %self.name, "Task cancelled");
                    } else {
                        error!(task = %self.name, error = %err, "Task failed");
                    }
                    self.finish(UnitStatus::Failed, None, Some(err.clone()));
                    return Err(err);
                }
            }
        }
    }

    /// One invocation of the body, raced against cancellation.
    async fn attempt(&self, inputs: TaskInputs, token: &CancellationToken) -> Result<TaskOutputs> {
        let ctx = TaskContext::new(&self.name, token.clone());
        let body = AssertUnwindSafe(self.body.run(inputs, ctx)).catch_unwind();

        tokio::select! {
            biased;
            () = token.cancelled() => Err(WorkflowError::Cancelled(self.name.clone())),
            result = body => result.unwrap_or_else(|payload| {
                Err(WorkflowError::TaskPanicked { task: self.name.clone(), message: panic_message(payload.as_ref()) })
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::outputs;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_execute_merges_outputs() {
        let store = OutputStore::new();
        let unit = UnitOfWork::from_fn("Task1", |_inputs, _ctx| async { Ok(outputs([("result", "A")])) });

        unit.execute(&store, &CancellationToken::new()).await.unwrap();

        assert_eq!(unit.status(), UnitStatus::Completed);
        assert_eq!(store.get("Task1.result"), Some(Value::from("A")));
        assert!(unit.snapshot().duration_ms().is_some());
    }

    #[tokio::test]
    async fn test_inputs_resolve_against_store() {
        let store = OutputStore::new();
        store.merge("Task1", &outputs([("result", "A")]));
        let unit = UnitOfWork::from_fn("Task2", |inputs, _ctx| async move {
            Ok(outputs([("echo", inputs.get("upstream").cloned().unwrap_or_default())]))
        })
        .with_reference("upstream", "Task1", "result");

        unit.execute(&store, &CancellationToken::new()).await.unwrap();

        assert_eq!(store.get("Task2.echo"), Some(Value::from("A")));
    }

    #[tokio::test]
    async fn test_retry_bound() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let unit = UnitOfWork::from_fn("Flaky", move |_inputs, ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(WorkflowError::execution(ctx.name(), "always fails"))
            }
        })
        .with_max_retries(3);

        let err = unit.execute(&OutputStore::new(), &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, WorkflowError::execution("Flaky", "always fails"));
        assert_eq!(unit.retry_count(), 3);
        assert_eq!(unit.status(), UnitStatus::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let unit = UnitOfWork::from_fn("Eventually", move |_inputs, ctx| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(WorkflowError::execution(ctx.name(), "not yet"));
                }
                Ok(outputs([("done", true)]))
            }
        })
        .with_max_retries(5);

        unit.execute(&OutputStore::new(), &CancellationToken::new()).await.unwrap();

        assert_eq!(unit.retry_count(), 2);
        assert_eq!(unit.status(), UnitStatus::Completed);
        assert!(unit.error().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_body() {
        let token = CancellationToken::new();
        let unit = UnitOfWork::from_fn("Sleeper", |_inputs, _ctx| async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(outputs([("late", true)]))
        })
        .with_max_retries(3);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let store = OutputStore::new();
        let err = unit.execute(&store, &token).await.unwrap_err();

        assert_eq!(err, WorkflowError::Cancelled("Sleeper".to_string()));
        assert_eq!(unit.retry_count(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let unit = UnitOfWork::from_fn("Boom", |_inputs, _ctx| async {
            if true {
                panic!("exploded");
            }
            Ok(TaskOutputs::new())
        });

        let err = unit.execute(&OutputStore::new(), &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, WorkflowError::TaskPanicked { task: "Boom".to_string(), message: "exploded".to_string() });
    }

    #[tokio::test]
    async fn test_reset_returns_to_pending() {
        let unit = UnitOfWork::from_fn("Task", |_inputs, _ctx| async { Ok(outputs([("x", 1)])) });
        unit.execute(&OutputStore::new(), &CancellationToken::new()).await.unwrap();

        unit.reset();

        let snapshot = unit.snapshot();
        assert_eq!(snapshot.status, UnitStatus::Pending);
        assert!(snapshot.outputs.is_none());
        assert!(snapshot.started_at.is_none());
    }
}
