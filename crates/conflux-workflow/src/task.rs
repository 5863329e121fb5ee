//! Task bodies and the values they receive.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WorkflowError};
use crate::value::Value;

/// Outputs produced by a task, keyed without the component namespace.
pub type TaskOutputs = HashMap<String, Value>;

/// Builds task outputs from key/value pairs.
pub fn outputs<I, K, V>(pairs: I) -> TaskOutputs
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Resolved inputs handed to a task body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskInputs {
    task: String,
    values: HashMap<String, Value>,
}

impl TaskInputs {
    /// Wraps resolved input values for `task`.
    pub fn new(task: impl Into<String>, values: HashMap<String, Value>) -> Self {
        Self { task: task.into(), values }
    }

    /// Returns the input under `key`, which may be null.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the input under `key`.
    ///
    /// # Errors
    /// Returns `MissingInput` if the key is absent or null.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.values.get(key).filter(|v| !v.is_null()).ok_or_else(|| WorkflowError::MissingInput {
            task: self.task.clone(),
            key: key.to_string(),
        })
    }

    /// Returns the input under `key` if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Returns the string input under `key`.
    ///
    /// # Errors
    /// Returns `MissingInput` if absent or null, and `Execution` if the value
    /// is not a string.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.require(key)?.as_str().ok_or_else(|| {
            WorkflowError::execution(&self.task, format!("input '{}' must be a string", key))
        })
    }

    /// Iterates over all inputs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if there are no inputs.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Unwraps the input map.
    pub fn into_inner(self) -> HashMap<String, Value> {
        self.values
    }
}

/// Execution context handed to a task body.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task: String,
    token: CancellationToken,
}

impl TaskContext {
    /// Creates a context for `task` observing `token`.
    pub fn new(task: impl Into<String>, token: CancellationToken) -> Self {
        Self { task: task.into(), token }
    }

    /// Name of the running task.
    pub fn name(&self) -> &str {
        &self.task
    }

    /// Returns `true` once the task has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until the task is asked to stop.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Returns the underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// The body of a unit of work.
///
/// Cancellation is cooperative: the engine stops awaiting a body once its
/// token is cancelled, but work a body does between suspension points runs
/// to completion. Long-running bodies can check `ctx.is_cancelled()`.
#[async_trait]
pub trait Task: Send + Sync {
    /// Runs the task with resolved inputs.
    ///
    /// # Errors
    /// Any error is recorded on the unit of work and propagated unchanged.
    async fn run(&self, inputs: TaskInputs, ctx: TaskContext) -> Result<TaskOutputs>;
}

/// Adapts an async closure into a [`Task`].
pub struct FnTask<F> {
    func: F,
}

impl<F, Fut> FnTask<F>
where
    F: Fn(TaskInputs, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutputs>> + Send,
{
    /// Wraps `func`.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn(TaskInputs, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutputs>> + Send,
{
    async fn run(&self, inputs: TaskInputs, ctx: TaskContext) -> Result<TaskOutputs> {
        (self.func)(inputs, ctx).await
    }
}
