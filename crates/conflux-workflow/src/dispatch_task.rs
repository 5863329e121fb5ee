//! Task body that sends a prompt through a [`DispatchManager`].

use std::sync::Arc;

use async_trait::async_trait;
use conflux_abstraction::{BackendRequest, ChatMessage};
use conflux_dispatch::DispatchManager;
use tracing::debug;

use crate::error::Result;
use crate::task::{Task, TaskContext, TaskInputs, TaskOutputs, outputs};
use crate::value::Value;

/// Dispatches the `prompt` input and outputs the backend's answer.
///
/// Inputs:
/// * `prompt` (required) - user message
/// * `system` - system message placed before the prompt
/// * `model` - model hint passed to the backend
/// * `max_output_tokens` - output size limit
/// * `temperature` - sampling temperature
///
/// Outputs `content` and `model` (null when the backend reports none).
#[derive(Debug, Clone)]
pub struct DispatchTask {
    manager: Arc<DispatchManager>,
}

impl DispatchTask {
    /// Creates a task dispatching through `manager`.
    pub fn new(manager: Arc<DispatchManager>) -> Self {
        Self { manager }
    }

    fn request(inputs: &TaskInputs) -> Result<BackendRequest> {
        let prompt = inputs.require_str("prompt")?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = inputs.get_str("system").filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        let mut request = BackendRequest::new(messages);
        if let Some(model) = inputs.get_str("model") {
            request = request.with_model(model);
        }
        if let Some(max) = inputs.get("max_output_tokens").and_then(Value::as_f64) {
            request = request.with_max_output_tokens(max.max(0.0) as u32);
        }
        if let Some(temperature) = inputs.get("temperature").and_then(Value::as_f64) {
            request = request.with_temperature(temperature as f32);
        }
        Ok(request)
    }
}

#[async_trait]
impl Task for DispatchTask {
    async fn run(&self, inputs: TaskInputs, ctx: TaskContext) -> Result<TaskOutputs> {
        let request = Self::request(&inputs)?;
        debug!(task = %ctx.name(), size = self.manager.measure_request(&request), "Dispatching prompt");

        let response = self.manager.dispatch(&request).await?;

        Ok(outputs([("content", Value::from(response.content)), ("model", Value::from(response.model_id))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use std::collections::HashMap;

    fn inputs(pairs: &[(&str, Value)]) -> TaskInputs {
        let values: HashMap<String, Value> = pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
        TaskInputs::new("Ask", values)
    }

    #[test]
    fn test_request_from_inputs() {
        let request = DispatchTask::request(&inputs(&[
            ("prompt", Value::from("hi")),
            ("system", Value::from("be brief")),
            ("model", Value::from("small")),
            ("max_output_tokens", Value::from(64)),
            ("temperature", Value::from(0.5)),
        ]))
        .unwrap();

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.last_user_content(), Some("hi"));
        assert_eq!(request.model.as_deref(), Some("small"));
        assert_eq!(request.max_output_tokens, 64);
        assert!((request.temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_request_requires_prompt() {
        let err = DispatchTask::request(&inputs(&[("prompt", Value::Null)])).unwrap_err();
        assert_eq!(err, WorkflowError::MissingInput { task: "Ask".to_string(), key: "prompt".to_string() });
    }
}
