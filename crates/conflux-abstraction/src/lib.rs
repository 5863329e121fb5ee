//! Backend abstraction layer for Conflux.
//!
//! This module defines the core trait and types shared by every backend
//! adapter: the request a dispatcher sends, the response it gets back, and
//! the errors an adapter may report.

pub mod stream;
pub mod tokens;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use stream::{StreamAccumulator, drive_stream};
pub use tokens::{DEFAULT_CHARS_PER_TOKEN, approximate_tokens};

/// Represents an error reported by a backend adapter.
///
/// These errors are passed through the dispatch layer and the workflow
/// engine unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendError {
    /// The backend could not be reached or is not accepting requests.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with a non-success status.
    #[error("Invalid response (status {status}){}", .message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    InvalidResponse {
        /// Status code (or status-like value) returned by the backend.
        status: u16,
        /// Optional error body returned by the backend.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The backend response could not be decoded.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Credentials required by the backend are missing.
    #[error("Authentication missing for backend '{0}'")]
    AuthenticationMissing(String),

    /// Backend quota exceeded or rate limit hit.
    #[error("Backend '{backend}' quota exceeded{}", .message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    QuotaExceeded {
        /// The backend name.
        backend: String,
        /// Optional error message from the backend.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Other unexpected errors.
    #[error("Backend error: {0}")]
    Other(String),
}

/// Represents a message in a conversation sent to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    pub role: String,
    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message with an arbitrary role.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: content.into() }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// A structured request sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Ordered conversation to send.
    pub messages: Vec<ChatMessage>,

    /// The maximum number of tokens the backend may generate.
    pub max_output_tokens: u32,

    /// Sampling temperature, between 0 and 2.
    pub temperature: f32,

    /// Optional model override understood by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Whether the caller wants incremental text.
    #[serde(default)]
    pub stream: bool,

    /// Backend-specific options, forwarded untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl Default for BackendRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            max_output_tokens: 1024,
            temperature: 0.7,
            model: None,
            stream: false,
            options: None,
        }
    }
}

impl BackendRequest {
    /// Creates a request for the given conversation with default parameters.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, ..Self::default() }
    }

    /// Sets the maximum output size.
    #[must_use]
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the model override.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Marks the request as streaming.
    #[must_use]
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Attaches backend-specific options.
    #[must_use]
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Returns the content of the last user message, if any.
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages.iter().rev().find(|m| m.role == "user").map(|m| m.content.as_str())
    }
}

/// The response returned by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    /// The generated content.
    pub content: String,

    /// Optional: The ID of the model used to generate the response.
    pub model_id: Option<String>,

    /// Optional: Usage statistics for the request.
    pub usage: Option<Usage>,
}

impl BackendResponse {
    /// Creates a response carrying only text.
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), model_id: None, usage: None }
    }
}

/// Usage statistics for a backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// Callback receiving incremental text from a streaming backend.
pub type PartialTextCallback<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// A trait for interacting with interchangeable backend services.
///
/// All backends must be `Send + Sync` to allow concurrent dispatches.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the ID of the backend.
    fn backend_id(&self) -> &str;

    /// Returns the largest content size, in tokens, the backend accepts.
    fn max_content_size(&self) -> usize;

    /// Sends one request and waits for the complete response.
    ///
    /// # Errors
    /// Returns a `BackendError` if the backend fails.
    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError>;

    /// Sends one request, reporting incremental text before resolving with
    /// the aggregated response.
    ///
    /// Backends without native streaming report the whole content once.
    ///
    /// # Errors
    /// Returns a `BackendError` if the backend fails.
    async fn send_streaming(
        &self,
        request: &BackendRequest,
        on_partial: &PartialTextCallback<'_>,
    ) -> Result<BackendResponse, BackendError> {
        let response = self.send(request).await?;
        if !response.content.is_empty() {
            on_partial(&response.content);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedBackend;

    #[async_trait]
    impl Backend for FixedBackend {
        fn backend_id(&self) -> &str {
            "fixed"
        }

        fn max_content_size(&self) -> usize {
            100
        }

        async fn send(&self, _request: &BackendRequest) -> Result<BackendResponse, BackendError> {
            Ok(BackendResponse::text("hello world"))
        }
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::InvalidResponse { status: 503, message: Some("busy".to_string()) };
        assert_eq!(err.to_string(), "Invalid response (status 503): busy");

        let err = BackendError::InvalidResponse { status: 400, message: None };
        assert_eq!(err.to_string(), "Invalid response (status 400)");

        let err = BackendError::QuotaExceeded { backend: "openai".to_string(), message: None };
        assert_eq!(err.to_string(), "Backend 'openai' quota exceeded");
    }

    #[test]
    fn test_request_builders() {
        let request = BackendRequest::new(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("first"),
            ChatMessage::assistant("ok"),
            ChatMessage::user("second"),
        ])
        .with_max_output_tokens(64)
        .with_temperature(0.2)
        .with_model("small")
        .with_streaming(true);

        assert_eq!(request.max_output_tokens, 64);
        assert_eq!(request.model.as_deref(), Some("small"));
        assert!(request.stream);
        assert_eq!(request.last_user_content(), Some("second"));
    }

    #[test]
    fn test_request_serialization_skips_empty_fields() {
        let request = BackendRequest::new(vec![ChatMessage::user("hi")]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("model").is_none());
        assert!(json.get("options").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_default_streaming_reports_whole_content_once() {
        let seen = Mutex::new(Vec::new());
        let callback = |chunk: &str| seen.lock().unwrap().push(chunk.to_string());

        let response = FixedBackend
            .send_streaming(&BackendRequest::new(vec![ChatMessage::user("hi")]), &callback)
            .await
            .unwrap();

        assert_eq!(response.content, "hello world");
        assert_eq!(*seen.lock().unwrap(), vec!["hello world".to_string()]);
    }
}
