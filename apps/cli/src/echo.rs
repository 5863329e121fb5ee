//! In-process echo backend used by `check-config` and `demo`.

use async_trait::async_trait;
use conflux_abstraction::{Backend, BackendError, BackendRequest, BackendResponse};

/// Content size advertised when the configuration sets none.
pub const ECHO_MAX_CONTENT_SIZE: usize = 8192;

/// Answers every request with its last user message, tagged with the backend name.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    id: String,
    fail: bool,
}

impl EchoBackend {
    /// Creates a working echo backend named `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), fail: false }
    }

    /// Makes every request fail with `Unavailable`.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Backend for EchoBackend {
    fn backend_id(&self) -> &str {
        &self.id
    }

    fn max_content_size(&self) -> usize {
        ECHO_MAX_CONTENT_SIZE
    }

    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        if self.fail {
            return Err(BackendError::Unavailable(format!("{} is switched off", self.id)));
        }

        let prompt = request.last_user_content().unwrap_or_default();
        Ok(BackendResponse {
            content: format!("[{}] {}", self.id, prompt),
            model_id: Some(format!("{}-echo", self.id)),
            usage: None,
        })
    }
}
