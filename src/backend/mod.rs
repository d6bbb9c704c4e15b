pub mod http;
pub mod mock;
pub mod offline;
pub mod orchestrator;
pub mod retry;
pub mod wire;

pub use http::{HttpBackend, HttpBackendConfig};
pub use offline::OfflineResponder;
pub use orchestrator::{BackendOrchestrator, Invocation, ResponseSource};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single backend attempt.
///
/// These never escape the orchestrator; they drive retry and fallback.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend returned HTTP {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Backend not configured")]
    NotConfigured,
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Status(status.as_u16())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Sampling parameters forwarded to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        GenerationParams {
            max_tokens: 512,
            temperature: 0.1,
            top_p: 0.95,
        }
    }
}

/// A single generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl BackendRequest {
    pub fn new(prompt: impl Into<String>, params: &GenerationParams) -> Self {
        BackendRequest {
            prompt: prompt.into(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
        }
    }
}

/// An upstream inference backend.
///
/// Implementations perform exactly one attempt per call; retry, timeout
/// and fallback belong to the orchestrator.
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Name used in logs and reasoning traces.
    fn name(&self) -> &str;

    /// Generate text for the request.
    async fn generate(&self, request: &BackendRequest) -> Result<String, BackendError>;
}
