use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use super::wire::{extract_text, StreamAccumulator, WireRequest};
use super::{Backend, BackendError, BackendRequest};

/// Connection settings for an HTTP inference endpoint.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub name: String,
    pub url: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Ask the endpoint to stream, and accumulate the chunks
    pub stream: bool,
}

/// JSON-over-HTTP inference backend.
///
/// Performs one POST per call. Timeouts are applied by the orchestrator.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("promptgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(HttpBackend { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn read_streamed(&self, response: reqwest::Response) -> Result<String, BackendError> {
        let mut body = response.bytes_stream();
        let mut acc = StreamAccumulator::new();

        while let Some(chunk) = body.next().await {
            let bytes = chunk.map_err(|e| BackendError::StreamInterrupted(e.to_string()))?;
            acc.push(&bytes)?;
        }

        debug!(backend = %self.config.name, chunks = acc.chunks(), "Stream complete");
        acc.finish()
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn generate(&self, request: &BackendRequest) -> Result<String, BackendError> {
        let body = WireRequest {
            request,
            model: self.config.model.as_deref(),
            stream: self.config.stream,
        };

        let mut builder = self.client.post(&self.config.url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        if self.config.stream {
            return self.read_streamed(response).await;
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        extract_text(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GenerationParams;

    fn config(url: &str) -> HttpBackendConfig {
        HttpBackendConfig {
            name: "primary".to_string(),
            url: url.to_string(),
            api_key: Some("secret".to_string()),
            model: None,
            stream: false,
        }
    }

    #[test]
    fn test_backend_identity() {
        let backend = HttpBackend::new(config("http://127.0.0.1:9/generate")).unwrap();

        assert_eq!(backend.name(), "primary");
        assert_eq!(backend.url(), "http://127.0.0.1:9/generate");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Port 9 (discard) is not expected to accept HTTP
        let backend = HttpBackend::new(config("http://127.0.0.1:9/generate")).unwrap();
        let req = BackendRequest::new("hello", &GenerationParams::default());

        let err = backend.generate(&req).await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}
