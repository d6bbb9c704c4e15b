use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::offline::OfflineResponder;
use super::retry::RetryPolicy;
use super::{Backend, BackendError, BackendRequest, GenerationParams};

/// Which responder produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Primary,
    Secondary,
    Offline,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSource::Primary => write!(f, "primary"),
            ResponseSource::Secondary => write!(f, "secondary"),
            ResponseSource::Offline => write!(f, "offline"),
        }
    }
}

/// Outcome of an orchestrated invocation. Always carries text.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub text: String,
    /// Set when the offline responder answered
    pub degraded: bool,
    /// Real backend calls made
    pub attempts: u32,
    pub source: ResponseSource,
    /// Most recent backend failure, if any
    pub last_error: Option<BackendError>,
}

/// Primary/secondary invocation with retry, timeout and offline fallback.
///
/// The primary backend gets up to `retry.attempts` tries with exponential
/// backoff between them. The secondary gets exactly one try. If both fail,
/// the offline responder answers and the result is marked degraded. Every
/// try is bounded by `timeout`. Dropping the returned future stops any
/// further tries.
#[derive(Debug, Clone)]
pub struct BackendOrchestrator {
    primary: Option<Arc<dyn Backend>>,
    secondary: Option<Arc<dyn Backend>>,
    retry: RetryPolicy,
    timeout: Duration,
    mock_mode: bool,
    offline: OfflineResponder,
}

impl BackendOrchestrator {
    pub fn new(primary: Option<Arc<dyn Backend>>) -> Self {
        BackendOrchestrator {
            primary,
            secondary: None,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            mock_mode: false,
            offline: OfflineResponder::new(),
        }
    }

    /// Orchestrator that always answers offline.
    pub fn offline_only() -> Self {
        BackendOrchestrator::new(None).with_mock_mode(true)
    }

    pub fn with_secondary(mut self, secondary: Option<Arc<dyn Backend>>) -> Self {
        self.secondary = secondary;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mock_mode(mut self, mock_mode: bool) -> Self {
        self.mock_mode = mock_mode;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn is_mock_mode(&self) -> bool {
        self.mock_mode
    }

    /// Produce text for `prompt`. Never fails.
    pub async fn invoke(&self, prompt: &str, params: &GenerationParams) -> Invocation {
        if self.mock_mode {
            debug!("Mock mode, answering offline");
            return self.degrade(prompt, 0, None);
        }

        let request = BackendRequest::new(prompt, params);
        let mut attempts = 0;
        let mut last_error = None;

        if let Some(primary) = &self.primary {
            let max = self.retry.max_attempts();

            for attempt in 1..=max {
                attempts += 1;
                match self.attempt(primary.as_ref(), &request).await {
                    Ok(text) => {
                        return Invocation {
                            text,
                            degraded: false,
                            attempts,
                            source: ResponseSource::Primary,
                            last_error,
                        };
                    }
                    Err(e) => {
                        warn!(
                            backend = primary.name(),
                            attempt,
                            max_attempts = max,
                            error = %e,
                            "Backend attempt failed"
                        );
                        last_error = Some(e);

                        if let Some(delay) = self.retry.delay_after(attempt) {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        } else {
            last_error = Some(BackendError::NotConfigured);
        }

        if let Some(secondary) = &self.secondary {
            attempts += 1;
            match self.attempt(secondary.as_ref(), &request).await {
                Ok(text) => {
                    info!(backend = secondary.name(), "Answered by secondary backend");
                    return Invocation {
                        text,
                        degraded: false,
                        attempts,
                        source: ResponseSource::Secondary,
                        last_error,
                    };
                }
                Err(e) => {
                    warn!(backend = secondary.name(), error = %e, "Secondary backend failed");
                    last_error = Some(e);
                }
            }
        }

        error!(
            attempts,
            last_error = ?last_error,
            "All inference backends failed, answering offline"
        );
        self.degrade(prompt, attempts, last_error)
    }

    async fn attempt(
        &self,
        backend: &dyn Backend,
        request: &BackendRequest,
    ) -> Result<String, BackendError> {
        let text = tokio::time::timeout(self.timeout, backend.generate(request))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;

        if text.trim().is_empty() {
            return Err(BackendError::Malformed("empty response".to_string()));
        }
        Ok(text)
    }

    fn degrade(&self, prompt: &str, attempts: u32, last_error: Option<BackendError>) -> Invocation {
        Invocation {
            text: self.offline.respond(prompt),
            degraded: true,
            attempts,
            source: ResponseSource::Offline,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::ScriptedBackend;
    use crate::backend::offline::OFFLINE_LABEL;

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    fn params() -> GenerationParams {
        GenerationParams::default()
    }

    #[tokio::test]
    async fn test_primary_success() {
        let primary = Arc::new(ScriptedBackend::answering("primary", "analysis"));
        let orch = BackendOrchestrator::new(Some(primary.clone()));

        let inv = orch.invoke("prompt", &params()).await;

        assert_eq!(inv.text, "analysis");
        assert_eq!(inv.source, ResponseSource::Primary);
        assert!(!inv.degraded);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_primary_retried_until_success() {
        let primary = Arc::new(
            ScriptedBackend::answering("primary", "third time")
                .then([Err(BackendError::Status(503)), Err(BackendError::Transport("reset".into()))]),
        );
        let orch = BackendOrchestrator::new(Some(primary.clone())).with_retry(fast_retry(3));

        let inv = orch.invoke("prompt", &params()).await;

        assert_eq!(inv.text, "third time");
        assert_eq!(inv.attempts, 3);
        assert_eq!(primary.calls(), 3);
        assert_eq!(inv.last_error, Some(BackendError::Transport("reset".into())));
    }

    #[tokio::test]
    async fn test_secondary_called_once_after_primary_exhausted() {
        let primary = Arc::new(ScriptedBackend::failing("primary", BackendError::Status(500)));
        let secondary = Arc::new(ScriptedBackend::answering("secondary", "fallback"));
        let orch = BackendOrchestrator::new(Some(primary.clone()))
            .with_secondary(Some(secondary.clone()))
            .with_retry(fast_retry(3));

        let inv = orch.invoke("prompt", &params()).await;

        assert_eq!(inv.source, ResponseSource::Secondary);
        assert_eq!(inv.text, "fallback");
        assert!(!inv.degraded);
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_both_fail_degrades() {
        let primary = Arc::new(ScriptedBackend::failing("primary", BackendError::Status(502)));
        let secondary = Arc::new(ScriptedBackend::failing(
            "secondary",
            BackendError::Malformed("bad".into()),
        ));
        let orch = BackendOrchestrator::new(Some(primary.clone()))
            .with_secondary(Some(secondary.clone()))
            .with_retry(fast_retry(2));

        let inv = orch.invoke("prompt", &params()).await;

        assert!(inv.degraded);
        assert_eq!(inv.source, ResponseSource::Offline);
        assert!(inv.text.starts_with(OFFLINE_LABEL));
        assert_eq!(inv.attempts, 3);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let slow = Arc::new(
            ScriptedBackend::answering("primary", "late").with_delay(Duration::from_millis(200)),
        );
        let orch = BackendOrchestrator::new(Some(slow.clone()))
            .with_retry(fast_retry(2))
            .with_timeout(Duration::from_millis(20));

        let inv = orch.invoke("prompt", &params()).await;

        assert!(inv.degraded);
        assert_eq!(slow.calls(), 2);
        assert_eq!(inv.last_error, Some(BackendError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_empty_text_is_malformed() {
        let primary = Arc::new(ScriptedBackend::answering("primary", "   "));
        let orch = BackendOrchestrator::new(Some(primary)).with_retry(RetryPolicy::no_retry());

        let inv = orch.invoke("prompt", &params()).await;

        assert!(inv.degraded);
        assert!(matches!(inv.last_error, Some(BackendError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_mock_mode_skips_backends() {
        let primary = Arc::new(ScriptedBackend::answering("primary", "real"));
        let orch = BackendOrchestrator::new(Some(primary.clone())).with_mock_mode(true);

        let inv = orch.invoke("prompt", &params()).await;

        assert!(inv.degraded);
        assert_eq!(inv.attempts, 0);
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_backends_degrade() {
        let inv = BackendOrchestrator::new(None).invoke("prompt", &params()).await;

        assert!(inv.degraded);
        assert_eq!(inv.attempts, 0);
        assert_eq!(inv.last_error, Some(BackendError::NotConfigured));
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let primary = Arc::new(ScriptedBackend::failing("primary", BackendError::Status(503)));
        let orch = BackendOrchestrator::new(Some(primary.clone())).with_retry(RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
        });

        let result =
            tokio::time::timeout(Duration::from_millis(30), orch.invoke("prompt", &params())).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(primary.calls(), 1);
    }
}
