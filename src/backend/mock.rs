use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::{Backend, BackendError, BackendRequest};

/// In-memory backend that replays a script of results.
///
/// Each call pops the next scripted result; once the script is exhausted
/// the fallback result is returned. Useful for orchestrator, pipeline and
/// API tests.
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    fallback: Result<String, BackendError>,
    delay: Option<Duration>,
    calls: AtomicU32,
    last_prompt: Mutex<Option<String>>,
}

impl ScriptedBackend {
    /// Backend that always answers with `text`.
    pub fn answering(name: &str, text: &str) -> Self {
        ScriptedBackend::with_fallback(name, Ok(text.to_string()))
    }

    /// Backend that always fails with `err`.
    pub fn failing(name: &str, err: BackendError) -> Self {
        ScriptedBackend::with_fallback(name, Err(err))
    }

    fn with_fallback(name: &str, fallback: Result<String, BackendError>) -> Self {
        ScriptedBackend {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicU32::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// Queue results returned before the fallback.
    pub fn then(self, results: impl IntoIterator<Item = Result<String, BackendError>>) -> Self {
        self.script.lock().extend(results);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &BackendRequest) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock() = Some(request.prompt.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
