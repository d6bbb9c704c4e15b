//! Response payload translation.
//!
//! Pure functions only: no HTTP, no async. Backends answer in several
//! shapes, so text extraction accepts each of them:
//!
//! - `[{"generated_text": ...}]` and `{"generated_text": ...}`
//! - `{"output": ...}` and `{"text": ...}`
//! - `{"choices": [{"message": {"content": ...}}]}` and `{"choices": [{"text": ...}]}`
//!
//! Streamed bodies are newline-delimited JSON or server-sent events with a
//! `data:` prefix, terminated by `[DONE]` or end of stream.

use serde::Serialize;
use serde_json::Value;

use super::{BackendError, BackendRequest};

/// Request body sent to an HTTP backend.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest<'a> {
    #[serde(flatten)]
    pub request: &'a BackendRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub stream: bool,
}

/// Extract generated text from a complete (non-streamed) response.
pub fn extract_text(body: &Value) -> Result<String, BackendError> {
    let text = match body {
        Value::Array(items) => items
            .first()
            .and_then(|first| first.get("generated_text"))
            .and_then(Value::as_str),
        Value::Object(_) => body
            .get("generated_text")
            .or_else(|| body.get("output"))
            .or_else(|| body.get("text"))
            .and_then(Value::as_str)
            .or_else(|| choice_text(body)),
        _ => None,
    };

    match text {
        Some(t) if !t.trim().is_empty() => Ok(t.to_string()),
        Some(_) => Err(BackendError::Malformed("empty generated text".to_string())),
        None => Err(BackendError::Malformed(
            "no generated text in response".to_string(),
        )),
    }
}

fn choice_text(body: &Value) -> Option<&str> {
    let choice = body.get("choices")?.get(0)?;
    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .or_else(|| choice.get("text").and_then(Value::as_str))
}

/// Text fragment carried by one streamed chunk, if any.
fn chunk_text(chunk: &Value) -> Option<&str> {
    if let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) {
        return choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .or_else(|| choice.get("text").and_then(Value::as_str));
    }

    chunk
        .get("token")
        .and_then(|t| t.get("text"))
        .and_then(Value::as_str)
        .or_else(|| chunk.get("text").and_then(Value::as_str))
}

/// Incremental assembler for streamed responses.
///
/// Bytes may split anywhere, including inside a UTF-8 sequence; only
/// complete lines are decoded.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending: Vec<u8>,
    text: String,
    done: bool,
    chunks: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        StreamAccumulator::default()
    }

    /// Feed raw bytes from the response body.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        if self.done {
            return Ok(());
        }
        self.pending.extend_from_slice(bytes);

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.consume_line(&line)?;
            if self.done {
                self.pending.clear();
                break;
            }
        }
        Ok(())
    }

    fn consume_line(&mut self, raw: &[u8]) -> Result<(), BackendError> {
        let line = std::str::from_utf8(raw)
            .map_err(|e| BackendError::StreamInterrupted(format!("invalid UTF-8 in stream: {}", e)))?
            .trim();

        if line.is_empty() || line.starts_with(':') {
            return Ok(());
        }
        // SSE fields other than data carry no text
        if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
            return Ok(());
        }

        let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
        if payload == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let chunk: Value = serde_json::from_str(payload)
            .map_err(|e| BackendError::StreamInterrupted(format!("bad chunk: {}", e)))?;

        if let Some(err) = chunk.get("error") {
            return Err(BackendError::StreamInterrupted(err.to_string()));
        }
        if let Some(fragment) = chunk_text(&chunk) {
            self.text.push_str(fragment);
        }
        self.chunks += 1;

        Ok(())
    }

    /// Number of data chunks consumed.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Finish the stream and return the assembled text.
    pub fn finish(mut self) -> Result<String, BackendError> {
        if !self.done && !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.consume_line(&tail)?;
        }

        if self.text.trim().is_empty() {
            return Err(BackendError::Malformed(
                "stream produced no text".to_string(),
            ));
        }
        Ok(self.text)
    }
}
