use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::cache::content_hash;
use crate::domain::{Decision, Severity};

/// Default length of the input preview, in characters.
pub const DEFAULT_PREVIEW_CHARS: usize = 200;

/// Errors that can occur while appending to the audit log.
#[derive(Error, Debug)]
pub enum AuditWriteError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How the pipeline treats an audit write failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditFailureMode {
    /// Log, count, and return the decision anyway
    #[default]
    BestEffort,
    /// Fail the decide call
    Fatal,
}

/// One line of the audit log.
///
/// The input itself is never stored: only its hash and a bounded preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub input_hash: String,
    pub input_preview: String,
    pub blocked: bool,
    pub rule_id: Option<String>,
    pub severity: Severity,
    pub latency_ms: u64,
    pub context: String,
    pub degraded: bool,
}

impl AuditRecord {
    pub fn from_decision(input: &str, decision: &Decision, preview_chars: usize) -> Self {
        AuditRecord {
            timestamp: decision.timestamp,
            input_hash: content_hash(input),
            input_preview: preview(input, preview_chars),
            blocked: decision.blocked,
            rule_id: decision.rule_id.clone(),
            severity: decision.severity,
            latency_ms: decision.latency_ms,
            context: decision.context.clone(),
            degraded: decision.degraded,
        }
    }
}

/// Single-line preview: control characters replaced, length bounded.
fn preview(input: &str, max_chars: usize) -> String {
    let mut out: String = input
        .chars()
        .take(max_chars)
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    if input.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

/// Append-only JSONL sink for decisions.
///
/// Appends are serialized by a mutex, so lines land in the order callers
/// acquire it and are never interleaved. Each line goes to the file in one
/// unbuffered write: a failed append leaves nothing behind to be written by
/// a later one. Records are never rewritten.
pub struct AuditLog {
    writer: Mutex<Option<File>>,
    path: Option<PathBuf>,
    mode: AuditFailureMode,
    records_written: AtomicU64,
}

impl AuditLog {
    /// Open or create an audit file for appending.
    pub fn open(path: impl AsRef<Path>, mode: AuditFailureMode) -> Result<Self, AuditWriteError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(AuditLog {
            writer: Mutex::new(Some(file)),
            path: Some(path.to_path_buf()),
            mode,
            records_written: AtomicU64::new(0),
        })
    }

    /// A log that accepts and discards every record.
    pub fn disabled() -> Self {
        AuditLog {
            writer: Mutex::new(None),
            path: None,
            mode: AuditFailureMode::BestEffort,
            records_written: AtomicU64::new(0),
        }
    }

    /// Append one record as a JSON line.
    ///
    /// On failure a partially written line is truncated away when the sink
    /// is a regular file, so the log only ever holds whole records.
    pub fn append(&self, record: &AuditRecord) -> Result<(), AuditWriteError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.writer.lock();
        let Some(file) = guard.as_mut() else {
            return Ok(());
        };

        let start = file.metadata().ok().filter(|m| m.is_file()).map(|m| m.len());
        if let Err(e) = file.write_all(&line) {
            if let Some(len) = start {
                let _ = file.set_len(len);
            }
            return Err(e.into());
        }

        self.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn mode(&self) -> AuditFailureMode {
        self.mode
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("records_written", &self.records_written())
            .finish()
    }
}
