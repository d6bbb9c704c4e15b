use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Threat severity with total ordering.
///
/// Severities are ordered from least to most severe. Rules are evaluated
/// in descending severity order, and the severity decides whether a match
/// is eligible to block under the active enforcement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Severity {
    /// No rule matched
    None = 0,
    /// Reported for observability, never blocks
    Low = 1,
    /// Blocks only when explicitly enabled
    Medium = 2,
    /// Blocks by default
    High = 3,
    /// Blocks by default
    Critical = 4,
}

impl Severity {
    /// Returns the severity rank (0-4).
    #[inline]
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Parse from string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NONE" => Some(Severity::None),
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::None
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered reasoning steps attached to a decision.
pub type ReasoningTrace = SmallVec<[String; 8]>;

/// Final moderation decision for a single input.
///
/// Produced exactly once per decide call, or copied from the cache with
/// `from_cache` set. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the input was blocked
    pub blocked: bool,

    /// Backend response for allowed input, violation notice for blocked input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Rule that matched (blocking or annotating)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,

    /// Severity of the matched rule, NONE when nothing matched
    pub severity: Severity,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,

    /// UTF-8 byte offsets `(start, end)` of the match within the sanitized
    /// text, not character offsets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_span: Option<(usize, usize)>,

    pub reasoning_trace: ReasoningTrace,

    /// End-to-end processing time
    pub latency_ms: u64,

    pub timestamp: DateTime<Utc>,

    /// Caller-supplied context label (e.g. "SOC Analysis")
    pub context: String,

    pub from_cache: bool,

    /// Output came from the offline responder
    pub degraded: bool,
}

impl Decision {
    /// Copy of a cached decision, re-stamped for the current request.
    ///
    /// The block/allow outcome, rule and output are reused verbatim.
    pub fn replayed(&self, latency_ms: u64) -> Self {
        let mut trace = self.reasoning_trace.clone();
        trace.push("Cache hit: reused earlier decision, rules and backend skipped".to_string());

        Decision {
            reasoning_trace: trace,
            latency_ms,
            timestamp: Utc::now(),
            from_cache: true,
            ..self.clone()
        }
    }

    /// Returns true if a rule matched, whether or not it blocked.
    pub fn rule_matched(&self) -> bool {
        self.rule_id.is_some()
    }
}
