pub mod compiled;

pub use compiled::{CompiledRule, PatternMatch};

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::{EnforcementPolicy, RuleDocument, Severity};
use crate::policy::RuleLoadError;

/// Longest matched-text excerpt carried in a result.
pub const MATCHED_TEXT_MAX_CHARS: usize = 100;

/// Immutable, ordered collection of compiled rules.
///
/// Rules are held in evaluation order: severity descending, definition
/// order preserved within a severity. A rule set is never mutated; reloading
/// builds a new one and swaps the shared reference.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<Arc<CompiledRule>>,
    pub version: String,
}

/// The rule that fired, with what it matched.
#[derive(Debug, Clone)]
pub struct RuleHit {
    pub rule: Arc<CompiledRule>,
    pub matched_text: String,
    pub span: (usize, usize),
}

/// Outcome of evaluating text against a rule set.
///
/// `hit` is present whenever a rule matched; `blocked` is set only when the
/// matched severity is enabled for blocking.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub blocked: bool,
    pub hit: Option<RuleHit>,
}

impl MatchResult {
    #[inline]
    pub fn pass() -> Self {
        MatchResult::default()
    }
}

impl RuleSet {
    /// Validate and compile a rule document.
    pub fn compile(doc: &RuleDocument) -> Result<Self, RuleLoadError> {
        let mut seen_ids = HashSet::new();
        let mut rules = Vec::with_capacity(doc.rules.len());

        for def in &doc.rules {
            if def.id.trim().is_empty() {
                return Err(RuleLoadError::Validation(
                    "Rule ID cannot be empty".to_string(),
                ));
            }
            if !seen_ids.insert(def.id.as_str()) {
                return Err(RuleLoadError::DuplicateId(def.id.clone()));
            }
            if def.severity == Severity::None {
                return Err(RuleLoadError::Validation(format!(
                    "Rule {} has severity NONE",
                    def.id
                )));
            }

            let rule = CompiledRule::compile(def).map_err(|source| {
                RuleLoadError::InvalidPattern {
                    id: def.id.clone(),
                    source,
                }
            })?;

            for example in &def.examples {
                if !rule.is_match(example) {
                    tracing::warn!(
                        rule_id = %def.id,
                        example = %example,
                        "Rule example does not match its own pattern"
                    );
                }
            }

            rules.push(Arc::new(rule));
        }

        // Stable sort keeps definition order within equal severity
        rules.sort_by(|a, b| b.severity.cmp(&a.severity));

        Ok(RuleSet {
            rules,
            version: doc.version.clone(),
        })
    }

    /// Create an empty rule set.
    pub fn empty() -> Self {
        RuleSet {
            rules: Vec::new(),
            version: "0.0.0".to_string(),
        }
    }

    /// Evaluate text, stopping at the first matching rule.
    pub fn evaluate(&self, text: &str, policy: &EnforcementPolicy) -> MatchResult {
        for rule in &self.rules {
            if let Some(m) = rule.find(text) {
                return MatchResult {
                    blocked: policy.blocks(rule.severity),
                    hit: Some(RuleHit {
                        rule: rule.clone(),
                        matched_text: truncate_chars(&m.text, MATCHED_TEXT_MAX_CHARS),
                        span: (m.start, m.end),
                    }),
                };
            }
        }

        MatchResult::pass()
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Arc<CompiledRule>] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Arc<CompiledRule>> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
