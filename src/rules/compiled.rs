use regex::{Regex, RegexBuilder};

use crate::domain::{Action, RuleDef, Severity};

/// Upper bound on the compiled program size of a single pattern.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// A rule with its pattern compiled into a matcher.
///
/// Patterns run on a finite-automata engine, so matching is linear in the
/// input length. Constructs that need backtracking (backreferences,
/// look-around) fail to compile and are rejected at load time.
#[derive(Debug)]
pub struct CompiledRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub action: Action,
    pub category: String,
    regex: Regex,
}

/// A successful pattern match.
///
/// `start` and `end` are UTF-8 byte offsets into the searched text, so
/// `&text[start..end] == self.text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl CompiledRule {
    /// Compile a rule definition.
    pub fn compile(def: &RuleDef) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(&def.pattern)
            .case_insensitive(true)
            .multi_line(true)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()?;

        let name = if def.name.is_empty() {
            def.id.clone()
        } else {
            def.name.clone()
        };

        Ok(CompiledRule {
            id: def.id.clone(),
            name,
            description: def.description.clone(),
            severity: def.severity,
            action: def.action,
            category: def.category.clone(),
            regex,
        })
    }

    /// Find the leftmost match in the text.
    #[inline]
    pub fn find(&self, text: &str) -> Option<PatternMatch> {
        self.regex.find(text).map(|m| PatternMatch {
            text: m.as_str().to_string(),
            start: m.start(),
            end: m.end(),
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}
