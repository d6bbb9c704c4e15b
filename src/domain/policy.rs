use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Severity;

/// Version assigned to rule files that carry no version field.
pub const UNVERSIONED: &str = "unversioned";

/// Rule definition document.
///
/// Unknown fields are ignored so that newer rule files remain loadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDocument {
    /// Rule schema/content version; numeric versions are kept as written
    #[serde(default = "unversioned", deserialize_with = "deserialize_version")]
    pub version: String,

    /// Last update marker (free text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    /// Rule definitions in file order
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

impl RuleDocument {
    /// Create an empty document.
    pub fn empty() -> Self {
        RuleDocument {
            version: "0.0.0".to_string(),
            last_updated: None,
            rules: Vec::new(),
        }
    }
}

fn unversioned() -> String {
    UNVERSIONED.to_string()
}

/// Accepts `version: "2.1"`, `version: 2.1` and `version: 2`.
fn deserialize_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct VersionVisitor;

    impl<'de> Visitor<'de> for VersionVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a version string or number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_unit<E: de::Error>(self) -> Result<String, E> {
            Ok(unversioned())
        }

        fn visit_none<E: de::Error>(self) -> Result<String, E> {
            Ok(unversioned())
        }
    }

    deserializer.deserialize_any(VersionVisitor)
}

/// Accepted rule file shapes: a versioned document or a bare rule list.
///
/// The loader picks the shape from the top-level value (mapping or
/// sequence) and deserializes that shape directly.
#[derive(Debug, Clone)]
pub enum RuleFile {
    Versioned(RuleDocument),
    Bare(Vec<RuleDef>),
}

impl RuleFile {
    pub fn into_document(self) -> RuleDocument {
        match self {
            RuleFile::Versioned(doc) => doc,
            RuleFile::Bare(rules) => RuleDocument {
                version: UNVERSIONED.to_string(),
                last_updated: None,
                rules,
            },
        }
    }
}

/// Rule action tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    #[default]
    Block,
    Review,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Block => write!(f, "BLOCK"),
            Action::Review => write!(f, "REVIEW"),
        }
    }
}

fn default_category() -> String {
    "general".to_string()
}

/// Definition of a single pattern rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    /// Unique rule identifier
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Regular expression, compiled case-insensitive and multi-line
    pub pattern: String,

    pub severity: Severity,

    #[serde(default)]
    pub action: Action,

    #[serde(default = "default_category")]
    pub category: String,

    /// Sample inputs the pattern is expected to match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

/// Enforcement policy deciding which matched severities block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementPolicy {
    pub block_critical: bool,
    pub block_high: bool,
    /// Opt-in blocking for MEDIUM matches
    pub allow_medium: bool,
}

impl EnforcementPolicy {
    /// Whether a match of the given severity blocks.
    ///
    /// LOW and NONE never block.
    #[inline]
    pub fn blocks(&self, severity: Severity) -> bool {
        match severity {
            Severity::Critical => self.block_critical,
            Severity::High => self.block_high,
            Severity::Medium => self.allow_medium,
            Severity::Low | Severity::None => false,
        }
    }
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        EnforcementPolicy {
            block_critical: true,
            block_high: true,
            allow_medium: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_deserialization() {
        let yaml = r#"
version: "2.2"
last_updated: "2025-10-01"
rules:
  - id: CMD_001
    name: Destructive shell command
    description: Attempts to run destructive filesystem commands
    pattern: 'rm\s+-rf\s+\S+'
    severity: CRITICAL
    action: BLOCK
    category: command_injection
    examples: ["rm -rf /var/log/*"]
    owner: secops
  - id: JB_001
    name: Jailbreak
    pattern: 'ignore\s+(all\s+)?instructions?'
    severity: HIGH
"#;

        let doc: RuleDocument = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(doc.version, "2.2");
        assert_eq!(doc.rules.len(), 2);
        assert_eq!(doc.rules[0].severity, Severity::Critical);
        assert_eq!(doc.rules[1].action, Action::Block);
        assert_eq!(doc.rules[1].category, "general");
    }

    #[test]
    fn test_bare_list_is_unversioned() {
        let json = r#"[
            {"id": "R1", "name": "Test", "pattern": "secret", "severity": "LOW", "action": "REVIEW"}
        ]"#;

        let rules: Vec<RuleDef> = serde_json::from_str(json).unwrap();
        let doc = RuleFile::Bare(rules).into_document();

        assert_eq!(doc.version, UNVERSIONED);
        assert_eq!(doc.rules[0].action, Action::Review);
    }

    #[test]
    fn test_numeric_and_missing_versions() {
        let float: RuleDocument = serde_yaml::from_str("version: 2.1\nrules: []").unwrap();
        assert_eq!(float.version, "2.1");

        let int: RuleDocument = serde_json::from_str(r#"{"version": 1, "rules": []}"#).unwrap();
        assert_eq!(int.version, "1");

        let missing: RuleDocument = serde_json::from_str(r#"{"rules": []}"#).unwrap();
        assert_eq!(missing.version, UNVERSIONED);

        let null: RuleDocument = serde_yaml::from_str("version:\nrules: []").unwrap();
        assert_eq!(null.version, UNVERSIONED);
    }

    #[test]
    fn test_default_policy_blocks() {
        let policy = EnforcementPolicy::default();

        assert!(policy.blocks(Severity::Critical));
        assert!(policy.blocks(Severity::High));
        assert!(!policy.blocks(Severity::Medium));
        assert!(!policy.blocks(Severity::Low));
        assert!(!policy.blocks(Severity::None));
    }

    #[test]
    fn test_medium_opt_in() {
        let policy = EnforcementPolicy {
            allow_medium: true,
            ..Default::default()
        };

        assert!(policy.blocks(Severity::Medium));
        assert!(!policy.blocks(Severity::Low));
    }
}
