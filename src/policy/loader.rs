use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::policy::UNVERSIONED;
use crate::domain::{RuleDef, RuleDocument, RuleFile};
use crate::rules::RuleSet;

/// Rule schema major versions this build understands.
const SUPPORTED_MAJOR_VERSIONS: &[&str] = &["1", "2"];

/// Errors that can occur during rule loading.
///
/// Any of these at startup prevents the pipeline from becoming ready.
#[derive(Error, Debug)]
pub enum RuleLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern in rule {id}: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("Duplicate rule ID: {0}")]
    DuplicateId(String),

    #[error("Unsupported rule schema version: {0}")]
    UnsupportedVersion(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Rule file encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Json,
    Yaml,
}

impl RuleFormat {
    /// Pick the format from the file extension; anything but `.json` is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => RuleFormat::Json,
            _ => RuleFormat::Yaml,
        }
    }
}

/// Top-level shape of a rule file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Document,
    List,
}

fn detect_shape(content: &str, format: RuleFormat) -> Result<Shape, RuleLoadError> {
    let shape = match format {
        RuleFormat::Json => match serde_json::from_str::<serde_json::Value>(content)? {
            serde_json::Value::Object(_) => Some(Shape::Document),
            serde_json::Value::Array(_) => Some(Shape::List),
            _ => None,
        },
        RuleFormat::Yaml => match serde_yaml::from_str::<serde_yaml::Value>(content)? {
            serde_yaml::Value::Mapping(_) => Some(Shape::Document),
            serde_yaml::Value::Sequence(_) => Some(Shape::List),
            _ => None,
        },
    };

    shape.ok_or_else(|| {
        RuleLoadError::Validation("rule file must be a mapping or a list of rules".to_string())
    })
}

/// Parse a rule document from text.
///
/// The file shape is decided first, so a malformed rule is reported with
/// the parser's own error and location.
pub fn parse_document(content: &str, format: RuleFormat) -> Result<RuleDocument, RuleLoadError> {
    let file = match (detect_shape(content, format)?, format) {
        (Shape::Document, RuleFormat::Json) => {
            RuleFile::Versioned(serde_json::from_str::<RuleDocument>(content)?)
        }
        (Shape::Document, RuleFormat::Yaml) => {
            RuleFile::Versioned(serde_yaml::from_str::<RuleDocument>(content)?)
        }
        (Shape::List, RuleFormat::Json) => {
            RuleFile::Bare(serde_json::from_str::<Vec<RuleDef>>(content)?)
        }
        (Shape::List, RuleFormat::Yaml) => {
            RuleFile::Bare(serde_yaml::from_str::<Vec<RuleDef>>(content)?)
        }
    };

    let doc = file.into_document();
    validate_version(&doc.version)?;

    Ok(doc)
}

/// Load a rule document from a file.
pub fn load_document(path: impl AsRef<Path>) -> Result<RuleDocument, RuleLoadError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    parse_document(&content, RuleFormat::from_path(path))
}

/// Load and compile a rule set from a file.
pub fn load_rules(path: impl AsRef<Path>) -> Result<(RuleDocument, RuleSet), RuleLoadError> {
    let doc = load_document(path)?;
    let ruleset = RuleSet::compile(&doc)?;
    Ok((doc, ruleset))
}

fn validate_version(version: &str) -> Result<(), RuleLoadError> {
    if version.is_empty() {
        return Err(RuleLoadError::Validation(
            "Rule version cannot be empty".to_string(),
        ));
    }
    if version == UNVERSIONED {
        return Ok(());
    }

    let major = version
        .trim_start_matches(|c: char| c == 'v' || c == 'V')
        .split('.')
        .next()
        .unwrap_or_default();

    if SUPPORTED_MAJOR_VERSIONS.contains(&major) {
        Ok(())
    } else {
        Err(RuleLoadError::UnsupportedVersion(version.to_string()))
    }
}

/// Rule loader bound to a rule file path.
#[derive(Debug, Clone)]
pub struct RuleLoader {
    path: PathBuf,
}

impl RuleLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RuleLoader { path: path.into() }
    }

    /// Load and compile the rule set.
    pub fn load(&self) -> Result<(RuleDocument, RuleSet), RuleLoadError> {
        load_rules(&self.path)
    }

    /// Load only the document (without compiling patterns).
    pub fn load_document(&self) -> Result<RuleDocument, RuleLoadError> {
        load_document(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
