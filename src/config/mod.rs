use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::audit::AuditFailureMode;
use crate::backend::{GenerationParams, HttpBackendConfig, RetryPolicy};
use crate::cache::CacheSettings;
use crate::domain::EnforcementPolicy;

/// Moderation gateway configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "promptgate")]
#[command(about = "Request-time content moderation gateway for LLM backends")]
pub struct Config {
    /// HTTP server listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "PROMPTGATE_LISTEN_ADDR")]
    pub listen_addr: String,

    /// Path to rule file (.json is parsed as JSON, anything else as YAML)
    #[arg(long, default_value = "rules.yaml", env = "PROMPTGATE_RULES_PATH")]
    pub rules_path: PathBuf,

    /// Rule reload check interval in seconds (0 disables reloading)
    #[arg(long, default_value = "30", env = "PROMPTGATE_RULES_RELOAD_SECS")]
    pub rules_reload_secs: u64,

    #[arg(long, default_value = "true", action = clap::ArgAction::Set, env = "PROMPTGATE_CACHE_ENABLED")]
    pub cache_enabled: bool,

    /// Decision cache freshness window in seconds
    #[arg(long, default_value = "3600", env = "PROMPTGATE_CACHE_TTL_SECS")]
    pub cache_ttl_secs: u64,

    /// Maximum cached decisions
    #[arg(long, default_value = "1000", env = "PROMPTGATE_CACHE_MAX_SIZE")]
    pub cache_max_size: usize,

    #[arg(long, default_value = "true", action = clap::ArgAction::Set, env = "PROMPTGATE_BLOCK_CRITICAL")]
    pub block_critical: bool,

    #[arg(long, default_value = "true", action = clap::ArgAction::Set, env = "PROMPTGATE_BLOCK_HIGH")]
    pub block_high: bool,

    /// Block MEDIUM matches as well
    #[arg(long, default_value = "false", action = clap::ArgAction::Set, env = "PROMPTGATE_ALLOW_MEDIUM")]
    pub allow_medium: bool,

    /// Tries against the primary backend, first one included
    #[arg(long, default_value = "3", env = "PROMPTGATE_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    #[arg(long, default_value = "1000", env = "PROMPTGATE_BACKOFF_BASE_MS")]
    pub backoff_base_ms: u64,

    #[arg(long, default_value = "10000", env = "PROMPTGATE_BACKOFF_MAX_MS")]
    pub backoff_max_ms: u64,

    #[arg(long, default_value = "false", action = clap::ArgAction::Set, env = "PROMPTGATE_BACKOFF_JITTER")]
    pub backoff_jitter: bool,

    /// Per-attempt backend timeout in milliseconds
    #[arg(long, default_value = "30000", env = "PROMPTGATE_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Primary inference endpoint
    #[arg(long, env = "PROMPTGATE_PRIMARY_URL")]
    pub primary_url: Option<String>,

    /// Secondary inference endpoint, tried once after the primary gives up
    #[arg(long, env = "PROMPTGATE_SECONDARY_URL")]
    pub secondary_url: Option<String>,

    /// Bearer token for both endpoints
    #[arg(long, env = "PROMPTGATE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "PROMPTGATE_MODEL")]
    pub model: Option<String>,

    /// Request streamed responses
    #[arg(long, default_value = "false", action = clap::ArgAction::Set, env = "PROMPTGATE_STREAM")]
    pub stream: bool,

    #[arg(long, default_value = "512", env = "PROMPTGATE_MAX_TOKENS")]
    pub max_tokens: u32,

    #[arg(long, default_value = "0.1", env = "PROMPTGATE_TEMPERATURE")]
    pub temperature: f32,

    #[arg(long, default_value = "0.95", env = "PROMPTGATE_TOP_P")]
    pub top_p: f32,

    /// Answer every allowed input offline, never calling a backend
    #[arg(long, default_value = "false", action = clap::ArgAction::Set, env = "PROMPTGATE_MOCK_MODE")]
    pub mock_mode: bool,

    /// Maximum input length in characters
    #[arg(long, default_value = "10000", env = "PROMPTGATE_MAX_INPUT_CHARS")]
    pub max_input_chars: usize,

    /// Path to audit JSONL file (optional, disables audit if not set)
    #[arg(long, env = "PROMPTGATE_AUDIT_PATH")]
    pub audit_path: Option<PathBuf>,

    /// Fail decisions whose audit append fails
    #[arg(long, default_value = "false", action = clap::ArgAction::Set, env = "PROMPTGATE_AUDIT_FATAL")]
    pub audit_fatal: bool,

    #[arg(long, default_value = "200", env = "PROMPTGATE_AUDIT_PREVIEW_CHARS")]
    pub audit_preview_chars: usize,

    /// Decisions slower than this are logged at warn
    #[arg(long, default_value = "5000", env = "PROMPTGATE_LATENCY_BUDGET_MS")]
    pub latency_budget_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false", action = clap::ArgAction::Set, env = "PROMPTGATE_LOG_JSON")]
    pub log_json: bool,

    /// Enable graceful shutdown
    #[arg(long, default_value = "true", action = clap::ArgAction::Set, env = "PROMPTGATE_GRACEFUL_SHUTDOWN")]
    pub graceful_shutdown: bool,
}

impl Config {
    /// Rule reload interval, `None` when reloading is disabled.
    pub fn rules_reload_interval(&self) -> Option<Duration> {
        (self.rules_reload_secs > 0).then(|| Duration::from_secs(self.rules_reload_secs))
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.latency_budget_ms)
    }

    pub fn enforcement_policy(&self) -> EnforcementPolicy {
        EnforcementPolicy {
            block_critical: self.block_critical,
            block_high: self.block_high,
            allow_medium: self.allow_medium,
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            enabled: self.cache_enabled,
            ttl: Duration::from_secs(self.cache_ttl_secs),
            max_size: self.cache_max_size,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            jitter: self.backoff_jitter,
        }
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }

    pub fn audit_failure_mode(&self) -> AuditFailureMode {
        if self.audit_fatal {
            AuditFailureMode::Fatal
        } else {
            AuditFailureMode::BestEffort
        }
    }

    pub fn primary_backend(&self) -> Option<HttpBackendConfig> {
        self.backend_config("primary", self.primary_url.as_ref())
    }

    pub fn secondary_backend(&self) -> Option<HttpBackendConfig> {
        self.backend_config("secondary", self.secondary_url.as_ref())
    }

    fn backend_config(&self, name: &str, url: Option<&String>) -> Option<HttpBackendConfig> {
        url.map(|url| HttpBackendConfig {
            name: name.to_string(),
            url: url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            stream: self.stream,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "0.0.0.0:8080".to_string(),
            rules_path: PathBuf::from("rules.yaml"),
            rules_reload_secs: 30,
            cache_enabled: true,
            cache_ttl_secs: 3600,
            cache_max_size: 1000,
            block_critical: true,
            block_high: true,
            allow_medium: false,
            retry_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 10000,
            backoff_jitter: false,
            timeout_ms: 30000,
            primary_url: None,
            secondary_url: None,
            api_key: None,
            model: None,
            stream: false,
            max_tokens: 512,
            temperature: 0.1,
            top_p: 0.95,
            mock_mode: false,
            max_input_chars: 10000,
            audit_path: None,
            audit_fatal: false,
            audit_preview_chars: 200,
            latency_budget_ms: 5000,
            log_level: "info".to_string(),
            log_json: false,
            graceful_shutdown: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.cache_max_size, 1000);
        assert_eq!(config.enforcement_policy(), EnforcementPolicy::default());
        assert!(config.primary_backend().is_none());
    }

    #[test]
    fn test_parse_matches_default() {
        let parsed = Config::parse_from(["promptgate"]);
        let default = Config::default();

        assert_eq!(parsed.cache_ttl_secs, default.cache_ttl_secs);
        assert_eq!(parsed.retry_attempts, default.retry_attempts);
        assert_eq!(parsed.block_high, default.block_high);
        assert_eq!(parsed.top_p, default.top_p);
    }

    #[test]
    fn test_parse_overrides() {
        let config = Config::parse_from([
            "promptgate",
            "--allow-medium",
            "true",
            "--cache-enabled",
            "false",
            "--primary-url",
            "http://localhost:9000/generate",
            "--stream",
            "true",
        ]);

        assert!(config.enforcement_policy().allow_medium);
        assert!(!config.cache_settings().enabled);

        let primary = config.primary_backend().unwrap();
        assert_eq!(primary.name, "primary");
        assert!(primary.stream);
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config {
            rules_reload_secs: 0,
            timeout_ms: 250,
            backoff_base_ms: 100,
            backoff_max_ms: 800,
            ..Default::default()
        };

        assert_eq!(config.rules_reload_interval(), None);
        assert_eq!(config.backend_timeout(), Duration::from_millis(250));

        let retry = config.retry_policy();
        assert_eq!(retry.base_delay, Duration::from_millis(100));
        assert_eq!(retry.max_delay, Duration::from_millis(800));
    }
}
