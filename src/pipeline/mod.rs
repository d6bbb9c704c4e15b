//! The decide operation.
//!
//! `Pipeline::decide` walks one input through sanitize, cache lookup, rule
//! evaluation and backend invocation, then commits the decision to the
//! cache, the audit log and the metrics, in that order.
//!
//! Everything after the backend call is synchronous, so a caller that drops
//! the future before it resolves leaves no trace in any of the three sinks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditFailureMode, AuditLog, AuditRecord, AuditWriteError, DEFAULT_PREVIEW_CHARS};
use crate::backend::{
    Backend, BackendError, BackendOrchestrator, GenerationParams, HttpBackend, Invocation,
    ResponseSource,
};
use crate::cache::{DecisionCache, Fingerprint};
use crate::config::Config;
use crate::domain::{Decision, EnforcementPolicy, ReasoningTrace, Severity};
use crate::observability::{MetricsAggregator, MetricsSnapshot};
use crate::rules::{RuleHit, RuleSet};
use crate::sanitizer::{Sanitizer, ValidationError, DEFAULT_MAX_CHARS};

/// Characters of matched text quoted in the reasoning trace.
const TRACE_MATCH_CHARS: usize = 50;

/// Errors surfaced by `Pipeline::decide`.
///
/// Backend failures never appear here; they degrade the decision instead.
#[derive(Error, Debug)]
pub enum DecideError {
    #[error("Input rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("Audit write failed: {0}")]
    Audit(#[from] AuditWriteError),
}

/// Errors that prevent a pipeline from being built.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Backend setup failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Audit log setup failed: {0}")]
    Audit(#[from] AuditWriteError),
}

/// Moderation pipeline shared by all requests.
#[derive(Debug)]
pub struct Pipeline {
    sanitizer: Sanitizer,
    rules: watch::Receiver<Arc<RuleSet>>,
    policy: EnforcementPolicy,
    cache: DecisionCache,
    orchestrator: BackendOrchestrator,
    params: GenerationParams,
    audit: AuditLog,
    metrics: MetricsAggregator,
    preview_chars: usize,
    latency_budget: Duration,
}

impl Pipeline {
    /// Pipeline with default settings, no audit log and offline answers.
    pub fn new(rules: watch::Receiver<Arc<RuleSet>>) -> Self {
        Pipeline {
            sanitizer: Sanitizer::new(DEFAULT_MAX_CHARS),
            rules,
            policy: EnforcementPolicy::default(),
            cache: DecisionCache::default(),
            orchestrator: BackendOrchestrator::offline_only(),
            params: GenerationParams::default(),
            audit: AuditLog::disabled(),
            metrics: MetricsAggregator::new(),
            preview_chars: DEFAULT_PREVIEW_CHARS,
            latency_budget: Duration::from_secs(5),
        }
    }

    /// Build every component from configuration.
    pub fn from_config(
        config: &Config,
        rules: watch::Receiver<Arc<RuleSet>>,
    ) -> Result<Self, BuildError> {
        let primary = config
            .primary_backend()
            .map(HttpBackend::new)
            .transpose()?
            .map(|b| Arc::new(b) as Arc<dyn Backend>);
        let secondary = config
            .secondary_backend()
            .map(HttpBackend::new)
            .transpose()?
            .map(|b| Arc::new(b) as Arc<dyn Backend>);

        if primary.is_none() && secondary.is_none() && !config.mock_mode {
            warn!("No inference backend configured, allowed inputs will be answered offline");
        }

        let orchestrator = BackendOrchestrator::new(primary)
            .with_secondary(secondary)
            .with_retry(config.retry_policy())
            .with_timeout(config.backend_timeout())
            .with_mock_mode(config.mock_mode);

        let audit = match &config.audit_path {
            Some(path) => {
                let log = AuditLog::open(path, config.audit_failure_mode())?;
                info!(path = %path.display(), mode = ?log.mode(), "Audit log enabled");
                log
            }
            None => {
                info!("Audit log disabled (no path configured)");
                AuditLog::disabled()
            }
        };

        Ok(Pipeline::new(rules)
            .with_sanitizer(Sanitizer::new(config.max_input_chars))
            .with_policy(config.enforcement_policy())
            .with_cache(DecisionCache::new(config.cache_settings()))
            .with_orchestrator(orchestrator)
            .with_params(config.generation_params())
            .with_audit(audit, config.audit_preview_chars)
            .with_latency_budget(config.latency_budget()))
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_policy(mut self, policy: EnforcementPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cache(mut self, cache: DecisionCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: BackendOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_audit(mut self, audit: AuditLog, preview_chars: usize) -> Self {
        self.audit = audit;
        self.preview_chars = preview_chars;
        self
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = budget;
        self
    }

    /// Decide whether `raw` may reach the model, and answer it if so.
    pub async fn decide(
        &self,
        raw: impl AsRef<[u8]>,
        context: &str,
    ) -> Result<Decision, DecideError> {
        let start = Instant::now();

        let text = match self.sanitizer.sanitize(raw.as_ref()) {
            Ok(text) => text,
            Err(e) => {
                warn!(context, error = %e, "Input rejected");
                self.metrics.record_rejection();
                return Err(e.into());
            }
        };

        let key = Fingerprint::of(&text, context);

        if let Some(cached) = self.cache.get(&key) {
            debug!(fingerprint = %key.short(), "Cache hit");
            let decision = cached.replayed(elapsed_ms(start));
            return self.commit(&text, decision, None);
        }

        let mut trace = ReasoningTrace::new();
        trace.push(format!("Input received for {}", context));
        trace.push(format!(
            "Sanitized input ({} characters)",
            text.chars().count()
        ));
        trace.push("Cache miss".to_string());

        // Clone out of the watch borrow; the guard must not live across an await
        let rules = self.rules.borrow().clone();
        trace.push(format!(
            "Rule check against {} rules (version {})",
            rules.len(),
            rules.version
        ));

        let result = rules.evaluate(&text, &self.policy);

        if let (true, Some(hit)) = (result.blocked, &result.hit) {
            warn!(
                rule_id = %hit.rule.id,
                severity = %hit.rule.severity,
                fingerprint = %key.short(),
                context,
                "Input blocked"
            );
            let decision = blocked_decision(hit, context, trace, start);
            return self.commit(&text, decision, Some(key));
        }

        match &result.hit {
            Some(hit) => {
                info!(
                    rule_id = %hit.rule.id,
                    severity = %hit.rule.severity,
                    "Rule matched below blocking threshold"
                );
                trace.push(format!(
                    "Rule {} matched ({}), not enabled for blocking",
                    hit.rule.id, hit.rule.severity
                ));
            }
            None => trace.push("No security violations detected".to_string()),
        }

        let prompt = build_prompt(context, &text);
        let invocation = self.orchestrator.invoke(&prompt, &self.params).await;
        trace.push(describe_invocation(&invocation));

        let hit = result.hit.as_ref();
        let decision = Decision {
            blocked: false,
            output: Some(invocation.text),
            rule_id: hit.map(|h| h.rule.id.clone()),
            rule_name: hit.map(|h| h.rule.name.clone()),
            severity: hit.map(|h| h.rule.severity).unwrap_or(Severity::None),
            matched_text: hit.map(|h| h.matched_text.clone()),
            match_span: hit.map(|h| h.span),
            reasoning_trace: trace,
            latency_ms: elapsed_ms(start),
            timestamp: Utc::now(),
            context: context.to_string(),
            from_cache: false,
            degraded: invocation.degraded,
        };

        self.commit(&text, decision, Some(key))
    }

    /// Persist a terminal decision: cache, then audit, then metrics.
    fn commit(
        &self,
        text: &str,
        decision: Decision,
        cache_key: Option<Fingerprint>,
    ) -> Result<Decision, DecideError> {
        if decision.latency_ms > self.latency_budget.as_millis() as u64 {
            warn!(
                latency_ms = decision.latency_ms,
                budget_ms = self.latency_budget.as_millis() as u64,
                "Decision latency exceeded budget"
            );
        }

        if let Some(key) = cache_key {
            self.cache.put(key, Arc::new(decision.clone()));
        }

        let audit_result = if self.audit.is_enabled() {
            self.audit
                .append(&AuditRecord::from_decision(text, &decision, self.preview_chars))
        } else {
            Ok(())
        };
        if let Err(e) = &audit_result {
            error!(error = %e, mode = ?self.audit.mode(), "Failed to append audit record");
            self.metrics.record_audit_error();
        }

        self.metrics.record(&decision);

        info!(
            blocked = decision.blocked,
            rule_id = ?decision.rule_id,
            from_cache = decision.from_cache,
            degraded = decision.degraded,
            latency_ms = decision.latency_ms,
            "Decision completed"
        );

        match audit_result {
            Err(e) if self.audit.mode() == AuditFailureMode::Fatal => Err(e.into()),
            _ => Ok(decision),
        }
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Rule set currently in effect.
    pub fn rule_set(&self) -> Arc<RuleSet> {
        self.rules.borrow().clone()
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn policy(&self) -> &EnforcementPolicy {
        &self.policy
    }

    pub fn orchestrator(&self) -> &BackendOrchestrator {
        &self.orchestrator
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Wrap allowed input in the analyst-assistant prompt.
pub fn build_prompt(context: &str, input: &str) -> String {
    format!(
        "You are a Security Operations Center (SOC) analyst assistant. \
         Provide objective, professional analysis.\n\n\
         Context: {}\nInput: {}\n\nAnalysis:",
        context, input
    )
}

fn block_message(hit: &RuleHit) -> String {
    let rule = &hit.rule;
    let reason = if rule.description.is_empty() {
        rule.name.as_str()
    } else {
        rule.description.as_str()
    };

    format!(
        "Security policy violation detected.\n\n\
         Rule: {} ({})\nSeverity: {}\nReason: {}\n\n\
         This input cannot be processed. Rephrase the request without the prohibited pattern.",
        rule.name, rule.id, rule.severity, reason
    )
}

fn blocked_decision(
    hit: &RuleHit,
    context: &str,
    mut trace: ReasoningTrace,
    start: Instant,
) -> Decision {
    let quoted: String = hit.matched_text.chars().take(TRACE_MATCH_CHARS).collect();
    trace.push(format!("Rule {} triggered ({})", hit.rule.id, hit.rule.severity));
    trace.push(format!("Pattern matched: {}", quoted));
    trace.push(format!("Action: {}", hit.rule.action));
    trace.push("Request blocked, backend not invoked".to_string());

    Decision {
        blocked: true,
        output: Some(block_message(hit)),
        rule_id: Some(hit.rule.id.clone()),
        rule_name: Some(hit.rule.name.clone()),
        severity: hit.rule.severity,
        matched_text: Some(hit.matched_text.clone()),
        match_span: Some(hit.span),
        reasoning_trace: trace,
        latency_ms: elapsed_ms(start),
        timestamp: Utc::now(),
        context: context.to_string(),
        from_cache: false,
        degraded: false,
    }
}

fn describe_invocation(inv: &Invocation) -> String {
    match inv.source {
        ResponseSource::Primary => format!("Response from primary backend after {} attempt(s)", inv.attempts),
        ResponseSource::Secondary => format!(
            "Primary backend exhausted, response from secondary backend ({} attempts total)",
            inv.attempts
        ),
        ResponseSource::Offline if inv.attempts == 0 && inv.last_error.is_none() => {
            "Mock mode: offline responder used".to_string()
        }
        ResponseSource::Offline => format!(
            "All backends failed after {} attempt(s), degraded offline response",
            inv.attempts
        ),
    }
}
