use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Instant;

use crate::domain::Decision;

#[derive(Debug)]
struct Counters {
    total: u64,
    blocked: u64,
    allowed: u64,
    cache_hits: u64,
    degraded: u64,
    rejected: u64,
    audit_write_errors: u64,
    rule_triggers: AHashMap<String, u64>,
    latency_sum_ms: u64,
    started: Instant,
    start_time: DateTime<Utc>,
}

impl Counters {
    fn new() -> Self {
        Counters {
            total: 0,
            blocked: 0,
            allowed: 0,
            cache_hits: 0,
            degraded: 0,
            rejected: 0,
            audit_write_errors: 0,
            rule_triggers: AHashMap::new(),
            latency_sum_ms: 0,
            started: Instant::now(),
            start_time: Utc::now(),
        }
    }
}

/// Point-in-time copy of all counters.
///
/// Rates are derived from the counters at snapshot time and are 0 when no
/// decision has been recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub allowed_requests: u64,
    pub cache_hits: u64,
    pub degraded_responses: u64,
    /// Inputs refused by the sanitizer. Kept outside the decision counters:
    /// a rejection never touches `total_requests`, the rates or the latency
    pub rejected_requests: u64,
    pub audit_write_errors: u64,
    pub rule_triggers: BTreeMap<String, u64>,
    pub block_rate: f64,
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
    pub start_time: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl MetricsSnapshot {
    /// Render in Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);

        let counters = [
            ("promptgate_requests_total", "Completed decisions", self.total_requests),
            ("promptgate_blocked_total", "Blocked decisions", self.blocked_requests),
            ("promptgate_allowed_total", "Allowed decisions", self.allowed_requests),
            ("promptgate_cache_hits_total", "Decisions served from cache", self.cache_hits),
            ("promptgate_degraded_total", "Decisions answered offline", self.degraded_responses),
            ("promptgate_rejected_total", "Inputs rejected by validation", self.rejected_requests),
            ("promptgate_audit_write_errors_total", "Failed audit appends", self.audit_write_errors),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}\n# TYPE {} counter\n{} {}\n", name, help, name, name, value);
        }

        let _ = writeln!(
            out,
            "# HELP promptgate_rule_triggers_total Blocking matches per rule\n# TYPE promptgate_rule_triggers_total counter"
        );
        for (rule_id, count) in &self.rule_triggers {
            let _ = writeln!(out, "promptgate_rule_triggers_total{{rule_id=\"{}\"}} {}", rule_id, count);
        }
        out.push('\n');

        let gauges = [
            ("promptgate_block_rate", "Blocked over total", self.block_rate),
            ("promptgate_cache_hit_rate", "Cache hits over total", self.cache_hit_rate),
            ("promptgate_avg_latency_ms", "Mean decision latency", self.avg_latency_ms),
            ("promptgate_uptime_seconds", "Seconds since start or reset", self.uptime_secs as f64),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP {} {}\n# TYPE {} gauge\n{} {}\n", name, help, name, name, value);
        }

        out
    }
}

/// Running counters over completed decisions.
///
/// All counters live behind one lock, so a snapshot never observes a
/// half-applied update. Each record also feeds the global `metrics`
/// recorder for the Prometheus exporter.
#[derive(Debug)]
pub struct MetricsAggregator {
    inner: Mutex<Counters>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        MetricsAggregator {
            inner: Mutex::new(Counters::new()),
        }
    }

    /// Record a completed decision.
    pub fn record(&self, decision: &Decision) {
        {
            let mut c = self.inner.lock();
            c.total += 1;
            if decision.blocked {
                c.blocked += 1;
                // A replayed block is not a new rule trigger
                if let (Some(rule_id), false) = (&decision.rule_id, decision.from_cache) {
                    *c.rule_triggers.entry(rule_id.clone()).or_insert(0) += 1;
                }
            } else {
                c.allowed += 1;
            }
            if decision.from_cache {
                c.cache_hits += 1;
            }
            if decision.degraded {
                c.degraded += 1;
            }
            c.latency_sum_ms += decision.latency_ms;
        }

        let outcome = if decision.blocked { "blocked" } else { "allowed" };
        metrics::counter!("promptgate_decisions_total", "outcome" => outcome).increment(1);
        metrics::histogram!("promptgate_decision_latency_ms").record(decision.latency_ms as f64);
        if decision.from_cache {
            metrics::counter!("promptgate_cache_hits_total").increment(1);
        } else if decision.blocked {
            if let Some(rule_id) = &decision.rule_id {
                metrics::counter!("promptgate_rule_triggers_total", "rule_id" => rule_id.clone())
                    .increment(1);
            }
        }
        if decision.degraded {
            metrics::counter!("promptgate_degraded_total").increment(1);
        }
    }

    /// Record an input refused by validation.
    ///
    /// Only `rejected_requests` moves; no decision was made.
    pub fn record_rejection(&self) {
        self.inner.lock().rejected += 1;
        metrics::counter!("promptgate_rejected_total").increment(1);
    }

    /// Record a failed audit append.
    pub fn record_audit_error(&self) {
        self.inner.lock().audit_write_errors += 1;
        metrics::counter!("promptgate_audit_write_errors_total").increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.inner.lock();

        let ratio = |n: u64| {
            if c.total == 0 {
                0.0
            } else {
                n as f64 / c.total as f64
            }
        };

        MetricsSnapshot {
            total_requests: c.total,
            blocked_requests: c.blocked,
            allowed_requests: c.allowed,
            cache_hits: c.cache_hits,
            degraded_responses: c.degraded,
            rejected_requests: c.rejected,
            audit_write_errors: c.audit_write_errors,
            rule_triggers: c
                .rule_triggers
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            block_rate: ratio(c.blocked),
            cache_hit_rate: ratio(c.cache_hits),
            avg_latency_ms: ratio(c.latency_sum_ms),
            start_time: c.start_time,
            uptime_secs: c.started.elapsed().as_secs(),
        }
    }

    /// Zero all counters and restart the uptime clock.
    pub fn reset(&self) {
        *self.inner.lock() = Counters::new();
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        MetricsAggregator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;
    use std::sync::Arc;

    fn decision(blocked: bool, rule: Option<&str>, latency_ms: u64) -> Decision {
        Decision {
            blocked,
            output: None,
            rule_id: rule.map(str::to_string),
            rule_name: None,
            severity: if blocked { Severity::High } else { Severity::None },
            matched_text: None,
            match_span: None,
            reasoning_trace: Default::default(),
            latency_ms,
            timestamp: Utc::now(),
            context: "test".to_string(),
            from_cache: false,
            degraded: false,
        }
    }

    #[test]
    fn test_empty_snapshot_has_zero_rates() {
        let snap = MetricsAggregator::new().snapshot();

        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.block_rate, 0.0);
        assert_eq!(snap.cache_hit_rate, 0.0);
        assert_eq!(snap.avg_latency_ms, 0.0);
    }

    #[test]
    fn test_block_rate_is_exact() {
        let metrics = MetricsAggregator::new();
        let (n, k) = (7u64, 3u64);

        for i in 0..n {
            if i < k {
                metrics.record(&decision(true, Some("JB_001"), 10));
            } else {
                metrics.record(&decision(false, None, 20));
            }
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, n);
        assert_eq!(snap.blocked_requests, k);
        assert_eq!(snap.allowed_requests, n - k);
        assert_eq!(snap.block_rate, k as f64 / n as f64);
        assert_eq!(snap.avg_latency_ms, (3.0 * 10.0 + 4.0 * 20.0) / 7.0);
        assert_eq!(snap.rule_triggers.get("JB_001"), Some(&3));
    }

    #[test]
    fn test_non_blocking_match_not_a_trigger() {
        let metrics = MetricsAggregator::new();
        metrics.record(&decision(false, Some("LOW_001"), 1));

        assert!(metrics.snapshot().rule_triggers.is_empty());
    }

    #[test]
    fn test_cache_hits_and_degraded() {
        let metrics = MetricsAggregator::new();
        let mut hit = decision(false, None, 1);
        hit.from_cache = true;
        let mut degraded = decision(false, None, 1);
        degraded.degraded = true;

        metrics.record(&hit);
        metrics.record(&degraded);

        let snap = metrics.snapshot();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_hit_rate, 0.5);
        assert_eq!(snap.degraded_responses, 1);
    }

    #[test]
    fn test_cached_block_does_not_trigger_rule() {
        let metrics = MetricsAggregator::new();
        metrics.record(&decision(true, Some("CMD_001"), 3));
        let mut replay = decision(true, Some("CMD_001"), 1);
        replay.from_cache = true;
        metrics.record(&replay);

        let snap = metrics.snapshot();
        assert_eq!(snap.blocked_requests, 2);
        assert_eq!(snap.rule_triggers.get("CMD_001"), Some(&1));
    }

    #[test]
    fn test_rejections_outside_total() {
        let metrics = MetricsAggregator::new();
        metrics.record_rejection();
        metrics.record_audit_error();

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.allowed_requests + snap.blocked_requests, 0);
        assert_eq!(snap.block_rate, 0.0);
        assert_eq!(snap.avg_latency_ms, 0.0);
        assert_eq!(snap.rejected_requests, 1);
        assert_eq!(snap.audit_write_errors, 1);
    }

    #[test]
    fn test_reset() {
        let metrics = MetricsAggregator::new();
        metrics.record(&decision(true, Some("R1"), 5));
        metrics.reset();

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert!(snap.rule_triggers.is_empty());
    }

    #[test]
    fn test_concurrent_records_not_lost() {
        let metrics = Arc::new(MetricsAggregator::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        metrics.record(&decision(i % 4 == 0, Some("R1"), 1));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 8000);
        assert_eq!(snap.blocked_requests, 2000);
        assert_eq!(snap.blocked_requests + snap.allowed_requests, snap.total_requests);
        assert_eq!(snap.block_rate, 0.25);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = MetricsAggregator::new();
        metrics.record(&decision(true, Some("CMD_001"), 4));

        let output = metrics.snapshot().to_prometheus();

        assert!(output.contains("promptgate_requests_total 1"));
        assert!(output.contains("promptgate_rule_triggers_total{rule_id=\"CMD_001\"} 1"));
        assert!(output.contains("promptgate_block_rate 1"));
    }
}
