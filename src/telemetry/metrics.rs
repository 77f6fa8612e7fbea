use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::domain::DenyReason;

use super::span::SpanOutcome;

/// Latency statistics for one operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub min: Duration,
    pub max: Duration,
    pub total: Duration,
}

impl LatencyStats {
    fn first(latency: Duration) -> Self {
        LatencyStats {
            count: 1,
            min: latency,
            max: latency,
            total: latency,
        }
    }

    fn observe(&mut self, latency: Duration) {
        self.count += 1;
        self.min = self.min.min(latency);
        self.max = self.max.max(latency);
        self.total += latency;
    }

    pub fn avg(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Metrics registry for guarded invocations.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Total guarded invocations (one per closed span)
    pub invocations_total: AtomicU64,

    /// Invocations by outcome
    pub invocations_allowed: AtomicU64,
    pub invocations_denied: AtomicU64,
    pub invocations_error: AtomicU64,
    pub invocations_cancelled: AtomicU64,

    /// Denials by reason
    pub denied_rate_limit: AtomicU64,
    pub denied_circuit_open: AtomicU64,
    pub denied_circuit_probe: AtomicU64,
    pub denied_duplicate: AtomicU64,
    pub denied_access: AtomicU64,
    pub denied_misconfigured: AtomicU64,

    /// Invocation latency buckets
    pub latency_under_1ms: AtomicU64,
    pub latency_1_5ms: AtomicU64,
    pub latency_5_10ms: AtomicU64,
    pub latency_10_50ms: AtomicU64,
    pub latency_50_100ms: AtomicU64,
    pub latency_over_100ms: AtomicU64,

    /// Guard configuration errors seen on the call path
    pub config_errors_total: AtomicU64,

    /// Span sink failures (swallowed)
    pub telemetry_errors_total: AtomicU64,

    /// Configuration reloads
    pub config_reloads_total: AtomicU64,
    pub config_reload_errors: AtomicU64,

    /// Per-operation latency (min/max/avg)
    operation_latency: Mutex<HashMap<String, LatencyStats>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        MetricsRegistry::default()
    }

    /// Record one finished invocation.
    pub fn record_invocation(&self, operation_id: &str, outcome: SpanOutcome, latency: Duration) {
        self.invocations_total.fetch_add(1, Ordering::Relaxed);

        let counter = match outcome {
            SpanOutcome::Allowed => &self.invocations_allowed,
            SpanOutcome::Denied => &self.invocations_denied,
            SpanOutcome::Error => &self.invocations_error,
            SpanOutcome::Cancelled => &self.invocations_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.record_latency(latency);

        let mut stats = self.operation_latency.lock();
        match stats.get_mut(operation_id) {
            Some(entry) => entry.observe(latency),
            None => {
                stats.insert(operation_id.to_string(), LatencyStats::first(latency));
            }
        }
    }

    pub fn record_denial(&self, reason: DenyReason) {
        let counter = match reason {
            DenyReason::RateLimitExceeded => &self.denied_rate_limit,
            DenyReason::CircuitOpen => &self.denied_circuit_open,
            DenyReason::CircuitProbeInFlight => &self.denied_circuit_probe,
            DenyReason::DuplicateInvocation => &self.denied_duplicate,
            DenyReason::AccessDenied => &self.denied_access,
            DenyReason::GuardMisconfigured => &self.denied_misconfigured,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_config_error(&self) {
        self.config_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_telemetry_error(&self) {
        self.telemetry_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_config_reload(&self, success: bool) {
        self.config_reloads_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.config_reload_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_latency(&self, latency: Duration) {
        let micros = latency.as_micros() as u64;

        let bucket = if micros < 1000 {
            &self.latency_under_1ms
        } else if micros < 5000 {
            &self.latency_1_5ms
        } else if micros < 10000 {
            &self.latency_5_10ms
        } else if micros < 50000 {
            &self.latency_10_50ms
        } else if micros < 100000 {
            &self.latency_50_100ms
        } else {
            &self.latency_over_100ms
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    /// Latency statistics for an operation, if it has been invoked.
    pub fn latency_stats(&self, operation_id: &str) -> Option<LatencyStats> {
        self.operation_latency.lock().get(operation_id).copied()
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let mut out = format!(
            r#"# HELP guarded_invocations_total Total guarded invocations
# TYPE guarded_invocations_total counter
guarded_invocations_total {}

# HELP guarded_invocations Guarded invocations by outcome
# TYPE guarded_invocations counter
guarded_invocations{{outcome="allowed"}} {}
guarded_invocations{{outcome="denied"}} {}
guarded_invocations{{outcome="error"}} {}
guarded_invocations{{outcome="cancelled"}} {}

# HELP guarded_denials Guard denials by reason
# TYPE guarded_denials counter
guarded_denials{{reason="rate_limit_exceeded"}} {}
guarded_denials{{reason="circuit_open"}} {}
guarded_denials{{reason="circuit_probe_in_flight"}} {}
guarded_denials{{reason="duplicate_invocation"}} {}
guarded_denials{{reason="access_denied"}} {}
guarded_denials{{reason="guard_misconfigured"}} {}

# HELP guarded_latency_bucket Guarded invocation latency histogram
# TYPE guarded_latency_bucket counter
guarded_latency_bucket{{le="0.001"}} {}
guarded_latency_bucket{{le="0.005"}} {}
guarded_latency_bucket{{le="0.01"}} {}
guarded_latency_bucket{{le="0.05"}} {}
guarded_latency_bucket{{le="0.1"}} {}
guarded_latency_bucket{{le="+Inf"}} {}

# HELP guarded_config_errors_total Guard configuration errors on the call path
# TYPE guarded_config_errors_total counter
guarded_config_errors_total {}

# HELP guarded_telemetry_errors_total Span sink failures
# TYPE guarded_telemetry_errors_total counter
guarded_telemetry_errors_total {}

# HELP guarded_config_reloads_total Guard configuration reloads
# TYPE guarded_config_reloads_total counter
guarded_config_reloads_total {}

# HELP guarded_config_reload_errors_total Guard configuration reload errors
# TYPE guarded_config_reload_errors_total counter
guarded_config_reload_errors_total {}
"#,
            self.invocations_total.load(Ordering::Relaxed),
            self.invocations_allowed.load(Ordering::Relaxed),
            self.invocations_denied.load(Ordering::Relaxed),
            self.invocations_error.load(Ordering::Relaxed),
            self.invocations_cancelled.load(Ordering::Relaxed),
            self.denied_rate_limit.load(Ordering::Relaxed),
            self.denied_circuit_open.load(Ordering::Relaxed),
            self.denied_circuit_probe.load(Ordering::Relaxed),
            self.denied_duplicate.load(Ordering::Relaxed),
            self.denied_access.load(Ordering::Relaxed),
            self.denied_misconfigured.load(Ordering::Relaxed),
            self.latency_under_1ms.load(Ordering::Relaxed),
            self.latency_1_5ms.load(Ordering::Relaxed),
            self.latency_5_10ms.load(Ordering::Relaxed),
            self.latency_10_50ms.load(Ordering::Relaxed),
            self.latency_50_100ms.load(Ordering::Relaxed),
            self.latency_over_100ms.load(Ordering::Relaxed),
            self.config_errors_total.load(Ordering::Relaxed),
            self.telemetry_errors_total.load(Ordering::Relaxed),
            self.config_reloads_total.load(Ordering::Relaxed),
            self.config_reload_errors.load(Ordering::Relaxed),
        );

        let stats = self.operation_latency.lock();
        if !stats.is_empty() {
            let mut operations: Vec<_> = stats.iter().collect();
            operations.sort_by(|a, b| a.0.cmp(b.0));

            out.push_str(
                "\n# HELP guarded_operation_latency_seconds Derived latency per operation\n\
                 # TYPE guarded_operation_latency_seconds gauge\n",
            );
            for (operation, s) in operations {
                for (stat, value) in [("min", s.min), ("max", s.max), ("avg", s.avg())] {
                    let _ = writeln!(
                        out,
                        "guarded_operation_latency_seconds{{operation=\"{}\",stat=\"{}\"}} {}",
                        operation,
                        stat,
                        value.as_secs_f64()
                    );
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_invocation() {
        let metrics = MetricsRegistry::new();

        metrics.record_invocation("op", SpanOutcome::Allowed, Duration::from_micros(10));
        metrics.record_invocation("op", SpanOutcome::Allowed, Duration::from_micros(10));
        metrics.record_invocation("op", SpanOutcome::Denied, Duration::from_micros(10));

        assert_eq!(metrics.invocations_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.invocations_allowed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.invocations_denied.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.latency_under_1ms.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_latency_stats() {
        let metrics = MetricsRegistry::new();

        metrics.record_invocation("op", SpanOutcome::Allowed, Duration::from_millis(2));
        metrics.record_invocation("op", SpanOutcome::Error, Duration::from_millis(6));

        let stats = metrics.latency_stats("op").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, Duration::from_millis(2));
        assert_eq!(stats.max, Duration::from_millis(6));
        assert_eq!(stats.avg(), Duration::from_millis(4));
        assert!(metrics.latency_stats("other").is_none());
    }

    #[test]
    fn test_latency_avg_with_count_beyond_u32() {
        let stats = LatencyStats {
            count: 1 << 32,
            min: Duration::from_millis(1),
            max: Duration::from_millis(3),
            total: Duration::from_millis(2) * (1 << 16) * (1 << 16),
        };

        assert_eq!(stats.avg(), Duration::from_millis(2));

        let stats = LatencyStats {
            count: (1 << 32) + 1,
            ..stats
        };
        assert!(stats.avg() < Duration::from_millis(2));
    }

    #[test]
    fn test_record_denial() {
        let metrics = MetricsRegistry::new();

        metrics.record_denial(DenyReason::RateLimitExceeded);
        metrics.record_denial(DenyReason::CircuitOpen);
        metrics.record_denial(DenyReason::CircuitOpen);

        assert_eq!(metrics.denied_rate_limit.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.denied_circuit_open.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = MetricsRegistry::new();
        metrics.record_invocation("orders.place", SpanOutcome::Allowed, Duration::from_millis(1));
        metrics.record_denial(DenyReason::DuplicateInvocation);

        let output = metrics.to_prometheus();

        assert!(output.contains("guarded_invocations_total 1"));
        assert!(output.contains("guarded_invocations{outcome=\"allowed\"} 1"));
        assert!(output.contains("guarded_denials{reason=\"duplicate_invocation\"} 1"));
        assert!(output.contains(
            "guarded_operation_latency_seconds{operation=\"orders.place\",stat=\"max\"} 0.001"
        ));
    }
}
