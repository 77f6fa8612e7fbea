pub mod annotation;
pub mod metrics;
pub mod span;
pub mod tracing;

pub use annotation::GuardAnnotation;
pub use metrics::{LatencyStats, MetricsRegistry};
pub use span::{
    GuardSpan, MemorySink, SpanOutcome, SpanRecord, SpanSink, TelemetryEmitter, ATTR_CALL_ERROR,
    ATTR_CONDITION, ATTR_CONFIG_ERROR, ATTR_DECISIONS, ATTR_ENVIRONMENT, ATTR_FILTERS,
    ATTR_GUARD_IDS, ATTR_LATENCY_MS, ATTR_OUTCOME, ATTR_SEVERITY, ATTR_SINCE, ATTR_STATE,
};
pub use self::tracing::{init_json_tracing, init_tracing};
