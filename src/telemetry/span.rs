use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{field, info_span, warn, Span};
use uuid::Uuid;

use crate::domain::{InvocationContext, OperationBinding, SpanKind};
use crate::error::TelemetryEmissionError;

use super::metrics::MetricsRegistry;

pub const ATTR_GUARD_IDS: &str = "guard.ids";
pub const ATTR_DECISIONS: &str = "guard.decisions";
pub const ATTR_STATE: &str = "guard.state";
pub const ATTR_OUTCOME: &str = "guard.outcome";
pub const ATTR_LATENCY_MS: &str = "guard.latency_ms";
pub const ATTR_CALL_ERROR: &str = "guard.call_error";
pub const ATTR_CONFIG_ERROR: &str = "guard.config_error";
pub const ATTR_SEVERITY: &str = "guard.severity";
pub const ATTR_SINCE: &str = "guard.since";
pub const ATTR_CONDITION: &str = "guard.condition";
pub const ATTR_ENVIRONMENT: &str = "guard.environment";
pub const ATTR_FILTERS: &str = "guard.filters";

/// How a guarded invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanOutcome {
    Allowed,
    Denied,
    Error,
    Cancelled,
}

impl SpanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanOutcome::Allowed => "allowed",
            SpanOutcome::Denied => "denied",
            SpanOutcome::Error => "error",
            SpanOutcome::Cancelled => "cancelled",
        }
    }
}

/// A closed span as handed to [`SpanSink`]s.
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub invocation_id: Uuid,
    pub operation_id: String,
    pub name: String,
    pub kind: SpanKind,
    pub outcome: SpanOutcome,
    pub latency: Duration,
    pub attributes: BTreeMap<String, String>,
}

impl SpanRecord {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Destination for closed span records, next to the `tracing` span itself.
pub trait SpanSink: Send + Sync {
    fn name(&self) -> &str;

    fn export(&self, record: &SpanRecord) -> anyhow::Result<()>;
}

/// Sink keeping every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<SpanRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn records(&self) -> Vec<SpanRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl SpanSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn export(&self, record: &SpanRecord) -> anyhow::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
struct EmitterInner {
    sinks: Vec<Arc<dyn SpanSink>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

/// Opens, annotates and closes one span per guarded invocation.
#[derive(Clone, Default)]
pub struct TelemetryEmitter {
    inner: Arc<EmitterInner>,
}

impl std::fmt::Debug for TelemetryEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sinks: Vec<&str> = self.inner.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("TelemetryEmitter")
            .field("sinks", &sinks)
            .field("metrics", &self.inner.metrics.is_some())
            .finish()
    }
}

impl TelemetryEmitter {
    pub fn new(sinks: Vec<Arc<dyn SpanSink>>, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        TelemetryEmitter {
            inner: Arc::new(EmitterInner { sinks, metrics }),
        }
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsRegistry>> {
        self.inner.metrics.as_ref()
    }

    /// Open the span for a call.
    ///
    /// With `create_new_span` off the caller's current span is annotated
    /// instead; attributes it does not declare are only seen by sinks.
    pub fn start_span(&self, ctx: &InvocationContext, binding: &OperationBinding) -> GuardSpan {
        let name = binding.span_name(&ctx.operation_id).to_string();

        let span = if binding.create_new_span {
            info_span!(
                target: "guarded",
                "guarded",
                otel.name = %name,
                otel.kind = binding.span_kind.as_str(),
                operation = %ctx.operation_id,
                invocation_id = %ctx.invocation_id,
                guard.ids = field::Empty,
                guard.decisions = field::Empty,
                guard.state = field::Empty,
                guard.outcome = field::Empty,
                guard.latency_ms = field::Empty,
                guard.call_error = field::Empty,
                guard.config_error = field::Empty,
                guard.severity = field::Empty,
                guard.since = field::Empty,
                guard.condition = field::Empty,
                guard.environment = field::Empty,
                guard.filters = field::Empty,
            )
        } else {
            Span::current()
        };

        GuardSpan {
            emitter: self.clone(),
            span,
            invocation_id: ctx.invocation_id,
            operation_id: ctx.operation_id.clone(),
            name,
            kind: binding.span_kind,
            attributes: BTreeMap::new(),
            started: Instant::now(),
            ended: false,
        }
    }

    pub fn annotate<I, V>(&self, span: &mut GuardSpan, attributes: I)
    where
        I: IntoIterator<Item = (&'static str, V)>,
        V: Into<String>,
    {
        for (key, value) in attributes {
            span.set(key, value);
        }
    }

    pub fn end_span(&self, span: GuardSpan, outcome: SpanOutcome) {
        span.end(outcome);
    }

    fn export(&self, record: &SpanRecord) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_invocation(&record.operation_id, record.outcome, record.latency);
        }

        for sink in &self.inner.sinks {
            let result = catch_unwind(AssertUnwindSafe(|| sink.export(record)));
            let detail = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "sink panicked".to_string(),
            };

            let error = TelemetryEmissionError {
                sink: sink.name().to_string(),
                detail,
            };
            warn!(
                operation = %record.operation_id,
                error = %error,
                "Span export failed"
            );
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_telemetry_error();
            }
        }
    }
}

/// Span of one guarded invocation.
///
/// Closes exactly once: through [`GuardSpan::end`], or as `cancelled` when
/// dropped unended.
pub struct GuardSpan {
    emitter: TelemetryEmitter,
    span: Span,
    invocation_id: Uuid,
    operation_id: String,
    name: String,
    kind: SpanKind,
    attributes: BTreeMap<String, String>,
    started: Instant,
    ended: bool,
}

impl std::fmt::Debug for GuardSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardSpan")
            .field("operation_id", &self.operation_id)
            .field("name", &self.name)
            .field("ended", &self.ended)
            .finish()
    }
}

impl GuardSpan {
    /// The underlying `tracing` span, entered around the wrapped call.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<String>) {
        let value = value.into();
        self.span.record(key, value.as_str());
        self.attributes.insert(key.to_string(), value);
    }

    pub fn end(mut self, outcome: SpanOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: SpanOutcome) {
        if self.ended {
            return;
        }
        self.ended = true;

        let latency = self.started.elapsed();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.span.record(ATTR_OUTCOME, outcome.as_str());
        self.span.record(ATTR_LATENCY_MS, latency_ms);
        self.attributes
            .insert(ATTR_OUTCOME.to_string(), outcome.as_str().to_string());
        self.attributes
            .insert(ATTR_LATENCY_MS.to_string(), format!("{:.3}", latency_ms));

        let record = SpanRecord {
            invocation_id: self.invocation_id,
            operation_id: std::mem::take(&mut self.operation_id),
            name: std::mem::take(&mut self.name),
            kind: self.kind,
            outcome,
            latency,
            attributes: std::mem::take(&mut self.attributes),
        };
        self.emitter.export(&record);
    }
}

impl Drop for GuardSpan {
    fn drop(&mut self) {
        self.finish(SpanOutcome::Cancelled);
    }
}
