use chrono::NaiveDate;
use tracing::Span;

use crate::domain::Severity;

use super::span::{ATTR_CONDITION, ATTR_ENVIRONMENT, ATTR_FILTERS, ATTR_SEVERITY, ATTR_SINCE};

/// Guard metadata attached from inside a guarded call.
///
/// ```no_run
/// use guarded::telemetry::GuardAnnotation;
/// use guarded::domain::Severity;
///
/// GuardAnnotation::for_condition("avg_latency < 500")
///     .in_environment("prod")
///     .at_severity(Severity::Fatal)
///     .apply();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardAnnotation {
    condition: Option<String>,
    environment: Option<String>,
    severity: Option<Severity>,
    filters: Vec<String>,
    since: Option<NaiveDate>,
}

impl GuardAnnotation {
    pub fn new() -> Self {
        GuardAnnotation::default()
    }

    pub fn for_condition(condition: impl Into<String>) -> Self {
        GuardAnnotation {
            condition: Some(condition.into()),
            ..Default::default()
        }
    }

    pub fn in_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn at_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn since(mut self, date: NaiveDate) -> Self {
        self.since = Some(date);
        self
    }

    /// Attributes this annotation sets, in a stable order.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = Vec::new();
        if let Some(severity) = self.severity {
            attrs.push((ATTR_SEVERITY, severity.as_str().to_string()));
        }
        if let Some(since) = self.since {
            attrs.push((ATTR_SINCE, since.to_string()));
        }
        if let Some(condition) = &self.condition {
            attrs.push((ATTR_CONDITION, condition.clone()));
        }
        if let Some(environment) = &self.environment {
            attrs.push((ATTR_ENVIRONMENT, environment.clone()));
        }
        if !self.filters.is_empty() {
            attrs.push((ATTR_FILTERS, self.filters.join(",")));
        }
        attrs
    }

    /// Record onto the current span (the guarded span while inside a call).
    pub fn apply(&self) {
        self.apply_to(&Span::current());
    }

    pub fn apply_to(&self, span: &Span) {
        for (key, value) in self.attributes() {
            span.record(key, value.as_str());
        }
    }
}
