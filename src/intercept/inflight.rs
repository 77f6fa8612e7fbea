use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, Span};

use crate::domain::{CallOutcome, GuardDefinition};
use crate::policy::{Evaluation, PolicyEngine};
use crate::state::StateSummary;
use crate::telemetry::{GuardSpan, SpanOutcome, ATTR_CALL_ERROR, ATTR_STATE};

/// One guard's decision as recorded in `guard.decisions`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DecisionEntry<'a> {
    pub guard: &'a str,
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

pub(crate) type Admitted = SmallVec<[(Arc<GuardDefinition>, Evaluation); 4]>;

/// Feed `outcome` to admitted guards, innermost first.
pub(crate) fn record_all(
    engine: &PolicyEngine,
    admitted: &Admitted,
    outcome: CallOutcome,
    states: &mut BTreeMap<String, StateSummary>,
) {
    for (guard, evaluation) in admitted.iter().rev() {
        if let Some(summary) = engine.record(guard, evaluation, outcome) {
            states.insert(guard.id.clone(), summary);
        }
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// A call that passed its guards and has not reported back yet.
///
/// Dropping it unfinished records `Cancelled`, or `Failure` while a panic
/// unwinds, and closes the span.
pub(crate) struct InFlight {
    engine: PolicyEngine,
    admitted: Admitted,
    states: BTreeMap<String, StateSummary>,
    span: Option<GuardSpan>,
}

impl InFlight {
    pub fn new(
        engine: PolicyEngine,
        admitted: Admitted,
        states: BTreeMap<String, StateSummary>,
        span: GuardSpan,
    ) -> Self {
        InFlight {
            engine,
            admitted,
            states,
            span: Some(span),
        }
    }

    pub fn span(&self) -> Span {
        match &self.span {
            Some(span) => span.span().clone(),
            None => Span::none(),
        }
    }

    pub fn complete(mut self, outcome: CallOutcome, call_error: Option<&'static str>) {
        self.finish(outcome, call_error);
    }

    fn finish(&mut self, outcome: CallOutcome, call_error: Option<&'static str>) {
        let Some(mut span) = self.span.take() else {
            return;
        };

        record_all(&self.engine, &self.admitted, outcome, &mut self.states);

        if !self.states.is_empty() {
            span.set(ATTR_STATE, to_json(&self.states));
        }
        if let Some(error) = call_error {
            span.set(ATTR_CALL_ERROR, error);
        }

        let span_outcome = match outcome {
            CallOutcome::Success => SpanOutcome::Allowed,
            CallOutcome::Failure => SpanOutcome::Error,
            CallOutcome::Cancelled => SpanOutcome::Cancelled,
            // Released is only fed to guards of a denied call, whose span
            // closes as denied before an InFlight exists
            CallOutcome::Released => SpanOutcome::Denied,
        };

        debug!(
            guards = self.admitted.len(),
            outcome = outcome.as_str(),
            "Guarded call finished"
        );

        span.end(span_outcome);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let outcome = if std::thread::panicking() {
            CallOutcome::Failure
        } else {
            CallOutcome::Cancelled
        };
        let call_error = if outcome == CallOutcome::Failure {
            Some("panic")
        } else {
            None
        };
        self.finish(outcome, call_error);
    }
}
