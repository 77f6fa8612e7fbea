//! Interception layer: resolve, evaluate, invoke, record.
//!
//! Every attempt produces exactly one closed span, whether the call is
//! denied, succeeds, fails, panics or is cancelled.

mod inflight;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, Instrument};

use crate::clock::{Clock, SystemClock};
use crate::domain::{CallOutcome, Decision, GuardDefinition, InvocationContext};
use crate::error::{GuardError, GuardRejected};
use crate::policy::PolicyEngine;
use crate::resolver::ConfigResolver;
use crate::state::{StateStore, StateSummary};
use crate::telemetry::{
    GuardSpan, MetricsRegistry, SpanOutcome, SpanSink, TelemetryEmitter, ATTR_CONDITION,
    ATTR_CONFIG_ERROR, ATTR_DECISIONS, ATTR_ENVIRONMENT, ATTR_FILTERS, ATTR_GUARD_IDS,
    ATTR_SEVERITY, ATTR_SINCE, ATTR_STATE,
};

use inflight::{record_all, to_json, Admitted, DecisionEntry, InFlight};

/// Wraps calls in their configured guards.
#[derive(Debug, Clone)]
pub struct Interceptor {
    resolver: Arc<ConfigResolver>,
    engine: PolicyEngine,
    emitter: TelemetryEmitter,
    clock: Arc<dyn Clock>,
    enabled: bool,
}

impl Interceptor {
    pub fn builder(resolver: Arc<ConfigResolver>) -> InterceptorBuilder {
        InterceptorBuilder::new(resolver)
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<StateStore> {
        self.engine.store()
    }

    pub fn emitter(&self) -> &TelemetryEmitter {
        &self.emitter
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsRegistry>> {
        self.emitter.metrics()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run `call` under the guards bound to `operation_id`.
    pub fn guard<T, E, F>(
        &self,
        operation_id: &str,
        discriminant: Option<&str>,
        call: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut ctx = InvocationContext::new(operation_id);
        ctx.discriminant = discriminant.map(str::to_string);
        self.guard_with(&ctx, call)
    }

    /// Like [`Interceptor::guard`], with a caller-built context.
    pub fn guard_with<T, E, F>(&self, ctx: &InvocationContext, call: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.enabled {
            return call().map_err(GuardError::Call);
        }

        let inflight = self.begin(ctx)?;
        let result = inflight.span().in_scope(call);

        match result {
            Ok(value) => {
                inflight.complete(CallOutcome::Success, None);
                Ok(value)
            }
            Err(e) => {
                inflight.complete(CallOutcome::Failure, Some(std::any::type_name::<E>()));
                Err(GuardError::Call(e))
            }
        }
    }

    /// Run an async call under its guards.
    ///
    /// `call` is only invoked once every guard admits. Dropping the returned
    /// future before it completes reports the call as cancelled.
    pub async fn guard_async<T, E, F, Fut>(
        &self,
        ctx: InvocationContext,
        call: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return call().await.map_err(GuardError::Call);
        }

        let inflight = self.begin(&ctx)?;
        let span = inflight.span();
        let result = call().instrument(span).await;

        match result {
            Ok(value) => {
                inflight.complete(CallOutcome::Success, None);
                Ok(value)
            }
            Err(e) => {
                inflight.complete(CallOutcome::Failure, Some(std::any::type_name::<E>()));
                Err(GuardError::Call(e))
            }
        }
    }

    /// Resolve and evaluate guards for a call.
    ///
    /// Evaluation stops at the first denial; guards that had already
    /// admitted the call are released innermost first.
    fn begin(&self, ctx: &InvocationContext) -> Result<InFlight, GuardRejected> {
        let resolution = self.resolver.resolve(&ctx.operation_id);
        let mut span = self.emitter.start_span(ctx, &resolution.binding);
        let metrics = self.emitter.metrics();

        let mut config_errors: Vec<String> =
            resolution.errors.iter().map(|e| e.to_string()).collect();
        if let Some(metrics) = metrics {
            for _ in &resolution.errors {
                metrics.record_config_error();
            }
        }

        let today = self.clock.today();
        let active: Vec<&Arc<GuardDefinition>> = resolution
            .guards
            .iter()
            .filter(|guard| guard.is_active_on(today))
            .collect();

        if !active.is_empty() {
            let ids: Vec<&str> = active.iter().map(|g| g.id.as_str()).collect();
            span.set(ATTR_GUARD_IDS, ids.join(","));
            record_metadata(&mut span, &active);
        }

        let mut admitted = Admitted::new();
        let mut decisions = Vec::with_capacity(active.len());
        let mut states: BTreeMap<String, StateSummary> = BTreeMap::new();

        for guard in active {
            let evaluation = self.engine.evaluate(guard, ctx);

            if let Some(error) = &evaluation.config_error {
                config_errors.push(error.to_string());
                if let Some(metrics) = metrics {
                    metrics.record_config_error();
                }
            }
            if let Some(summary) = &evaluation.summary {
                states.insert(guard.id.clone(), summary.clone());
            }

            decisions.push(DecisionEntry {
                guard: &guard.id,
                decision: if evaluation.decision.is_allowed() { "allow" } else { "deny" },
                reason: evaluation.decision.reason().map(|r| r.as_str()),
            });

            let decision = evaluation.decision;
            match decision {
                Decision::Allow => admitted.push((guard.clone(), evaluation)),
                Decision::Deny(reason) => {
                    record_all(&self.engine, &admitted, CallOutcome::Released, &mut states);

                    span.set(ATTR_DECISIONS, to_json(&decisions));
                    if !states.is_empty() {
                        span.set(ATTR_STATE, to_json(&states));
                    }
                    if !config_errors.is_empty() {
                        span.set(ATTR_CONFIG_ERROR, config_errors.join("; "));
                    }
                    if let Some(metrics) = metrics {
                        metrics.record_denial(reason);
                    }

                    debug!(
                        operation = %ctx.operation_id,
                        guard = %guard.id,
                        reason = %reason,
                        "Call denied"
                    );

                    span.end(SpanOutcome::Denied);
                    return Err(GuardRejected::new(guard.id.as_str(), reason));
                }
            }
        }

        if !decisions.is_empty() {
            span.set(ATTR_DECISIONS, to_json(&decisions));
        }
        if !config_errors.is_empty() {
            span.set(ATTR_CONFIG_ERROR, config_errors.join("; "));
        }

        Ok(InFlight::new(self.engine.clone(), admitted, states, span))
    }
}

/// Record reporting metadata as `id=value` pairs for the guards that carry it.
fn record_metadata(span: &mut GuardSpan, guards: &[&Arc<GuardDefinition>]) {
    if let Some(v) = joined(guards, |g| Some(g.severity.as_str().to_string())) {
        span.set(ATTR_SEVERITY, v);
    }
    if let Some(v) = joined(guards, |g| g.since.map(|d| d.to_string())) {
        span.set(ATTR_SINCE, v);
    }
    if let Some(v) = joined(guards, |g| g.condition.clone()) {
        span.set(ATTR_CONDITION, v);
    }
    if let Some(v) = joined(guards, |g| g.environment.clone()) {
        span.set(ATTR_ENVIRONMENT, v);
    }
    if let Some(v) = joined(guards, |g| (!g.filters.is_empty()).then(|| g.filters.join("|"))) {
        span.set(ATTR_FILTERS, v);
    }
}

fn joined<F>(guards: &[&Arc<GuardDefinition>], value: F) -> Option<String>
where
    F: Fn(&GuardDefinition) -> Option<String>,
{
    let pairs: Vec<String> = guards
        .iter()
        .filter_map(|guard| value(guard.as_ref()).map(|v| format!("{}={}", guard.id, v)))
        .collect();

    (!pairs.is_empty()).then(|| pairs.join(","))
}

/// Builds an [`Interceptor`].
pub struct InterceptorBuilder {
    resolver: Arc<ConfigResolver>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<StateStore>>,
    sinks: Vec<Arc<dyn SpanSink>>,
    metrics: Option<Arc<MetricsRegistry>>,
    enabled: bool,
}

impl InterceptorBuilder {
    pub fn new(resolver: Arc<ConfigResolver>) -> Self {
        InterceptorBuilder {
            resolver,
            clock: Arc::new(SystemClock),
            store: None,
            sinks: Vec::new(),
            metrics: None,
            enabled: true,
        }
    }

    /// Time source for policies and guard activation dates.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share an existing state store; its own clock is used for policies.
    pub fn store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn SpanSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn build(self) -> Interceptor {
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(StateStore::new(self.clock.clone())),
        };

        Interceptor {
            resolver: self.resolver,
            engine: PolicyEngine::new(store),
            emitter: TelemetryEmitter::new(self.sinks, self.metrics),
            clock: self.clock,
            enabled: self.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::{DenyReason, OperationBinding, PolicySpec};
    use crate::policy::{CircuitBreakerPolicy, DedupPolicy, RateLimitPolicy};
    use crate::resolver::GuardTable;
    use crate::telemetry::{MemorySink, ATTR_OUTCOME};
    use chrono::NaiveDate;
    use std::cell::Cell;
    use std::time::Duration;

    fn setup(table: GuardTable) -> (Interceptor, ManualClock, MemorySink) {
        crate::telemetry::tracing::init_test_tracing();
        let clock = ManualClock::new();
        let sink = MemorySink::new();
        let interceptor = Interceptor::builder(Arc::new(ConfigResolver::new(table)))
            .clock(Arc::new(clock.clone()))
            .sink(Arc::new(sink.clone()))
            .build();
        (interceptor, clock, sink)
    }

    fn rate_limit(id: &str, limit: u32) -> GuardDefinition {
        GuardDefinition::new(
            id,
            PolicySpec::RateLimit(RateLimitPolicy::new(limit, Duration::from_secs(60))),
        )
    }

    #[test]
    fn test_denied_call_not_invoked() {
        let table = GuardTable::empty()
            .with_guard(rate_limit("rl", 0).with_fail_mode(crate::domain::FailMode::Closed))
            .with_operation("op", OperationBinding::new(["rl"]));
        let (interceptor, _, sink) = setup(table);
        let invoked = Cell::new(false);

        let result: Result<(), GuardError<()>> = interceptor.guard("op", None, || {
            invoked.set(true);
            Ok(())
        });

        let rejection = result.unwrap_err().rejection().cloned().unwrap();
        assert_eq!(rejection.reason, DenyReason::GuardMisconfigured);
        assert!(!invoked.get());
        assert_eq!(sink.records()[0].outcome, SpanOutcome::Denied);
    }

    #[test]
    fn test_first_denial_short_circuits() {
        let gate = GuardDefinition::new(
            "gate",
            PolicySpec::AccessGate(crate::policy::AccessGatePolicy {
                deny: vec!["mallory".to_string()],
                ..Default::default()
            }),
        );
        let table = GuardTable::empty()
            .with_guard(gate)
            .with_guard(rate_limit("inner", 10))
            .with_operation("op", OperationBinding::new(["gate", "inner"]));
        let (interceptor, _, sink) = setup(table);

        let result: Result<(), GuardError<()>> = interceptor.guard("op", Some("mallory"), || Ok(()));

        assert_eq!(
            result.unwrap_err().rejection().unwrap().reason,
            DenyReason::AccessDenied
        );
        // Inner guard never evaluated, so it has no state yet
        assert!(interceptor.store().is_empty());
        let decisions = sink.records()[0].attribute(ATTR_DECISIONS).unwrap().to_string();
        assert!(decisions.contains("access_denied"));
        assert!(!decisions.contains("inner"));
    }

    #[test]
    fn test_released_slot_is_refunded() {
        let table = GuardTable::empty()
            .with_guard(rate_limit("outer", 2))
            .with_guard(GuardDefinition::new(
                "once",
                PolicySpec::Dedup(DedupPolicy::new(Duration::from_secs(60))),
            ))
            .with_operation("op", OperationBinding::new(["outer", "once"]));
        let (interceptor, _, _) = setup(table);

        let ok: Result<(), GuardError<()>> = interceptor.guard("op", Some("k"), || Ok(()));
        assert!(ok.is_ok());

        // Duplicate denied by the inner guard; outer slot is handed back
        let dup: Result<(), GuardError<()>> = interceptor.guard("op", Some("k"), || Ok(()));
        assert_eq!(
            dup.unwrap_err().rejection().unwrap().guard_id,
            "once".to_string()
        );

        let fresh: Result<(), GuardError<()>> = interceptor.guard("op", Some("k2"), || Ok(()));
        assert!(fresh.is_ok());
    }

    #[test]
    fn test_call_error_passes_through() {
        let table = GuardTable::empty()
            .with_guard(GuardDefinition::new(
                "cb",
                PolicySpec::CircuitBreaker(CircuitBreakerPolicy::new(5, Duration::from_secs(5))),
            ))
            .with_operation("op", OperationBinding::new(["cb"]));
        let (interceptor, _, sink) = setup(table);

        let result: Result<(), GuardError<std::io::Error>> = interceptor.guard("op", None, || {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        });

        let err = result.unwrap_err().into_call_error().unwrap();
        assert_eq!(err.to_string(), "disk full");

        let record = &sink.records()[0];
        assert_eq!(record.outcome, SpanOutcome::Error);
        assert_eq!(record.attribute(ATTR_OUTCOME), Some("error"));
        assert!(record.attribute(crate::telemetry::ATTR_CALL_ERROR).is_some());
        assert!(record.attribute(ATTR_STATE).unwrap().contains("consecutive_failures"));
    }

    #[test]
    fn test_unknown_guard_recorded_and_call_proceeds() {
        let table = GuardTable::empty().with_operation("op", OperationBinding::new(["ghost"]));
        let (interceptor, _, sink) = setup(table);

        let result: Result<u8, GuardError<()>> = interceptor.guard("op", None, || Ok(7));

        assert_eq!(result.unwrap(), 7);
        let record = &sink.records()[0];
        assert_eq!(record.outcome, SpanOutcome::Allowed);
        assert!(record.attribute(ATTR_CONFIG_ERROR).unwrap().contains("ghost"));
    }

    #[test]
    fn test_inactive_guard_skipped() {
        let table = GuardTable::empty()
            .with_guard(
                rate_limit("rl", 0)
                    .with_fail_mode(crate::domain::FailMode::Closed)
                    .with_since(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()),
            )
            .with_operation("op", OperationBinding::new(["rl"]));
        let (interceptor, clock, _) = setup(table);
        clock.set_today(NaiveDate::from_ymd_opt(2029, 12, 31).unwrap());

        let before: Result<(), GuardError<()>> = interceptor.guard("op", None, || Ok(()));
        assert!(before.is_ok());

        clock.set_today(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap());
        let after: Result<(), GuardError<()>> = interceptor.guard("op", None, || Ok(()));
        assert!(after.unwrap_err().is_rejected());
    }

    #[test]
    fn test_disabled_is_pass_through() {
        let table = GuardTable::empty()
            .with_guard(rate_limit("rl", 0).with_fail_mode(crate::domain::FailMode::Closed))
            .with_operation("op", OperationBinding::new(["rl"]));
        let sink = MemorySink::new();
        let interceptor = Interceptor::builder(Arc::new(ConfigResolver::new(table)))
            .sink(Arc::new(sink.clone()))
            .enabled(false)
            .build();

        let result: Result<u8, GuardError<()>> = interceptor.guard("op", None, || Ok(3));

        assert_eq!(result.unwrap(), 3);
        assert!(sink.is_empty());
        assert!(!interceptor.is_enabled());
    }

    #[test]
    fn test_metadata_attributes() {
        let mut guard = rate_limit("rl", 5);
        guard.condition = Some("p99 < 200".to_string());
        guard.filters = vec!["eu".to_string(), "us".to_string()];
        let table = GuardTable::empty()
            .with_guard(guard)
            .with_operation("op", OperationBinding::new(["rl"]));
        let (interceptor, _, sink) = setup(table);

        let _: Result<(), GuardError<()>> = interceptor.guard("op", None, || Ok(()));

        let record = &sink.records()[0];
        assert_eq!(record.attribute(ATTR_GUARD_IDS), Some("rl"));
        assert_eq!(record.attribute(ATTR_SEVERITY), Some("rl=WARN"));
        assert_eq!(record.attribute(ATTR_CONDITION), Some("rl=p99 < 200"));
        assert_eq!(record.attribute(ATTR_FILTERS), Some("rl=eu|us"));
        assert!(record.attribute(ATTR_DECISIONS).unwrap().contains("\"allow\""));
    }
}
