pub mod access_gate;
pub mod circuit_breaker;
pub mod dedup;
pub mod rate_limit;
pub mod traits;

pub use access_gate::{AccessGatePolicy, GateAction};
pub use circuit_breaker::CircuitBreakerPolicy;
pub use dedup::DedupPolicy;
pub use rate_limit::RateLimitPolicy;
pub use traits::{Admission, GuardPolicy, Verdict};

use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{
    CallOutcome, Decision, DenyReason, FailMode, GuardDefinition, GuardKey, InvocationContext,
    PolicyKind,
};
use crate::error::ConfigurationError;
use crate::state::{GuardState, StateStore, StateSummary};

/// Result of evaluating one guard for one call.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub key: GuardKey,
    pub decision: Decision,
    /// Token to hand back to [`PolicyEngine::record`]
    pub admission: Admission,
    /// State right after evaluation (absent for stateless or misconfigured guards)
    pub summary: Option<StateSummary>,
    pub config_error: Option<ConfigurationError>,
}

/// Evaluates guard definitions against the state store.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    store: Arc<StateStore>,
}

impl PolicyEngine {
    pub fn new(store: Arc<StateStore>) -> Self {
        PolicyEngine { store }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Evaluate a guard for a call.
    ///
    /// Never fails: a guard that cannot be applied yields a configuration
    /// error and a decision taken from its fail mode.
    pub fn evaluate(&self, definition: &GuardDefinition, ctx: &InvocationContext) -> Evaluation {
        let key = definition.key_for(ctx.discriminant());
        let policy = definition.policy.as_policy();

        if let Err(detail) = policy.validate(ctx) {
            let error = ConfigurationError::new(&ctx.operation_id, Some(&definition.id), detail);
            warn!(
                guard = %definition.id,
                operation = %ctx.operation_id,
                fail_mode = ?definition.fail_mode,
                error = %error,
                "Guard misconfigured"
            );

            let decision = match definition.fail_mode {
                FailMode::Open => Decision::Allow,
                FailMode::Closed => Decision::Deny(DenyReason::GuardMisconfigured),
            };

            return Evaluation {
                key,
                decision,
                admission: Admission::None,
                summary: None,
                config_error: Some(error),
            };
        }

        // Access gates are pure: no store entry per key
        if definition.kind() == PolicyKind::AccessGate {
            let mut state = GuardState::Stateless;
            let verdict = policy.evaluate(ctx, &mut state, self.store.clock().now());
            return Self::from_verdict(key, verdict, None);
        }

        let (verdict, summary) =
            self.store
                .mutate_retaining(&key, definition.kind(), |state, now| {
                    let verdict = policy.evaluate(ctx, state, now);
                    ((verdict, state.summary(now)), policy.retain_until(state))
                });

        Self::from_verdict(key, verdict, Some(summary))
    }

    /// Feed a call outcome back to the guard that admitted it.
    ///
    /// Returns the state summary after the update. Feedback is dropped when
    /// the key's state is gone or now belongs to a different policy kind.
    pub fn record(
        &self,
        definition: &GuardDefinition,
        evaluation: &Evaluation,
        outcome: CallOutcome,
    ) -> Option<StateSummary> {
        if evaluation.admission == Admission::None {
            return evaluation.summary.clone();
        }

        let policy = definition.policy.as_policy();
        let summary = self
            .store
            .mutate_existing(&evaluation.key, definition.kind(), |state, now| {
                policy.record(&evaluation.admission, outcome, state, now);
                (state.summary(now), policy.retain_until(state))
            });

        if summary.is_none() {
            debug!(
                guard = %definition.id,
                outcome = outcome.as_str(),
                "Dropped outcome for replaced guard state"
            );
        }

        summary
    }

    fn from_verdict(key: GuardKey, verdict: Verdict, summary: Option<StateSummary>) -> Evaluation {
        let (decision, admission) = match verdict {
            Verdict::Admit(admission) => (Decision::Allow, admission),
            Verdict::Deny(reason) => (Decision::Deny(reason), Admission::None),
        };

        Evaluation {
            key,
            decision,
            admission,
            summary,
            config_error: None,
        }
    }
}
