//! Circuit breaker policy.
//!
//! Closed admits everything and counts consecutive failures. Reaching
//! `failure_threshold` opens the circuit, which denies until `cooldown_ms`
//! has passed. The first call after the cooldown moves the circuit to
//! half-open and runs as the only probe: success closes the circuit,
//! failure reopens it with a fresh cooldown.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::domain::{CallOutcome, DenyReason, InvocationContext, PolicyKind};
use crate::state::{CircuitStatus, GuardState};

use super::traits::{Admission, GuardPolicy, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerPolicy {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe is allowed
    pub cooldown_ms: u64,

    /// Count cancelled calls (timeouts) as failures
    #[serde(default = "default_cancellation_is_failure")]
    pub cancellation_is_failure: bool,
}

fn default_cancellation_is_failure() -> bool {
    true
}

impl CircuitBreakerPolicy {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        CircuitBreakerPolicy {
            failure_threshold,
            cooldown_ms: cooldown.as_millis() as u64,
            cancellation_is_failure: true,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl GuardPolicy for CircuitBreakerPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::CircuitBreaker
    }

    fn validate(&self, _ctx: &InvocationContext) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("circuit breaker failure threshold must be at least 1".to_string());
        }
        if self.cooldown_ms == 0 {
            return Err("circuit breaker cooldown must be non-zero".to_string());
        }
        Ok(())
    }

    fn evaluate(&self, _ctx: &InvocationContext, state: &mut GuardState, now: Instant) -> Verdict {
        let GuardState::CircuitBreaker(circuit) = state else {
            return Verdict::Admit(Admission::None);
        };

        match circuit.status {
            CircuitStatus::Closed => Verdict::Admit(Admission::Circuit { probe: false }),
            CircuitStatus::Open => {
                if now.saturating_duration_since(circuit.last_transition) < self.cooldown() {
                    return Verdict::Deny(DenyReason::CircuitOpen);
                }
                circuit.transition(CircuitStatus::HalfOpen, now);
                circuit.probe_in_flight = true;
                Verdict::Admit(Admission::Circuit { probe: true })
            }
            CircuitStatus::HalfOpen => {
                if circuit.probe_in_flight {
                    return Verdict::Deny(DenyReason::CircuitProbeInFlight);
                }
                // Previous probe was released or cancelled without a verdict
                circuit.probe_in_flight = true;
                Verdict::Admit(Admission::Circuit { probe: true })
            }
        }
    }

    fn record(
        &self,
        admission: &Admission,
        outcome: CallOutcome,
        state: &mut GuardState,
        now: Instant,
    ) {
        let (GuardState::CircuitBreaker(circuit), Admission::Circuit { probe }) = (state, admission)
        else {
            return;
        };
        let is_probe = *probe && circuit.status == CircuitStatus::HalfOpen;

        let failed = match outcome {
            CallOutcome::Success => false,
            CallOutcome::Failure => true,
            CallOutcome::Cancelled if self.cancellation_is_failure => true,
            CallOutcome::Cancelled | CallOutcome::Released => {
                if is_probe {
                    circuit.probe_in_flight = false;
                }
                return;
            }
        };

        if is_probe {
            circuit.probe_in_flight = false;
            if failed {
                circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
                circuit.transition(CircuitStatus::Open, now);
            } else {
                circuit.consecutive_failures = 0;
                circuit.transition(CircuitStatus::Closed, now);
            }
            return;
        }

        match circuit.status {
            CircuitStatus::Closed if failed => {
                circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
                if circuit.consecutive_failures >= self.failure_threshold {
                    circuit.transition(CircuitStatus::Open, now);
                }
            }
            CircuitStatus::Closed => circuit.consecutive_failures = 0,
            // Late outcomes from calls admitted before the circuit opened
            CircuitStatus::Open | CircuitStatus::HalfOpen => {
                if failed {
                    circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
                }
            }
        }
    }
}
