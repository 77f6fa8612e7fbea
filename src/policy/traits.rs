use std::fmt::Debug;
use std::time::Instant;

use crate::domain::{CallOutcome, DenyReason, InvocationContext, PolicyKind};
use crate::state::GuardState;

/// What an admitting guard needs back when the call completes.
///
/// Ties `record` feedback to the exact window, probe or dedup entry that
/// admitted the call, so late outcomes cannot touch newer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Nothing to attribute (stateless or fail-open admission)
    None,
    /// Rate-limit slot in the window starting at `window_start`
    Window { window_start: Instant },
    /// Circuit breaker admission; `probe` marks the half-open probe
    Circuit { probe: bool },
    /// Dedup entry recorded for `discriminant`
    Dedup {
        discriminant: String,
        expires_at: Instant,
    },
}

/// Result of evaluating one policy against its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Admit(Admission),
    Deny(DenyReason),
}

/// A guard policy evaluated over per-key state.
///
/// `evaluate` and `record` are called with the key's state locked, so an
/// implementation sees and produces exactly one consistent mutation per
/// call. Neither may block or panic.
pub trait GuardPolicy: Send + Sync + Debug {
    fn kind(&self) -> PolicyKind;

    /// Check the policy parameters against this call.
    ///
    /// Returns a human-readable detail when the guard cannot be applied.
    fn validate(&self, ctx: &InvocationContext) -> Result<(), String>;

    /// Decide whether to admit the call, updating state for an admission.
    fn evaluate(&self, ctx: &InvocationContext, state: &mut GuardState, now: Instant) -> Verdict;

    /// Feed back how an admitted call ended.
    fn record(
        &self,
        admission: &Admission,
        outcome: CallOutcome,
        state: &mut GuardState,
        now: Instant,
    );

    /// Instant until which this state must survive idle eviction.
    fn retain_until(&self, _state: &GuardState) -> Option<Instant> {
        None
    }
}
