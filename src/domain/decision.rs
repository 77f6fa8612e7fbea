use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a guard refused to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Admissions in the current window reached the configured limit
    RateLimitExceeded,
    /// Circuit is open and the cooldown has not elapsed
    CircuitOpen,
    /// Circuit is half-open and its single probe is still running
    CircuitProbeInFlight,
    /// Discriminant was already seen within the dedup TTL
    DuplicateInvocation,
    /// Access gate rejected the caller
    AccessDenied,
    /// Guard configuration is invalid and the guard fails closed
    GuardMisconfigured,
}

impl DenyReason {
    /// Stable string form used in telemetry and rejection errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::RateLimitExceeded => "rate_limit_exceeded",
            DenyReason::CircuitOpen => "circuit_open",
            DenyReason::CircuitProbeInFlight => "circuit_probe_in_flight",
            DenyReason::DuplicateInvocation => "duplicate_invocation",
            DenyReason::AccessDenied => "access_denied",
            DenyReason::GuardMisconfigured => "guard_misconfigured",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating a single guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum Decision {
    /// Call may proceed
    Allow,
    /// Call must not be invoked
    Deny(DenyReason),
}

impl Decision {
    /// Returns true if this decision admits the call.
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// The denial reason, if any.
    #[inline]
    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allow => None,
            Decision::Deny(reason) => Some(*reason),
        }
    }
}

impl Default for Decision {
    fn default() -> Self {
        Decision::Allow
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Deny(reason) => write!(f, "deny:{}", reason),
        }
    }
}

/// How an admitted call ended, fed back to each guard's `record` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// The wrapped call returned `Ok`
    Success,
    /// The wrapped call returned `Err` or panicked
    Failure,
    /// The wrapped call was dropped before completing (timeout, cancellation)
    Cancelled,
    /// Admitted by this guard but never invoked because a later guard denied
    Released,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Cancelled => "cancelled",
            CallOutcome::Released => "released",
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
