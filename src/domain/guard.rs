use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::policy::{
    AccessGatePolicy, CircuitBreakerPolicy, DedupPolicy, GuardPolicy, RateLimitPolicy,
};

/// Policy family a guard belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    RateLimit,
    CircuitBreaker,
    Dedup,
    AccessGate,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::RateLimit => "rate_limit",
            PolicyKind::CircuitBreaker => "circuit_breaker",
            PolicyKind::Dedup => "dedup",
            PolicyKind::AccessGate => "access_gate",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy kind together with its parameters.
///
/// Deserialized from the `policy` tag of a guard entry, with the
/// parameters flattened next to it:
///
/// ```yaml
/// - id: checkout-rate
///   policy: rate_limit
///   limit: 3
///   window_ms: 1000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PolicySpec {
    RateLimit(RateLimitPolicy),
    CircuitBreaker(CircuitBreakerPolicy),
    Dedup(DedupPolicy),
    AccessGate(AccessGatePolicy),
}

impl PolicySpec {
    pub fn kind(&self) -> PolicyKind {
        match self {
            PolicySpec::RateLimit(_) => PolicyKind::RateLimit,
            PolicySpec::CircuitBreaker(_) => PolicyKind::CircuitBreaker,
            PolicySpec::Dedup(_) => PolicyKind::Dedup,
            PolicySpec::AccessGate(_) => PolicyKind::AccessGate,
        }
    }

    /// Borrow the evaluator for this policy.
    pub fn as_policy(&self) -> &dyn GuardPolicy {
        match self {
            PolicySpec::RateLimit(p) => p,
            PolicySpec::CircuitBreaker(p) => p,
            PolicySpec::Dedup(p) => p,
            PolicySpec::AccessGate(p) => p,
        }
    }
}

/// Whether guard state is shared by all callers or partitioned per discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardScope {
    #[default]
    Global,
    PerDiscriminant,
}

/// What a guard decides when its own configuration is unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Admit the call and report the configuration error
    #[default]
    Open,
    /// Deny with `guard_misconfigured`
    Closed,
}

/// Reporting severity attached to a guard's telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Warn,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warn => "WARN",
            Severity::Fatal => "FATAL",
        }
    }
}

/// A named guard: one policy plus its scoping and reporting metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardDefinition {
    /// Unique guard identifier
    pub id: String,

    #[serde(flatten)]
    pub policy: PolicySpec,

    #[serde(default)]
    pub scope: GuardScope,

    #[serde(default)]
    pub fail_mode: FailMode,

    #[serde(default)]
    pub severity: Severity,

    /// Guard is inactive before this date
    #[serde(default)]
    pub since: Option<NaiveDate>,

    /// Free-form condition text reported with the span (e.g. "avg_latency < 500")
    #[serde(default)]
    pub condition: Option<String>,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub filters: Vec<String>,
}

impl GuardDefinition {
    /// Create a global, fail-open guard with no reporting metadata.
    pub fn new(id: impl Into<String>, policy: PolicySpec) -> Self {
        GuardDefinition {
            id: id.into(),
            policy,
            scope: GuardScope::Global,
            fail_mode: FailMode::Open,
            severity: Severity::Warn,
            since: None,
            condition: None,
            environment: None,
            filters: Vec::new(),
        }
    }

    pub fn with_scope(mut self, scope: GuardScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    pub fn with_since(mut self, since: NaiveDate) -> Self {
        self.since = Some(since);
        self
    }

    pub fn kind(&self) -> PolicyKind {
        self.policy.kind()
    }

    /// Whether the guard applies on the given day.
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        self.since.map_or(true, |since| today >= since)
    }

    /// State key for a call with the given discriminant.
    ///
    /// Dedup guards always key at guard level: the discriminant is the
    /// element tracked inside the dedup set, not a state partition.
    pub fn key_for(&self, discriminant: Option<&str>) -> GuardKey {
        match (self.scope, self.kind()) {
            (GuardScope::PerDiscriminant, kind) if kind != PolicyKind::Dedup => {
                GuardKey::new(self.id.as_str(), discriminant)
            }
            _ => GuardKey::global(self.id.as_str()),
        }
    }
}

/// Identity of one partition of guard state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuardKey {
    guard_id: Arc<str>,
    discriminant: Option<Arc<str>>,
}

impl GuardKey {
    pub fn new(guard_id: &str, discriminant: Option<&str>) -> Self {
        GuardKey {
            guard_id: Arc::from(guard_id),
            discriminant: discriminant.map(Arc::from),
        }
    }

    pub fn global(guard_id: &str) -> Self {
        GuardKey::new(guard_id, None)
    }

    pub fn guard_id(&self) -> &str {
        &self.guard_id
    }

    pub fn discriminant(&self) -> Option<&str> {
        self.discriminant.as_deref()
    }
}

impl fmt::Display for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.discriminant {
            Some(d) => write!(f, "{}[{}]", self.guard_id, d),
            None => f.write_str(&self.guard_id),
        }
    }
}
