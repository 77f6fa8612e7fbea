use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::domain::{CallOutcome, DenyReason, InvocationContext, PolicyKind};
use crate::state::GuardState;

use super::traits::{Admission, GuardPolicy, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Allow,
    Deny,
}

/// Static allow/deny table over one call attribute.
///
/// The subject is the named call attribute, or the discriminant when no
/// attribute is configured. Deny entries win over allow entries. An
/// unlisted subject gets `default`; without one it is denied when an allow
/// list exists and admitted otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGatePolicy {
    #[serde(default)]
    pub attribute: Option<String>,

    #[serde(default)]
    pub allow: Vec<String>,

    #[serde(default)]
    pub deny: Vec<String>,

    #[serde(default)]
    pub default: Option<GateAction>,
}

impl AccessGatePolicy {
    /// Decide for a subject value.
    pub fn decide(&self, subject: Option<&str>) -> GateAction {
        if let Some(value) = subject {
            if self.deny.iter().any(|d| d == value) {
                return GateAction::Deny;
            }
            if self.allow.iter().any(|a| a == value) {
                return GateAction::Allow;
            }
        }

        match self.default {
            Some(action) => action,
            None if self.allow.is_empty() => GateAction::Allow,
            None => GateAction::Deny,
        }
    }

    fn subject<'a>(&self, ctx: &'a InvocationContext) -> Option<&'a str> {
        match &self.attribute {
            Some(name) => ctx.attribute(name),
            None => ctx.discriminant(),
        }
    }
}

impl GuardPolicy for AccessGatePolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::AccessGate
    }

    fn validate(&self, _ctx: &InvocationContext) -> Result<(), String> {
        Ok(())
    }

    fn evaluate(&self, ctx: &InvocationContext, _state: &mut GuardState, _now: Instant) -> Verdict {
        match self.decide(self.subject(ctx)) {
            GateAction::Allow => Verdict::Admit(Admission::None),
            GateAction::Deny => Verdict::Deny(DenyReason::AccessDenied),
        }
    }

    fn record(&self, _: &Admission, _: CallOutcome, _: &mut GuardState, _: Instant) {}
}
