use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::domain::{CallOutcome, DenyReason, InvocationContext, PolicyKind};
use crate::state::GuardState;

use super::traits::{Admission, GuardPolicy, Verdict};

/// Suppress repeated calls with the same discriminant within a TTL.
///
/// Expired entries are evicted lazily on the next lookup for the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupPolicy {
    pub ttl_ms: u64,

    /// Upper bound on tracked discriminants
    #[serde(default)]
    pub max_entries: Option<usize>,

    /// Forget the discriminant when the call fails or is cancelled
    #[serde(default)]
    pub forget_on_failure: bool,
}

impl DedupPolicy {
    pub fn new(ttl: Duration) -> Self {
        DedupPolicy {
            ttl_ms: ttl.as_millis() as u64,
            max_entries: None,
            forget_on_failure: false,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl GuardPolicy for DedupPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Dedup
    }

    fn validate(&self, ctx: &InvocationContext) -> Result<(), String> {
        if self.ttl_ms == 0 {
            return Err("dedup ttl must be non-zero".to_string());
        }
        if self.max_entries == Some(0) {
            return Err("dedup max_entries must be at least 1".to_string());
        }
        if ctx.discriminant().is_none() {
            return Err("dedup guard requires a discriminant".to_string());
        }
        Ok(())
    }

    fn evaluate(&self, ctx: &InvocationContext, state: &mut GuardState, now: Instant) -> Verdict {
        let (GuardState::Dedup(seen), Some(discriminant)) = (state, ctx.discriminant()) else {
            return Verdict::Admit(Admission::None);
        };

        seen.evict_expired(now);

        if seen.contains(discriminant, now) {
            return Verdict::Deny(DenyReason::DuplicateInvocation);
        }

        let expires_at = now + self.ttl();
        seen.insert(discriminant, expires_at, self.max_entries);

        Verdict::Admit(Admission::Dedup {
            discriminant: discriminant.to_string(),
            expires_at,
        })
    }

    fn record(
        &self,
        admission: &Admission,
        outcome: CallOutcome,
        state: &mut GuardState,
        _now: Instant,
    ) {
        let (
            GuardState::Dedup(seen),
            Admission::Dedup {
                discriminant,
                expires_at,
            },
        ) = (state, admission)
        else {
            return;
        };

        let forget = match outcome {
            CallOutcome::Released => true,
            CallOutcome::Failure | CallOutcome::Cancelled => self.forget_on_failure,
            CallOutcome::Success => false,
        };

        if forget {
            seen.remove_if(discriminant, *expires_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(ttl_secs: u64) -> (DedupPolicy, GuardState, Instant) {
        let now = Instant::now();
        (
            DedupPolicy::new(Duration::from_secs(ttl_secs)),
            GuardState::new(PolicyKind::Dedup, now),
            now,
        )
    }

    #[test]
    fn test_duplicate_within_ttl_denied() {
        let (policy, mut state, now) = setup(10);
        let ctx = InvocationContext::new("op").with_discriminant("order-1");

        assert!(matches!(policy.evaluate(&ctx, &mut state, now), Verdict::Admit(_)));
        assert_eq!(
            policy.evaluate(&ctx, &mut state, now + Duration::from_secs(9)),
            Verdict::Deny(DenyReason::DuplicateInvocation)
        );
    }

    #[test]
    fn test_admitted_again_after_ttl() {
        let (policy, mut state, now) = setup(10);
        let ctx = InvocationContext::new("op").with_discriminant("order-1");

        policy.evaluate(&ctx, &mut state, now);
        assert!(matches!(
            policy.evaluate(&ctx, &mut state, now + Duration::from_secs(10)),
            Verdict::Admit(_)
        ));
    }

    #[test]
    fn test_distinct_discriminants_independent() {
        let (policy, mut state, now) = setup(10);
        let a = InvocationContext::new("op").with_discriminant("a");
        let b = InvocationContext::new("op").with_discriminant("b");

        assert!(matches!(policy.evaluate(&a, &mut state, now), Verdict::Admit(_)));
        assert!(matches!(policy.evaluate(&b, &mut state, now), Verdict::Admit(_)));
    }

    #[test]
    fn test_forget_on_failure() {
        let (mut policy, mut state, now) = setup(10);
        policy.forget_on_failure = true;
        let ctx = InvocationContext::new("op").with_discriminant("order-1");

        let Verdict::Admit(admission) = policy.evaluate(&ctx, &mut state, now) else {
            panic!("first call should be admitted");
        };
        policy.record(&admission, CallOutcome::Failure, &mut state, now);

        assert!(matches!(policy.evaluate(&ctx, &mut state, now), Verdict::Admit(_)));
    }

    #[test]
    fn test_failure_kept_by_default() {
        let (policy, mut state, now) = setup(10);
        let ctx = InvocationContext::new("op").with_discriminant("order-1");

        let Verdict::Admit(admission) = policy.evaluate(&ctx, &mut state, now) else {
            panic!("first call should be admitted");
        };
        policy.record(&admission, CallOutcome::Failure, &mut state, now);

        assert!(matches!(policy.evaluate(&ctx, &mut state, now), Verdict::Deny(_)));
    }

    #[test]
    fn test_requires_discriminant() {
        let policy = DedupPolicy::new(Duration::from_secs(10));
        let err = policy.validate(&InvocationContext::new("op")).unwrap_err();
        assert!(err.contains("discriminant"));
    }
}
