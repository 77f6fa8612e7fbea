use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::domain::{CallOutcome, DenyReason, InvocationContext, PolicyKind};
use crate::state::GuardState;

use super::traits::{Admission, GuardPolicy, Verdict};

/// Fixed-window rate limit.
///
/// At most `limit` calls are admitted per window. A call arriving exactly
/// `window` after the window start opens a new window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window_ms: u64,
}

impl RateLimitPolicy {
    pub fn new(limit: u32, window: Duration) -> Self {
        RateLimitPolicy {
            limit,
            window_ms: window.as_millis() as u64,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl GuardPolicy for RateLimitPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::RateLimit
    }

    fn validate(&self, _ctx: &InvocationContext) -> Result<(), String> {
        if self.limit == 0 {
            return Err("rate limit must admit at least one call".to_string());
        }
        if self.window_ms == 0 {
            return Err("rate limit window must be non-zero".to_string());
        }
        Ok(())
    }

    fn evaluate(&self, _ctx: &InvocationContext, state: &mut GuardState, now: Instant) -> Verdict {
        let GuardState::RateLimit(window) = state else {
            return Verdict::Admit(Admission::None);
        };

        if now.saturating_duration_since(window.window_start) >= self.window() {
            window.reset(now);
        }

        if window.admitted >= self.limit {
            return Verdict::Deny(DenyReason::RateLimitExceeded);
        }

        window.admitted += 1;
        Verdict::Admit(Admission::Window {
            window_start: window.window_start,
        })
    }

    fn record(
        &self,
        admission: &Admission,
        outcome: CallOutcome,
        state: &mut GuardState,
        _now: Instant,
    ) {
        let (GuardState::RateLimit(window), Admission::Window { window_start }) = (state, admission)
        else {
            return;
        };

        // Outcome belongs to a window that has since rolled over
        if window.window_start != *window_start {
            return;
        }

        match outcome {
            CallOutcome::Success => window.completed += 1,
            CallOutcome::Failure | CallOutcome::Cancelled => window.failed += 1,
            CallOutcome::Released => window.admitted = window.admitted.saturating_sub(1),
        }
    }

    fn retain_until(&self, state: &GuardState) -> Option<Instant> {
        match state {
            GuardState::RateLimit(window) => Some(window.window_start + self.window()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(limit: u32, window_secs: u64) -> (RateLimitPolicy, GuardState, Instant) {
        let now = Instant::now();
        (
            RateLimitPolicy::new(limit, Duration::from_secs(window_secs)),
            GuardState::new(PolicyKind::RateLimit, now),
            now,
        )
    }

    #[test]
    fn test_admits_up_to_limit() {
        let (policy, mut state, now) = setup(3, 1);
        let ctx = InvocationContext::new("op");

        for _ in 0..3 {
            assert!(matches!(policy.evaluate(&ctx, &mut state, now), Verdict::Admit(_)));
        }
        assert_eq!(
            policy.evaluate(&ctx, &mut state, now),
            Verdict::Deny(DenyReason::RateLimitExceeded)
        );
    }

    #[test]
    fn test_window_boundary_starts_new_window() {
        let (policy, mut state, now) = setup(1, 1);
        let ctx = InvocationContext::new("op");

        assert!(matches!(policy.evaluate(&ctx, &mut state, now), Verdict::Admit(_)));
        assert!(matches!(
            policy.evaluate(&ctx, &mut state, now + Duration::from_millis(999)),
            Verdict::Deny(_)
        ));
        assert!(matches!(
            policy.evaluate(&ctx, &mut state, now + Duration::from_secs(1)),
            Verdict::Admit(_)
        ));
    }

    #[test]
    fn test_released_slot_is_refunded() {
        let (policy, mut state, now) = setup(1, 1);
        let ctx = InvocationContext::new("op");

        let Verdict::Admit(admission) = policy.evaluate(&ctx, &mut state, now) else {
            panic!("first call should be admitted");
        };
        policy.record(&admission, CallOutcome::Released, &mut state, now);

        assert!(matches!(policy.evaluate(&ctx, &mut state, now), Verdict::Admit(_)));
    }

    #[test]
    fn test_record_ignores_stale_window() {
        let (policy, mut state, now) = setup(2, 1);
        let ctx = InvocationContext::new("op");

        let Verdict::Admit(old) = policy.evaluate(&ctx, &mut state, now) else {
            panic!("first call should be admitted");
        };
        let later = now + Duration::from_secs(2);
        policy.evaluate(&ctx, &mut state, later);
        policy.record(&old, CallOutcome::Failure, &mut state, later);

        assert_eq!(
            state.summary(later),
            crate::state::StateSummary::RateLimit {
                admitted: 1,
                completed: 0,
                failed: 0,
                window_age_ms: 0,
            }
        );
    }

    #[test]
    fn test_validation() {
        let ctx = InvocationContext::new("op");
        assert!(RateLimitPolicy::new(0, Duration::from_secs(1)).validate(&ctx).is_err());
        assert!(RateLimitPolicy::new(1, Duration::ZERO).validate(&ctx).is_err());
        assert!(RateLimitPolicy::new(1, Duration::from_secs(1)).validate(&ctx).is_ok());
    }
}
