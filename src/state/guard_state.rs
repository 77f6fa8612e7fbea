use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use crate::domain::PolicyKind;

/// Fixed-window counters for a rate-limit key.
#[derive(Debug, Clone)]
pub struct RateWindow {
    /// Start of the current window
    pub window_start: Instant,
    /// Calls admitted in the current window
    pub admitted: u32,
    /// Admitted calls that completed successfully
    pub completed: u32,
    /// Admitted calls that failed or were cancelled
    pub failed: u32,
}

impl RateWindow {
    pub fn new(now: Instant) -> Self {
        RateWindow {
            window_start: now,
            admitted: 0,
            completed: 0,
            failed: 0,
        }
    }

    /// Start a fresh window at `now`.
    pub fn reset(&mut self, now: Instant) {
        *self = RateWindow::new(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker state for one key.
#[derive(Debug, Clone)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    /// When `status` last changed
    pub last_transition: Instant,
    /// Set while the single half-open probe is running
    pub probe_in_flight: bool,
}

impl CircuitState {
    pub fn new(now: Instant) -> Self {
        CircuitState {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            last_transition: now,
            probe_in_flight: false,
        }
    }

    pub fn transition(&mut self, status: CircuitStatus, now: Instant) {
        self.status = status;
        self.last_transition = now;
    }

    /// Open, half-open, or holding a probe slot.
    pub fn is_tripped(&self) -> bool {
        self.status != CircuitStatus::Closed || self.probe_in_flight
    }
}

/// Recently seen discriminants and their expiry instants.
#[derive(Debug, Clone, Default)]
pub struct DedupSet {
    seen: HashMap<String, Instant>,
}

impl DedupSet {
    /// Drop every entry whose expiry is at or before `now`.
    pub fn evict_expired(&mut self, now: Instant) {
        self.seen.retain(|_, expires_at| *expires_at > now);
    }

    pub fn contains(&self, discriminant: &str, now: Instant) -> bool {
        self.seen
            .get(discriminant)
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Track a discriminant, evicting the soonest-expiring entry when full.
    pub fn insert(&mut self, discriminant: &str, expires_at: Instant, max_entries: Option<usize>) {
        if let Some(max) = max_entries {
            while self.seen.len() >= max && !self.seen.contains_key(discriminant) {
                let oldest = self
                    .seen
                    .iter()
                    .min_by_key(|(_, expires_at)| **expires_at)
                    .map(|(d, _)| d.clone());
                match oldest {
                    Some(d) => {
                        self.seen.remove(&d);
                    }
                    None => break,
                }
            }
        }
        self.seen.insert(discriminant.to_string(), expires_at);
    }

    /// Forget a discriminant, but only if it still carries the given expiry.
    pub fn remove_if(&mut self, discriminant: &str, expires_at: Instant) -> bool {
        if self.seen.get(discriminant) == Some(&expires_at) {
            self.seen.remove(discriminant);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Mutable state for one guard key. Owned by the state store.
#[derive(Debug, Clone)]
pub enum GuardState {
    RateLimit(RateWindow),
    CircuitBreaker(CircuitState),
    Dedup(DedupSet),
    /// Access gates keep no state
    Stateless,
}

impl GuardState {
    /// Fresh state for a policy kind.
    pub fn new(kind: PolicyKind, now: Instant) -> Self {
        match kind {
            PolicyKind::RateLimit => GuardState::RateLimit(RateWindow::new(now)),
            PolicyKind::CircuitBreaker => GuardState::CircuitBreaker(CircuitState::new(now)),
            PolicyKind::Dedup => GuardState::Dedup(DedupSet::default()),
            PolicyKind::AccessGate => GuardState::Stateless,
        }
    }

    /// Whether this state belongs to the given policy kind.
    pub fn matches(&self, kind: PolicyKind) -> bool {
        matches!(
            (self, kind),
            (GuardState::RateLimit(_), PolicyKind::RateLimit)
                | (GuardState::CircuitBreaker(_), PolicyKind::CircuitBreaker)
                | (GuardState::Dedup(_), PolicyKind::Dedup)
                | (GuardState::Stateless, PolicyKind::AccessGate)
        )
    }

    /// Read-only summary for telemetry.
    pub fn summary(&self, now: Instant) -> StateSummary {
        match self {
            GuardState::RateLimit(w) => StateSummary::RateLimit {
                admitted: w.admitted,
                completed: w.completed,
                failed: w.failed,
                window_age_ms: now.saturating_duration_since(w.window_start).as_millis() as u64,
            },
            GuardState::CircuitBreaker(c) => StateSummary::CircuitBreaker {
                status: c.status,
                consecutive_failures: c.consecutive_failures,
                probe_in_flight: c.probe_in_flight,
            },
            GuardState::Dedup(set) => StateSummary::Dedup {
                tracked: set.len(),
            },
            GuardState::Stateless => StateSummary::Stateless,
        }
    }
}

/// Serializable copy of a guard's state, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateSummary {
    RateLimit {
        admitted: u32,
        completed: u32,
        failed: u32,
        window_age_ms: u64,
    },
    CircuitBreaker {
        status: CircuitStatus,
        consecutive_failures: u32,
        probe_in_flight: bool,
    },
    Dedup {
        tracked: usize,
    },
    Stateless,
}
