//! Time source for guard policies.
//!
//! Policies never read the system clock directly; the state store asks its
//! [`Clock`] for `now` so windows, cooldowns and TTLs can be driven by a
//! [`ManualClock`] in tests.

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic time and the current calendar date.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;

    /// Current UTC date, used for guard activation (`since`).
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock.
///
/// Clones share the same time, so a test can hand one clone to the
/// interceptor and advance another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Instant>>,
    today: Arc<Mutex<Option<NaiveDate>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            current: Arc::new(Mutex::new(Instant::now())),
            today: Arc::new(Mutex::new(None)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }

    /// Pin the calendar date; unset dates fall back to the system date.
    pub fn set_today(&self, date: NaiveDate) {
        *self.today.lock() = Some(date);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }

    fn today(&self) -> NaiveDate {
        match *self.today.lock() {
            Some(date) => date,
            None => Utc::now().date_naive(),
        }
    }
}
