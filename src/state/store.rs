use ahash::AHasher;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::domain::{GuardKey, PolicyKind};

use super::guard_state::{GuardState, StateSummary};

/// Number of shards for the state store.
/// Must be a power of 2 for fast modulo via bitwise AND.
const NUM_SHARDS: usize = 64;

/// Guard state plus bookkeeping for idle eviction.
#[derive(Debug)]
pub struct StateEntry {
    state: GuardState,
    last_access: Instant,
    /// Idle eviction skips the entry before this instant
    retain_until: Option<Instant>,
}

impl StateEntry {
    fn new(kind: PolicyKind, now: Instant) -> Self {
        StateEntry {
            state: GuardState::new(kind, now),
            last_access: now,
            retain_until: None,
        }
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn retain_until(&self) -> Option<Instant> {
        self.retain_until
    }

    /// Whether idle eviction must keep this entry at `now`.
    fn is_pinned(&mut self, now: Instant) -> bool {
        if self.retain_until.is_some_and(|until| until > now) {
            return true;
        }
        match &mut self.state {
            GuardState::Dedup(seen) => {
                seen.evict_expired(now);
                !seen.is_empty()
            }
            GuardState::CircuitBreaker(circuit) => circuit.is_tripped(),
            _ => false,
        }
    }
}

/// Concurrent map from guard key to guard state.
///
/// Keys are distributed across shards by hash; each entry has its own
/// mutex, so evaluations on the same key are serialized while distinct
/// keys proceed in parallel.
#[derive(Debug)]
pub struct StateStore {
    shards: Vec<RwLock<HashMap<GuardKey, Arc<Mutex<StateEntry>>>>>,
    clock: Arc<dyn Clock>,
}

impl StateStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        StateStore { shards, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Get or lazily create the entry for a key.
    pub fn get_or_create(&self, key: &GuardKey, kind: PolicyKind) -> Arc<Mutex<StateEntry>> {
        let shard = &self.shards[self.shard_index(key)];

        // Fast path: entry exists
        {
            let read_guard = shard.read();
            if let Some(entry) = read_guard.get(key) {
                return entry.clone();
            }
        }

        let mut write_guard = shard.write();

        // Double-check after acquiring write lock
        if let Some(entry) = write_guard.get(key) {
            return entry.clone();
        }

        let entry = Arc::new(Mutex::new(StateEntry::new(kind, self.clock.now())));
        write_guard.insert(key.clone(), entry.clone());
        entry
    }

    /// Get an existing entry without creating one.
    pub fn get(&self, key: &GuardKey) -> Option<Arc<Mutex<StateEntry>>> {
        let shard = &self.shards[self.shard_index(key)];
        shard.read().get(key).cloned()
    }

    /// Apply `f` to the state for `key` under the key's lock.
    ///
    /// State of a different policy kind (left over from a previous
    /// configuration generation) is replaced with fresh state first.
    pub fn mutate<R>(
        &self,
        key: &GuardKey,
        kind: PolicyKind,
        f: impl FnOnce(&mut GuardState, Instant) -> R,
    ) -> R {
        self.mutate_retaining(key, kind, |state, now| (f(state, now), None))
    }

    /// Like [`StateStore::mutate`], but `f` also returns the instant until
    /// which idle eviction must keep the entry. `None` leaves the current
    /// retention unchanged.
    pub fn mutate_retaining<R>(
        &self,
        key: &GuardKey,
        kind: PolicyKind,
        f: impl FnOnce(&mut GuardState, Instant) -> (R, Option<Instant>),
    ) -> R {
        let entry = self.get_or_create(key, kind);
        let mut guard = entry.lock();
        let now = self.clock.now();

        if !guard.state.matches(kind) {
            guard.state = GuardState::new(kind, now);
            guard.retain_until = None;
        }

        Self::apply(&mut guard, now, f)
    }

    /// Apply `f` only to existing state of the given kind.
    ///
    /// Returns `None` when the key has no state or its state belongs to a
    /// different policy kind.
    pub fn mutate_existing<R>(
        &self,
        key: &GuardKey,
        kind: PolicyKind,
        f: impl FnOnce(&mut GuardState, Instant) -> (R, Option<Instant>),
    ) -> Option<R> {
        let entry = self.get(key)?;
        let mut guard = entry.lock();
        if !guard.state.matches(kind) {
            return None;
        }
        let now = self.clock.now();

        Some(Self::apply(&mut guard, now, f))
    }

    fn apply<R>(
        entry: &mut StateEntry,
        now: Instant,
        f: impl FnOnce(&mut GuardState, Instant) -> (R, Option<Instant>),
    ) -> R {
        entry.last_access = now;
        let (result, retain_until) = f(&mut entry.state, now);
        if retain_until.is_some() {
            entry.retain_until = retain_until;
        }
        result
    }

    /// Read-only summary of a key's state, if the key has been observed.
    pub fn snapshot(&self, key: &GuardKey) -> Option<StateSummary> {
        let entry = self.get(key)?;
        let guard = entry.lock();
        Some(guard.state.summary(self.clock.now()))
    }

    /// Remove entries not touched for at least `idle`.
    ///
    /// Entries currently held by an evaluation are kept, as are entries
    /// still inside their retention period, live dedup sets and circuits
    /// that are not closed. Returns the number of entries evicted.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;

        for shard in &self.shards {
            let mut write_guard = shard.write();
            let before = write_guard.len();

            write_guard.retain(|_, entry| {
                // Only the map holds it, and the shard write lock stops new clones
                if Arc::strong_count(entry) > 1 {
                    return true;
                }
                let Some(mut guard) = entry.try_lock() else {
                    return true;
                };
                if guard.is_pinned(now) {
                    return true;
                }
                now.saturating_duration_since(guard.last_access) < idle
            });

            evicted += before - write_guard.len();
        }

        evicted
    }

    /// Total number of keys with state.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let shard_sizes: Vec<usize> = self.shards.iter().map(|s| s.read().len()).collect();

        StoreStats {
            total_keys: shard_sizes.iter().sum(),
            shard_sizes,
        }
    }

    #[inline]
    fn shard_index(&self, key: &GuardKey) -> usize {
        let mut hasher = AHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (NUM_SHARDS - 1)
    }
}

impl Default for StateStore {
    fn default() -> Self {
        StateStore::new(Arc::new(SystemClock))
    }
}

/// Statistics about the state store.
#[derive(Debug)]
pub struct StoreStats {
    pub total_keys: usize,
    /// Number of keys per shard
    pub shard_sizes: Vec<usize>,
}
