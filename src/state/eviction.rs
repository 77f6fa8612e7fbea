use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::debug;

use super::store::StateStore;

/// Periodically drop state for keys idle longer than `idle`.
///
/// Dedup entries already expire lazily; this bounds the number of keys,
/// which grows with distinct discriminants under per-discriminant scope.
pub fn spawn_idle_eviction(
    store: Arc<StateStore>,
    check_interval: Duration,
    idle: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(check_interval);

        loop {
            ticker.tick().await;

            let evicted = store.evict_idle(idle);
            if evicted > 0 {
                debug!(evicted, remaining = store.len(), "Evicted idle guard state");
            }
        }
    })
}
