pub mod eviction;
pub mod guard_state;
pub mod store;

pub use eviction::spawn_idle_eviction;
pub use guard_state::{CircuitState, CircuitStatus, DedupSet, GuardState, RateWindow, StateSummary};
pub use store::{StateEntry, StateStore, StoreStats};
