pub mod generation;
pub mod hot_reload;
pub mod loader;
pub mod table;

pub use generation::{ConfigResolver, Resolution, Snapshot};
pub use hot_reload::GuardWatcher;
pub use loader::{load_config, parse_config, ConfigLoader, GuardConfig, LoadError};
pub use table::GuardTable;
