use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

/// Guard runtime configuration.
///
/// Hosts embed it with `#[command(flatten)]` or build it from the
/// environment with `Config::parse()`.
#[derive(Debug, Clone, Parser)]
#[command(name = "guarded")]
#[command(about = "Method-level guards with trace telemetry")]
pub struct Config {
    /// Path to guard configuration YAML file
    #[arg(long, default_value = "guards.yaml", env = "GUARDED_CONFIG_PATH")]
    pub config_path: PathBuf,

    /// Guard configuration reload check interval in seconds
    #[arg(long, default_value = "30", env = "GUARDED_RELOAD_SECS")]
    pub reload_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Global switch; when false guarded calls run unguarded and untraced
    #[arg(long, default_value = "true", action = ArgAction::Set, env = "GUARDED_ENABLED")]
    pub enabled: bool,

    /// Drop guard state untouched for this many seconds
    #[arg(long, default_value = "3600", env = "GUARDED_IDLE_EVICTION_SECS")]
    pub idle_eviction_secs: u64,

    /// Idle eviction check interval in seconds
    #[arg(long, default_value = "60", env = "GUARDED_EVICTION_INTERVAL_SECS")]
    pub eviction_interval_secs: u64,
}

impl Config {
    /// Get configuration reload interval as Duration.
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_secs)
    }

    /// Get idle eviction timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    /// Get idle eviction check interval as Duration.
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            config_path: PathBuf::from("guards.yaml"),
            reload_secs: 30,
            log_level: "info".to_string(),
            enabled: true,
            idle_eviction_secs: 3600,
            eviction_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.config_path, PathBuf::from("guards.yaml"));
        assert_eq!(config.reload_secs, 30);
        assert!(config.enabled);
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config {
            reload_secs: 60,
            idle_eviction_secs: 1800,
            eviction_interval_secs: 15,
            ..Default::default()
        };

        assert_eq!(config.reload_interval(), Duration::from_secs(60));
        assert_eq!(config.idle_timeout(), Duration::from_secs(1800));
        assert_eq!(config.eviction_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_parse_flags() {
        let config = Config::parse_from([
            "guarded",
            "--config-path",
            "/etc/guards.yaml",
            "--enabled",
            "false",
            "--reload-secs",
            "5",
        ]);

        assert_eq!(config.config_path, PathBuf::from("/etc/guards.yaml"));
        assert!(!config.enabled);
        assert_eq!(config.reload_secs, 5);
    }
}
