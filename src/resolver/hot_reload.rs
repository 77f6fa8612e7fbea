use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::telemetry::MetricsRegistry;

use super::generation::ConfigResolver;
use super::loader::{ConfigLoader, LoadError};
use super::table::GuardTable;

/// Watch the guard configuration file and swap the resolver on change.
pub struct GuardWatcher {
    loader: ConfigLoader,
    resolver: Arc<ConfigResolver>,
    check_interval: Duration,
    last_version: Option<String>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl GuardWatcher {
    pub fn new(loader: ConfigLoader, resolver: Arc<ConfigResolver>, check_interval: Duration) -> Self {
        GuardWatcher {
            loader,
            resolver,
            check_interval,
            last_version: None,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Load the initial configuration and start watching for changes.
    ///
    /// An initial load failure leaves the resolver as it is (normally
    /// empty, so every call proceeds unguarded). The receiver yields the
    /// resolver generation after each swap.
    pub fn start(mut self) -> (watch::Receiver<u64>, tokio::task::JoinHandle<()>) {
        match self.loader.load() {
            Ok(config) => {
                info!("Loaded initial guard configuration version: {}", config.version);
                self.last_version = Some(config.version.clone());
                self.resolver.swap(GuardTable::from_config(config));
            }
            Err(e) => {
                error!("Failed to load initial guard configuration: {}", e);
            }
        }

        let (tx, rx) = watch::channel(self.resolver.generation());

        let handle = tokio::spawn(async move {
            let mut interval = interval(self.check_interval);

            loop {
                interval.tick().await;

                match self.check_for_updates(&tx) {
                    Ok(true) => info!("Guard configuration reloaded successfully"),
                    Ok(false) => {}
                    Err(e) => warn!("Error checking for guard configuration updates: {}", e),
                }
            }
        });

        (rx, handle)
    }

    /// Reload if the version changed. A failed load keeps the current generation.
    fn check_for_updates(&mut self, tx: &watch::Sender<u64>) -> Result<bool, LoadError> {
        let config = match self.loader.load() {
            Ok(config) => config,
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_config_reload(false);
                }
                return Err(e);
            }
        };

        if self.last_version.as_ref() == Some(&config.version) {
            return Ok(false);
        }

        info!(
            "Guard configuration version changed: {:?} -> {}",
            self.last_version, config.version
        );

        self.last_version = Some(config.version.clone());
        let generation = self.resolver.swap(GuardTable::from_config(config));
        if let Some(metrics) = &self.metrics {
            metrics.record_config_reload(true);
        }
        let _ = tx.send(generation);

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::Ordering;
    use tempfile::NamedTempFile;

    fn create_config_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
version: "v1"
guards:
  - id: rl
    policy: rate_limit
    limit: 3
    window_ms: 1000
operations:
  op:
    guards: [rl]
"#
        )
        .unwrap();
        file
    }

    #[tokio::test]
    async fn test_watcher_initial_load() {
        let file = create_config_file();
        let resolver = Arc::new(ConfigResolver::empty());

        let watcher = GuardWatcher::new(
            ConfigLoader::new(file.path()),
            resolver.clone(),
            Duration::from_secs(60),
        );
        let (rx, handle) = watcher.start();

        assert_eq!(*rx.borrow(), 2);
        assert_eq!(resolver.version(), "v1");
        assert_eq!(resolver.resolve("op").guards.len(), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_watcher_initial_failure_keeps_resolver() {
        let resolver = Arc::new(ConfigResolver::empty());

        let watcher = GuardWatcher::new(
            ConfigLoader::new("/nonexistent/guards.yaml"),
            resolver.clone(),
            Duration::from_secs(60),
        );
        let (rx, handle) = watcher.start();

        assert_eq!(*rx.borrow(), 1);
        assert!(resolver.resolve("op").is_unguarded());

        handle.abort();
    }

    #[tokio::test]
    async fn test_watcher_detects_changes() {
        let file = create_config_file();
        let path = file.path().to_path_buf();
        let resolver = Arc::new(ConfigResolver::empty());
        let metrics = Arc::new(MetricsRegistry::new());

        let watcher = GuardWatcher::new(
            ConfigLoader::new(&path),
            resolver.clone(),
            Duration::from_millis(50),
        )
        .with_metrics(metrics.clone());
        let (mut rx, handle) = watcher.start();

        tokio::time::sleep(Duration::from_millis(10)).await;
        std::fs::write(
            &path,
            r#"
version: "v2"
guards:
  - id: rl
    policy: rate_limit
    limit: 3
    window_ms: 1000
  - id: breaker
    policy: circuit_breaker
    failure_threshold: 2
    cooldown_ms: 5000
operations:
  op:
    guards: [rl, breaker]
"#,
        )
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("Timeout waiting for configuration change")
            .unwrap();

        assert_eq!(resolver.version(), "v2");
        assert_eq!(resolver.resolve("op").guards.len(), 2);
        assert_eq!(metrics.config_reloads_total.load(Ordering::Relaxed), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_watcher_keeps_generation_on_bad_reload() {
        let file = create_config_file();
        let path = file.path().to_path_buf();
        let resolver = Arc::new(ConfigResolver::empty());
        let metrics = Arc::new(MetricsRegistry::new());

        let watcher = GuardWatcher::new(
            ConfigLoader::new(&path),
            resolver.clone(),
            Duration::from_millis(20),
        )
        .with_metrics(metrics.clone());
        let (_rx, handle) = watcher.start();

        std::fs::write(&path, "version: [not, a, string").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(resolver.version(), "v1");
        assert_eq!(resolver.generation(), 2);
        assert!(metrics.config_reload_errors.load(Ordering::Relaxed) >= 1);

        handle.abort();
    }
}
