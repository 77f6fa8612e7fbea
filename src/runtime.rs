use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::intercept::Interceptor;
use crate::resolver::{ConfigLoader, ConfigResolver, GuardWatcher};
use crate::state::{spawn_idle_eviction, StateStore};
use crate::telemetry::{MetricsRegistry, SpanSink};

/// A wired interceptor with its background tasks.
///
/// Must be started inside a tokio runtime. Background tasks stop on
/// [`GuardRuntime::shutdown`] or drop.
pub struct GuardRuntime {
    interceptor: Interceptor,
    metrics: Arc<MetricsRegistry>,
    generations: watch::Receiver<u64>,
    watcher_handle: JoinHandle<()>,
    eviction_handle: JoinHandle<()>,
}

impl GuardRuntime {
    /// Load guard configuration and start reload and eviction tasks.
    pub fn start(config: &Config) -> Self {
        GuardRuntime::start_with_sinks(config, Vec::new())
    }

    pub fn start_with_sinks(config: &Config, sinks: Vec<Arc<dyn SpanSink>>) -> Self {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            config_path = %config.config_path.display(),
            enabled = config.enabled,
            "Starting guard runtime"
        );

        let metrics = Arc::new(MetricsRegistry::new());
        let resolver = Arc::new(ConfigResolver::empty());
        let store = Arc::new(StateStore::default());

        let watcher = GuardWatcher::new(
            ConfigLoader::new(&config.config_path),
            resolver.clone(),
            config.reload_interval(),
        )
        .with_metrics(metrics.clone());
        let (generations, watcher_handle) = watcher.start();

        let eviction_handle = spawn_idle_eviction(
            store.clone(),
            config.eviction_interval(),
            config.idle_timeout(),
        );

        let mut builder = Interceptor::builder(resolver)
            .store(store)
            .metrics(metrics.clone())
            .enabled(config.enabled);
        for sink in sinks {
            builder = builder.sink(sink);
        }

        GuardRuntime {
            interceptor: builder.build(),
            metrics,
            generations,
            watcher_handle,
            eviction_handle,
        }
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Receiver of resolver generation numbers, updated on each reload.
    pub fn generations(&self) -> watch::Receiver<u64> {
        self.generations.clone()
    }

    pub fn shutdown(self) {
        info!("Shutting down guard runtime");
        drop(self);
    }
}

impl Drop for GuardRuntime {
    fn drop(&mut self) {
        self.watcher_handle.abort();
        self.eviction_handle.abort();
    }
}
