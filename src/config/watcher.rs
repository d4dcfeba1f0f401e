//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::ApplicationConfig;
use crate::config::source::{ChangeListener, ConfigSource, StaticSource};

/// A configuration source backed by a TOML file on disk.
///
/// The file is re-read whenever it changes. Invalid files are logged and the
/// current configuration is kept.
pub struct FileSource {
    path: PathBuf,
    inner: Arc<StaticSource>,
}

impl FileSource {
    /// Load the file once and build a source around it.
    pub fn new(path: &Path) -> Result<Self, ConfigError> {
        let config = load_config(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: Arc::new(StaticSource::new(config)),
        })
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for as long as reloads are
    /// wanted.
    pub fn watch(&self) -> Result<RecommendedWatcher, notify::Error> {
        let inner = self.inner.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "Config file change detected, reloading...");
                        reload(&inner, &path);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }

    /// Re-read the file now, publishing it if valid.
    pub fn reload(&self) {
        reload(&self.inner, &self.path);
    }
}

fn reload(inner: &StaticSource, path: &Path) {
    match load_config(path) {
        Ok(config) => inner.set_config(config),
        Err(e) => {
            tracing::error!(
                error = %e,
                "Failed to reload config. Keeping current configuration."
            );
        }
    }
}

impl ConfigSource for FileSource {
    fn get_config(&self) -> Arc<ApplicationConfig> {
        self.inner.get_config()
    }

    fn on_config_change(&self, listener: ChangeListener) {
        self.inner.on_config_change(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_reload_publishes_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "services = \"all\"").unwrap();

        let source = FileSource::new(&path).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        source.on_config_change(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        std::fs::write(&path, "services = \"proxy\"").unwrap();
        source.reload();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.get_config().services, "proxy");
    }

    #[test]
    fn test_reload_keeps_config_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "services = \"authorize\"").unwrap();

        let source = FileSource::new(&path).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        source.on_config_change(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        std::fs::write(&path, "services = \"bogus\"").unwrap();
        source.reload();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(source.get_config().services, "authorize");
    }
}
