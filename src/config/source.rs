//! Configuration sources.
//!
//! A source owns the current [`ApplicationConfig`] and notifies listeners
//! whenever a new snapshot is published. Listeners may be invoked more than
//! once for equivalent snapshots; deduplication is the consumer's job.

use std::sync::{Arc, PoisonError, RwLock};

use arc_swap::ArcSwap;

use crate::config::schema::ApplicationConfig;

/// Callback invoked with every newly published configuration.
pub type ChangeListener = Arc<dyn Fn(Arc<ApplicationConfig>) + Send + Sync>;

/// Something that holds the live application configuration.
pub trait ConfigSource: Send + Sync {
    /// Current configuration snapshot.
    fn get_config(&self) -> Arc<ApplicationConfig>;

    /// Register a listener called on every configuration change.
    fn on_config_change(&self, listener: ChangeListener);
}

/// An in-memory configuration source.
pub struct StaticSource {
    current: ArcSwap<ApplicationConfig>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl StaticSource {
    pub fn new(config: ApplicationConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Publish a new snapshot and notify every listener synchronously.
    pub fn set_config(&self, config: ApplicationConfig) {
        let config = Arc::new(config);
        self.current.store(config.clone());

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(config.clone());
        }
    }
}

impl ConfigSource for StaticSource {
    fn get_config(&self) -> Arc<ApplicationConfig> {
        self.current.load_full()
    }

    fn on_config_change(&self, listener: ChangeListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_set_config_notifies_listeners() {
        let source = StaticSource::new(ApplicationConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        source.on_config_change(Arc::new(move |cfg| {
            sink.lock().unwrap().push(cfg.services.clone());
        }));

        let mut next = ApplicationConfig::default();
        next.services = "proxy".into();
        source.set_config(next.clone());
        source.set_config(next);

        assert_eq!(*seen.lock().unwrap(), vec!["proxy", "proxy"]);
        assert_eq!(source.get_config().services, "proxy");
    }

    #[test]
    fn test_get_config_without_changes() {
        let source = StaticSource::new(ApplicationConfig::default());
        assert_eq!(*source.get_config(), ApplicationConfig::default());
    }
}
