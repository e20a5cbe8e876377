// ── Controller construction parameters ──
//
// Built by the embedding process (the CLI, a test, an API server) and
// handed to `Controller::new`. Core never reads config files.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::CacheError;
use crate::metrics::CacheMetrics;
use crate::model::Change;

/// Called synchronously by the apply loop after every applied event,
/// including removals synthesized by a sweep.
pub type NotifyHook = Arc<dyn Fn(&Change) + Send + Sync>;

/// Everything a controller needs to start.
pub struct ControllerConfig {
    /// Input channel the producer pushes changes into. Required.
    pub changes: Option<mpsc::Receiver<Change>>,
    /// Observer invoked after each applied event, in apply order.
    pub notify: Option<NotifyHook>,
    /// Counters the cache updates.
    pub metrics: Arc<CacheMetrics>,
}

impl ControllerConfig {
    pub fn new(changes: mpsc::Receiver<Change>, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            changes: Some(changes),
            notify: None,
            metrics,
        }
    }

    /// Attach a notify hook.
    pub fn with_notify<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.notify = Some(Arc::new(hook));
        self
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.changes.is_none() {
            return Err(CacheError::NotValid {
                message: "missing change channel".into(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("changes", &self.changes.is_some())
            .field("notify", &self.notify.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_change_channel_is_not_valid() {
        let config = ControllerConfig {
            changes: None,
            notify: None,
            metrics: Arc::new(CacheMetrics::new().unwrap()),
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_not_valid());
        assert_eq!(err.to_string(), "missing change channel not valid");
    }

    #[test]
    fn complete_config_validates() {
        let (_tx, rx) = mpsc::channel(1);
        let config = ControllerConfig::new(rx, Arc::new(CacheMetrics::new().unwrap()))
            .with_notify(|_| {});
        assert!(config.validate().is_ok());
        assert!(config.notify.is_some());
    }
}
