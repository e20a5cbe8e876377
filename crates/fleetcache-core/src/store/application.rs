// ── Application ──

use std::sync::Arc;

use parking_lot::Mutex;

use super::Cached;
use crate::error::CacheError;
use crate::hash::HashCache;
use crate::hub::{Hub, HubMessage, Topic, TopicKind};
use crate::metrics::CacheMetrics;
use crate::model::{ApplicationChange, ConfigMap, Life, RemoveApplication, StatusInfo};
use crate::resident::Resident;
use crate::watcher::{NotifyWatcher, spawn_config_watcher};

/// Cached application.
#[derive(Debug, Clone)]
pub struct Application {
    inner: Arc<ApplicationInner>,
}

#[derive(Debug)]
struct ApplicationInner {
    resident: Arc<Resident>,
    hub: Hub,
    metrics: Arc<CacheMetrics>,
    state: Mutex<ApplicationState>,
}

#[derive(Debug)]
struct ApplicationState {
    details: ApplicationChange,
    hashes: Arc<HashCache>,
}

impl Application {
    pub(crate) fn new(resident: Arc<Resident>, hub: Hub, metrics: Arc<CacheMetrics>) -> Self {
        let hashes = Arc::new(HashCache::empty(
            metrics.application_hash_cache_hit.clone(),
            metrics.application_hash_cache_miss.clone(),
        ));
        Self {
            inner: Arc::new(ApplicationInner {
                resident,
                hub,
                metrics,
                state: Mutex::new(ApplicationState {
                    details: ApplicationChange::default(),
                    hashes,
                }),
            }),
        }
    }

    pub fn cache_id(&self) -> u64 {
        self.inner.resident.cache_id()
    }

    pub fn name(&self) -> String {
        self.inner.state.lock().details.name.clone()
    }

    pub fn charm_url(&self) -> String {
        self.inner.state.lock().details.charm_url.clone()
    }

    pub fn life(&self) -> Life {
        self.inner.state.lock().details.life
    }

    pub fn exposed(&self) -> bool {
        self.inner.state.lock().details.exposed
    }

    pub fn min_units(&self) -> u32 {
        self.inner.state.lock().details.min_units
    }

    pub fn subordinate(&self) -> bool {
        self.inner.state.lock().details.subordinate
    }

    pub fn workload_version(&self) -> String {
        self.inner.state.lock().details.workload_version.clone()
    }

    pub fn status(&self) -> StatusInfo {
        self.inner.state.lock().details.status.clone()
    }

    /// Copy of the application config. Counts a config read.
    pub fn config(&self) -> ConfigMap {
        self.inner.metrics.application_config_reads.inc();
        self.inner.state.lock().details.config.clone()
    }

    pub fn details(&self) -> ApplicationChange {
        self.inner.state.lock().details.clone()
    }

    /// Watch the config values under `keys` (every key when empty). The
    /// first signal is always sent; later ones only when those values
    /// change.
    pub fn watch_config<S: AsRef<str>>(&self, keys: &[S]) -> NotifyWatcher {
        let (name, hashes) = {
            let state = self.inner.state.lock();
            (state.details.name.clone(), Arc::clone(&state.hashes))
        };
        let keys = keys.iter().map(|k| k.as_ref().to_owned()).collect();
        spawn_config_watcher(
            &self.inner.resident,
            &self.inner.hub,
            Topic::instance(TopicKind::ApplicationConfigChange, name),
            &hashes,
            keys,
        )
    }

    pub(crate) fn set_details(&self, details: ApplicationChange) -> Result<(), CacheError> {
        let hashes = Arc::new(HashCache::new(
            details.config.clone(),
            self.inner.metrics.application_hash_cache_hit.clone(),
            self.inner.metrics.application_hash_cache_miss.clone(),
        )?);

        let (name, charm_url, charm_changed, config_changed) = {
            let mut state = self.inner.state.lock();
            self.inner.resident.set_removal_message(|| {
                RemoveApplication {
                    model_uuid: details.model_uuid.clone(),
                    name: details.name.clone(),
                }
                .into()
            });
            self.inner.resident.set_stale(false);

            let charm_changed = state.details.charm_url != details.charm_url;
            let config_changed = state.hashes.all() != hashes.all();
            let name = details.name.clone();
            let charm_url = details.charm_url.clone();
            state.details = details;
            state.hashes = Arc::clone(&hashes);
            (name, charm_url, charm_changed, config_changed)
        };

        if charm_changed {
            self.inner.hub.publish(
                &Topic::global(TopicKind::ApplicationCharmUrlChange),
                &HubMessage::CharmUrl {
                    application: name.clone(),
                    charm_url,
                },
            );
        }
        if config_changed {
            self.inner.hub.publish(
                &Topic::instance(TopicKind::ApplicationConfigChange, name),
                &HubMessage::ConfigHashes(hashes),
            );
        }
        Ok(())
    }
}

impl Cached for Application {
    fn resident(&self) -> &Arc<Resident> {
        &self.inner.resident
    }
}
