// ── Charm ──

use std::sync::Arc;

use parking_lot::Mutex;

use super::Cached;
use crate::error::CacheError;
use crate::hash::hash_config;
use crate::model::{CharmChange, ConfigMap, LxdProfile, RemoveCharm};
use crate::resident::Resident;

/// Cached charm metadata, keyed by charm URL.
#[derive(Debug, Clone)]
pub struct Charm {
    inner: Arc<CharmInner>,
}

#[derive(Debug)]
struct CharmInner {
    resident: Arc<Resident>,
    details: Mutex<CharmChange>,
}

impl Charm {
    pub(crate) fn new(resident: Arc<Resident>) -> Self {
        Self {
            inner: Arc::new(CharmInner {
                resident,
                details: Mutex::new(CharmChange::default()),
            }),
        }
    }

    pub fn cache_id(&self) -> u64 {
        self.inner.resident.cache_id()
    }

    pub fn url(&self) -> String {
        self.inner.details.lock().charm_url.clone()
    }

    pub fn version(&self) -> String {
        self.inner.details.lock().charm_version.clone()
    }

    /// LXD profile shipped with the charm. May be empty.
    pub fn lxd_profile(&self) -> LxdProfile {
        self.inner.details.lock().lxd_profile.clone()
    }

    pub fn default_config(&self) -> ConfigMap {
        self.inner.details.lock().default_config.clone()
    }

    pub fn details(&self) -> CharmChange {
        self.inner.details.lock().clone()
    }

    /// Apply a snapshot. The default config is hashed even though no
    /// watcher consumes it: an unhashable config is rejected here.
    pub(crate) fn set_details(&self, details: CharmChange) -> Result<(), CacheError> {
        hash_config(&details.default_config)?;

        let mut current = self.inner.details.lock();
        self.inner.resident.set_removal_message(|| {
            RemoveCharm {
                model_uuid: details.model_uuid.clone(),
                charm_url: details.charm_url.clone(),
            }
            .into()
        });
        self.inner.resident.set_stale(false);
        *current = details;
        Ok(())
    }
}

impl Cached for Charm {
    fn resident(&self) -> &Arc<Resident> {
        &self.inner.resident
    }
}
