// ── Machine ──

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use regex::Regex;

use super::{Cached, Model, ModelInner, Unit};
use crate::error::CacheError;
use crate::hash::HashCache;
use crate::hub::{Hub, HubMessage, Topic, TopicKind};
use crate::metrics::CacheMetrics;
use crate::model::{ConfigMap, Life, MachineChange, RemoveMachine, StatusInfo};
use crate::resident::Resident;
use crate::watcher::{
    NotifyWatcher, Predicate, PredicateStringsWatcher, spawn_config_watcher,
    spawn_lxd_profile_watcher,
};

/// Cached machine or container.
#[derive(Debug, Clone)]
pub struct Machine {
    inner: Arc<MachineInner>,
}

#[derive(Debug)]
struct MachineInner {
    resident: Arc<Resident>,
    model: Weak<ModelInner>,
    hub: Hub,
    metrics: Arc<CacheMetrics>,
    state: Mutex<MachineState>,
}

#[derive(Debug)]
struct MachineState {
    details: MachineChange,
    hashes: Arc<HashCache>,
}

impl Machine {
    pub(crate) fn new(
        resident: Arc<Resident>,
        model: Weak<ModelInner>,
        hub: Hub,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        let hashes = Arc::new(HashCache::empty(
            metrics.machine_hash_cache_hit.clone(),
            metrics.machine_hash_cache_miss.clone(),
        ));
        Self {
            inner: Arc::new(MachineInner {
                resident,
                model,
                hub,
                metrics,
                state: Mutex::new(MachineState {
                    details: MachineChange::default(),
                    hashes,
                }),
            }),
        }
    }

    pub fn cache_id(&self) -> u64 {
        self.inner.resident.cache_id()
    }

    pub fn id(&self) -> String {
        self.inner.state.lock().details.id.clone()
    }

    /// Provider instance id. `NotProvisioned` until one is recorded.
    pub fn instance_id(&self) -> Result<String, CacheError> {
        let state = self.inner.state.lock();
        if state.details.instance_id.is_empty() {
            return Err(CacheError::NotProvisioned {
                machine: state.details.id.clone(),
            });
        }
        Ok(state.details.instance_id.clone())
    }

    pub fn life(&self) -> Life {
        self.inner.state.lock().details.life
    }

    pub fn agent_status(&self) -> StatusInfo {
        self.inner.state.lock().details.agent_status.clone()
    }

    pub fn instance_status(&self) -> StatusInfo {
        self.inner.state.lock().details.instance_status.clone()
    }

    pub fn series(&self) -> String {
        self.inner.state.lock().details.series.clone()
    }

    /// Container type hosting this machine; empty for top-level machines.
    pub fn container_type(&self) -> String {
        self.inner.state.lock().details.container_type.clone()
    }

    pub fn supported_containers(&self) -> Vec<String> {
        self.inner.state.lock().details.supported_containers.clone()
    }

    pub fn supported_containers_known(&self) -> bool {
        self.inner.state.lock().details.supported_containers_known
    }

    pub fn charm_profiles(&self) -> Vec<String> {
        self.inner.state.lock().details.charm_profiles.clone()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.inner.state.lock().details.addresses.clone()
    }

    pub fn has_vote(&self) -> bool {
        self.inner.state.lock().details.has_vote
    }

    pub fn wants_vote(&self) -> bool {
        self.inner.state.lock().details.wants_vote
    }

    pub fn config(&self) -> ConfigMap {
        self.inner.state.lock().details.config.clone()
    }

    pub fn details(&self) -> MachineChange {
        self.inner.state.lock().details.clone()
    }

    /// Units assigned to this machine, subordinates included, sorted by
    /// name.
    ///
    /// A subordinate is placed wherever its principal is. A subordinate
    /// whose principal is not cached is an `Inconsistent` error.
    pub fn units(&self) -> Result<Vec<Unit>, CacheError> {
        let id = self.id();
        let units = self.model()?.units();

        let mut result = Vec::new();
        for (name, unit) in &units {
            if unit.machine_id() == id {
                result.push(unit.clone());
                continue;
            }
            if !unit.subordinate() {
                continue;
            }
            let principal_name = unit.principal();
            let principal = units.get(&principal_name).ok_or_else(|| {
                CacheError::Inconsistent {
                    message: format!(
                        "principal unit {principal_name:?} for subordinate {name} not found"
                    ),
                }
            })?;
            if principal.machine_id() == id {
                result.push(unit.clone());
            }
        }
        result.sort_by_key(Unit::name);
        Ok(result)
    }

    // ── Watchers ─────────────────────────────────────────────────────

    /// Watch containers hosted on this machine. The first delivery is the
    /// current container ids.
    pub fn watch_containers(&self) -> Result<PredicateStringsWatcher, CacheError> {
        let pattern = format!("^{}/[a-z]+/[0-9]+$", regex::escape(&self.id()));
        let containers = Regex::new(&pattern)
            .map_err(|e| CacheError::Internal(format!("container pattern {pattern}: {e}")))?;
        let predicate: Predicate = Arc::new(move |id| containers.is_match(id));
        let model = self.model()?;
        Ok(model.watch_machine_ids_for(&self.inner.resident, predicate))
    }

    /// Watch the machine config values under `keys` (every key when empty).
    pub fn watch_config<S: AsRef<str>>(&self, keys: &[S]) -> NotifyWatcher {
        let (id, hashes) = {
            let state = self.inner.state.lock();
            (state.details.id.clone(), Arc::clone(&state.hashes))
        };
        let keys = keys.iter().map(|k| k.as_ref().to_owned()).collect();
        spawn_config_watcher(
            &self.inner.resident,
            &self.inner.hub,
            Topic::instance(TopicKind::MachineConfigChange, id),
            &hashes,
            keys,
        )
    }

    /// Signal when the LXD profiles this machine needs may have changed:
    /// a unit with a profiled charm arrives or leaves, an application on
    /// the machine moves to a charm with a different profile, or the
    /// machine gets provisioned.
    pub fn watch_lxd_profile_verification_needed(&self) -> Result<NotifyWatcher, CacheError> {
        spawn_lxd_profile_watcher(self)
    }

    // ── Internals ────────────────────────────────────────────────────

    pub(crate) fn model(&self) -> Result<Model, CacheError> {
        self.inner
            .model
            .upgrade()
            .map(Model::from_inner)
            .ok_or_else(|| CacheError::Inconsistent {
                message: format!("model of machine {} no longer cached", self.id()),
            })
    }

    pub(crate) fn hub(&self) -> &Hub {
        &self.inner.hub
    }

    pub(crate) fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.inner.metrics
    }

    pub(crate) fn is_provisioned(&self) -> bool {
        !self.inner.state.lock().details.instance_id.is_empty()
    }

    pub(crate) fn set_details(&self, details: MachineChange) -> Result<(), CacheError> {
        let hashes = Arc::new(HashCache::new(
            details.config.clone(),
            self.inner.metrics.machine_hash_cache_hit.clone(),
            self.inner.metrics.machine_hash_cache_miss.clone(),
        )?);

        let (id, provisioned, config_changed) = {
            let mut state = self.inner.state.lock();
            self.inner.resident.set_removal_message(|| {
                RemoveMachine {
                    model_uuid: details.model_uuid.clone(),
                    id: details.id.clone(),
                }
                .into()
            });
            self.inner.resident.set_stale(false);

            let provisioned = state.details.instance_id != details.instance_id;
            let config_changed = state.hashes.all() != hashes.all();
            let id = details.id.clone();
            state.details = details;
            state.hashes = Arc::clone(&hashes);
            (id, provisioned, config_changed)
        };

        if provisioned {
            self.inner.hub.publish(
                &Topic::instance(TopicKind::MachineProvisioned, id.clone()),
                &HubMessage::Signal,
            );
        }
        if config_changed {
            self.inner.hub.publish(
                &Topic::instance(TopicKind::MachineConfigChange, id),
                &HubMessage::ConfigHashes(hashes),
            );
        }
        Ok(())
    }
}

impl Cached for Machine {
    fn resident(&self) -> &Arc<Resident> {
        &self.inner.resident
    }
}
