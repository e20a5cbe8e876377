// ── Model ──
//
// Namespace for every other entity. Entity maps sit behind a read/write
// lock: the apply loop is the only writer, API callers and watchers read.
// Hub publishes always happen after the map lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::{Application, Branch, Cached, Charm, Machine, Unit};
use crate::error::CacheError;
use crate::hash::HashCache;
use crate::hub::{Hub, HubMessage, Topic, TopicKind};
use crate::metrics::CacheMetrics;
use crate::model::{
    ApplicationChange, BranchChange, CharmChange, ConfigMap, Life, MachineChange, ModelChange,
    RemoveModel, StatusInfo, UnitChange,
};
use crate::resident::{Resident, ResidentManager};
use crate::watcher::{
    NotifyWatcher, Predicate, PredicateStringsWatcher, StringsWatcher, spawn_config_watcher,
};

/// Summary counts for the diagnostics report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelReport {
    /// `owner/name`.
    pub name: String,
    pub life: Life,
    pub application_count: usize,
    pub charm_count: usize,
    pub machine_count: usize,
    pub unit_count: usize,
    pub branch_count: usize,
}

/// Cached model and everything in it.
#[derive(Debug, Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

#[derive(Debug)]
pub(crate) struct ModelInner {
    uuid: String,
    resident: Arc<Resident>,
    hub: Hub,
    metrics: Arc<CacheMetrics>,
    state: Mutex<ModelState>,
    entities: RwLock<Entities>,
}

#[derive(Debug)]
struct ModelState {
    details: ModelChange,
    hashes: Arc<HashCache>,
}

#[derive(Debug, Default)]
struct Entities {
    applications: HashMap<String, Application>,
    charms: HashMap<String, Charm>,
    machines: HashMap<String, Machine>,
    units: HashMap<String, Unit>,
    /// Keyed by branch id.
    branches: HashMap<String, Branch>,
}

impl Model {
    /// Empty model. The removal message is known up front, so a model
    /// created implicitly by one of its entities can still be swept.
    pub(crate) fn new(uuid: &str, resident: Arc<Resident>, metrics: Arc<CacheMetrics>) -> Self {
        resident.set_removal_message(|| {
            RemoveModel {
                model_uuid: uuid.to_owned(),
            }
            .into()
        });
        let hashes = Arc::new(HashCache::empty(
            metrics.model_hash_cache_hit.clone(),
            metrics.model_hash_cache_miss.clone(),
        ));
        Self {
            inner: Arc::new(ModelInner {
                uuid: uuid.to_owned(),
                resident,
                hub: Hub::new(),
                metrics,
                state: Mutex::new(ModelState {
                    details: ModelChange {
                        model_uuid: uuid.to_owned(),
                        ..ModelChange::default()
                    },
                    hashes,
                }),
                entities: RwLock::new(Entities::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ModelInner>) -> Self {
        Self { inner }
    }

    // ── Details ──────────────────────────────────────────────────────

    pub fn cache_id(&self) -> u64 {
        self.inner.resident.cache_id()
    }

    pub fn uuid(&self) -> String {
        self.inner.uuid.clone()
    }

    pub fn name(&self) -> String {
        self.inner.state.lock().details.name.clone()
    }

    pub fn owner(&self) -> String {
        self.inner.state.lock().details.owner.clone()
    }

    pub fn life(&self) -> Life {
        self.inner.state.lock().details.life
    }

    pub fn is_controller(&self) -> bool {
        self.inner.state.lock().details.is_controller
    }

    pub fn status(&self) -> StatusInfo {
        self.inner.state.lock().details.status.clone()
    }

    /// Copy of the model config. Counts a config read.
    pub fn config(&self) -> ConfigMap {
        self.inner.metrics.model_config_reads.inc();
        self.inner.state.lock().details.config.clone()
    }

    pub fn details(&self) -> ModelChange {
        self.inner.state.lock().details.clone()
    }

    /// Diagnostics summary: name, life and the size of every entity map.
    pub fn report(&self) -> ModelReport {
        let (name, life) = {
            let state = self.inner.state.lock();
            (
                format!("{}/{}", state.details.owner, state.details.name),
                state.details.life,
            )
        };
        let entities = self.inner.entities.read();
        ModelReport {
            name,
            life,
            application_count: entities.applications.len(),
            charm_count: entities.charms.len(),
            machine_count: entities.machines.len(),
            unit_count: entities.units.len(),
            branch_count: entities.branches.len(),
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn application(&self, name: &str) -> Result<Application, CacheError> {
        self.inner
            .entities
            .read()
            .applications
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::not_found("application", name))
    }

    pub fn charm(&self, url: &str) -> Result<Charm, CacheError> {
        self.inner
            .entities
            .read()
            .charms
            .get(url)
            .cloned()
            .ok_or_else(|| CacheError::not_found("charm", url))
    }

    pub fn machine(&self, id: &str) -> Result<Machine, CacheError> {
        self.inner
            .entities
            .read()
            .machines
            .get(id)
            .cloned()
            .ok_or_else(|| CacheError::not_found("machine", id))
    }

    pub fn unit(&self, name: &str) -> Result<Unit, CacheError> {
        self.inner
            .entities
            .read()
            .units
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::not_found("unit", name))
    }

    /// Branch with the given name.
    pub fn branch(&self, name: &str) -> Result<Branch, CacheError> {
        self.inner
            .entities
            .read()
            .branches
            .values()
            .find(|b| b.name() == name)
            .cloned()
            .ok_or_else(|| CacheError::not_found("branch", name))
    }

    pub fn applications(&self) -> HashMap<String, Application> {
        self.inner.entities.read().applications.clone()
    }

    pub fn charms(&self) -> HashMap<String, Charm> {
        self.inner.entities.read().charms.clone()
    }

    pub fn machines(&self) -> HashMap<String, Machine> {
        self.inner.entities.read().machines.clone()
    }

    pub fn units(&self) -> HashMap<String, Unit> {
        self.inner.entities.read().units.clone()
    }

    /// Branches keyed by id.
    pub fn branches(&self) -> HashMap<String, Branch> {
        self.inner.entities.read().branches.clone()
    }

    // ── Watchers ─────────────────────────────────────────────────────

    /// Watch the model config values under `keys` (every key when empty).
    pub fn watch_config<S: AsRef<str>>(&self, keys: &[S]) -> NotifyWatcher {
        let hashes = Arc::clone(&self.inner.state.lock().hashes);
        let keys = keys.iter().map(|k| k.as_ref().to_owned()).collect();
        spawn_config_watcher(
            &self.inner.resident,
            &self.inner.hub,
            Topic::global(TopicKind::ModelConfigChange),
            &hashes,
            keys,
        )
    }

    /// Watch top-level machines (not containers). The first delivery is
    /// every current machine id; later deliveries are ids added or removed.
    pub fn watch_machines(&self) -> Result<PredicateStringsWatcher, CacheError> {
        let top_level = Regex::new(r"^[0-9]+$")
            .map_err(|e| CacheError::Internal(format!("machine id pattern: {e}")))?;
        let predicate: Predicate = Arc::new(move |id| top_level.is_match(id));
        Ok(self.watch_machine_ids_for(&self.inner.resident, predicate))
    }

    /// Strings watcher over machine ids accepted by `predicate`, owned by
    /// `owner`.
    pub(crate) fn watch_machine_ids_for(
        &self,
        owner: &Arc<Resident>,
        predicate: Predicate,
    ) -> PredicateStringsWatcher {
        let mut initial: Vec<String> = self.inner.entities.read().machines.keys().cloned().collect();
        initial.sort();

        StringsWatcher::spawn_filtered(owner, initial, predicate, |feed| {
            let feed = feed.clone();
            vec![self.inner.hub.subscribe(
                Topic::global(TopicKind::ModelAddRemoveMachine),
                move |message| {
                    if let HubMessage::Ids(ids) = message {
                        feed.push(ids);
                    }
                },
            )]
        })
    }

    // ── Apply ────────────────────────────────────────────────────────

    pub(crate) fn set_details(&self, details: ModelChange) -> Result<(), CacheError> {
        let hashes = Arc::new(HashCache::new(
            details.config.clone(),
            self.inner.metrics.model_hash_cache_hit.clone(),
            self.inner.metrics.model_hash_cache_miss.clone(),
        )?);

        let config_changed = {
            let mut state = self.inner.state.lock();
            self.inner.resident.set_stale(false);
            let changed = state.hashes.all() != hashes.all();
            state.details = details;
            state.hashes = Arc::clone(&hashes);
            changed
        };

        if config_changed {
            self.inner.hub.publish(
                &Topic::global(TopicKind::ModelConfigChange),
                &HubMessage::ConfigHashes(hashes),
            );
        }
        Ok(())
    }

    pub(crate) fn update_application(
        &self,
        details: ApplicationChange,
        manager: &ResidentManager,
    ) -> Result<(), CacheError> {
        let app = {
            let mut entities = self.inner.entities.write();
            entities
                .applications
                .entry(details.name.clone())
                .or_insert_with(|| {
                    Application::new(
                        manager.new_resident(),
                        self.inner.hub.clone(),
                        Arc::clone(&self.inner.metrics),
                    )
                })
                .clone()
        };
        app.set_details(details)
    }

    pub(crate) async fn remove_application(&self, name: &str, manager: &ResidentManager) {
        let removed = self.inner.entities.write().applications.remove(name);
        if let Some(app) = removed {
            manager.evict(app.resident()).await;
            debug!(model = %self.inner.uuid, application = name, "application removed");
        }
    }

    pub(crate) fn update_charm(
        &self,
        details: CharmChange,
        manager: &ResidentManager,
    ) -> Result<(), CacheError> {
        let charm = {
            let mut entities = self.inner.entities.write();
            entities
                .charms
                .entry(details.charm_url.clone())
                .or_insert_with(|| Charm::new(manager.new_resident()))
                .clone()
        };
        charm.set_details(details)
    }

    pub(crate) async fn remove_charm(&self, url: &str, manager: &ResidentManager) {
        let removed = self.inner.entities.write().charms.remove(url);
        if let Some(charm) = removed {
            manager.evict(charm.resident()).await;
            debug!(model = %self.inner.uuid, charm = url, "charm removed");
        }
    }

    pub(crate) fn update_machine(
        &self,
        details: MachineChange,
        manager: &ResidentManager,
    ) -> Result<(), CacheError> {
        let id = details.id.clone();
        let (machine, added) = {
            let mut entities = self.inner.entities.write();
            match entities.machines.get(&id) {
                Some(machine) => (machine.clone(), false),
                None => {
                    let machine = Machine::new(
                        manager.new_resident(),
                        Arc::downgrade(&self.inner),
                        self.inner.hub.clone(),
                        Arc::clone(&self.inner.metrics),
                    );
                    entities.machines.insert(id.clone(), machine.clone());
                    (machine, true)
                }
            }
        };
        machine.set_details(details)?;

        if added {
            self.inner.hub.publish(
                &Topic::global(TopicKind::ModelAddRemoveMachine),
                &HubMessage::Ids(vec![id]),
            );
        }
        Ok(())
    }

    pub(crate) async fn remove_machine(&self, id: &str, manager: &ResidentManager) {
        let removed = self.inner.entities.write().machines.remove(id);
        if let Some(machine) = removed {
            self.inner.hub.publish(
                &Topic::global(TopicKind::ModelAddRemoveMachine),
                &HubMessage::Ids(vec![id.to_owned()]),
            );
            manager.evict(machine.resident()).await;
            debug!(model = %self.inner.uuid, machine = id, "machine removed");
        }
    }

    pub(crate) fn update_unit(&self, details: UnitChange, manager: &ResidentManager) {
        let name = details.name.clone();
        let (unit, added) = {
            let mut entities = self.inner.entities.write();
            match entities.units.get(&name) {
                Some(unit) => (unit.clone(), false),
                None => {
                    let unit = Unit::new(manager.new_resident());
                    entities.units.insert(name.clone(), unit.clone());
                    (unit, true)
                }
            }
        };
        unit.set_details(details);

        if added {
            self.inner.hub.publish(
                &Topic::global(TopicKind::ModelUnitAdd),
                &HubMessage::Unit(name),
            );
        }
    }

    pub(crate) async fn remove_unit(&self, name: &str, manager: &ResidentManager) {
        let removed = self.inner.entities.write().units.remove(name);
        if let Some(unit) = removed {
            self.inner.hub.publish(
                &Topic::global(TopicKind::ModelUnitRemove),
                &HubMessage::Unit(name.to_owned()),
            );
            manager.evict(unit.resident()).await;
            debug!(model = %self.inner.uuid, unit = name, "unit removed");
        }
    }

    pub(crate) fn update_branch(&self, details: BranchChange, manager: &ResidentManager) {
        let branch = {
            let mut entities = self.inner.entities.write();
            entities
                .branches
                .entry(details.id.clone())
                .or_insert_with(|| Branch::new(manager.new_resident()))
                .clone()
        };
        branch.set_details(details);
    }

    pub(crate) async fn remove_branch(&self, id: &str, manager: &ResidentManager) {
        let removed = self.inner.entities.write().branches.remove(id);
        if let Some(branch) = removed {
            manager.evict(branch.resident()).await;
            debug!(model = %self.inner.uuid, branch = id, "branch removed");
        }
    }

    /// Remove every entity, children before parents, then the model's own
    /// resident.
    pub(crate) async fn remove_all(&self, manager: &ResidentManager) {
        let (units, machines, applications, charms, branches) = {
            let entities = self.inner.entities.read();
            (
                sorted_keys(&entities.units),
                sorted_keys(&entities.machines),
                sorted_keys(&entities.applications),
                sorted_keys(&entities.charms),
                sorted_keys(&entities.branches),
            )
        };
        for name in &units {
            self.remove_unit(name, manager).await;
        }
        for id in &machines {
            self.remove_machine(id, manager).await;
        }
        for name in &applications {
            self.remove_application(name, manager).await;
        }
        for url in &charms {
            self.remove_charm(url, manager).await;
        }
        for id in &branches {
            self.remove_branch(id, manager).await;
        }
        manager.evict(&self.inner.resident).await;
    }
}

impl Cached for Model {
    fn resident(&self) -> &Arc<Resident> {
        &self.inner.resident
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}
