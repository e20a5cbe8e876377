// ── Unit ──

use std::sync::Arc;

use parking_lot::Mutex;

use super::Cached;
use crate::model::{Life, Port, RemoveUnit, StatusInfo, UnitChange};
use crate::resident::Resident;

/// Cached unit of an application.
#[derive(Debug, Clone)]
pub struct Unit {
    inner: Arc<UnitInner>,
}

#[derive(Debug)]
struct UnitInner {
    resident: Arc<Resident>,
    details: Mutex<UnitChange>,
}

impl Unit {
    pub(crate) fn new(resident: Arc<Resident>) -> Self {
        Self {
            inner: Arc::new(UnitInner {
                resident,
                details: Mutex::new(UnitChange::default()),
            }),
        }
    }

    pub fn cache_id(&self) -> u64 {
        self.inner.resident.cache_id()
    }

    pub fn name(&self) -> String {
        self.inner.details.lock().name.clone()
    }

    pub fn application(&self) -> String {
        self.inner.details.lock().application.clone()
    }

    pub fn series(&self) -> String {
        self.inner.details.lock().series.clone()
    }

    pub fn charm_url(&self) -> String {
        self.inner.details.lock().charm_url.clone()
    }

    pub fn life(&self) -> Life {
        self.inner.details.lock().life
    }

    pub fn public_address(&self) -> String {
        self.inner.details.lock().public_address.clone()
    }

    pub fn private_address(&self) -> String {
        self.inner.details.lock().private_address.clone()
    }

    /// Machine the unit is assigned to. Empty for subordinates.
    pub fn machine_id(&self) -> String {
        self.inner.details.lock().machine_id.clone()
    }

    /// Opened ports. The returned list is a copy.
    pub fn ports(&self) -> Vec<Port> {
        self.inner.details.lock().ports.clone()
    }

    /// Name of the principal unit, for subordinates.
    pub fn principal(&self) -> String {
        self.inner.details.lock().principal.clone()
    }

    pub fn subordinate(&self) -> bool {
        self.inner.details.lock().subordinate
    }

    pub fn workload_status(&self) -> StatusInfo {
        self.inner.details.lock().workload_status.clone()
    }

    pub fn agent_status(&self) -> StatusInfo {
        self.inner.details.lock().agent_status.clone()
    }

    /// Full copy of the last applied snapshot.
    pub fn details(&self) -> UnitChange {
        self.inner.details.lock().clone()
    }

    pub(crate) fn set_details(&self, details: UnitChange) {
        let mut current = self.inner.details.lock();
        self.inner.resident.set_removal_message(|| {
            RemoveUnit {
                model_uuid: details.model_uuid.clone(),
                name: details.name.clone(),
            }
            .into()
        });
        self.inner.resident.set_stale(false);
        *current = details;
    }
}

impl Cached for Unit {
    fn resident(&self) -> &Arc<Resident> {
        &self.inner.resident
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resident::ResidentManager;

    fn unit_change() -> UnitChange {
        UnitChange {
            model_uuid: "model-uuid".into(),
            name: "application-name/0".into(),
            application: "application-name".into(),
            machine_id: "0".into(),
            ports: vec![Port::tcp(8080)],
            ..UnitChange::default()
        }
    }

    #[test]
    fn ports_are_copied_out() {
        let manager = ResidentManager::new();
        let unit = Unit::new(manager.new_resident());
        unit.set_details(unit_change());

        let mut ports = unit.ports();
        ports.push(Port::tcp(54321));

        assert_eq!(unit.ports(), vec![Port::tcp(8080)]);
    }

    #[test]
    fn set_details_refreshes_stale_flag() {
        let manager = ResidentManager::new();
        let unit = Unit::new(manager.new_resident());
        unit.set_details(unit_change());
        manager.mark();
        assert!(unit.resident().is_stale());

        unit.set_details(unit_change());
        assert!(!unit.resident().is_stale());
        assert_eq!(unit.machine_id(), "0");
    }
}
