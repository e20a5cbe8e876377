// ── Branch ──
//
// A model generation: config changes staged for a subset of units.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Cached;
use crate::model::{BranchChange, ItemChange, RemoveBranch};
use crate::resident::Resident;

/// Cached branch, keyed by id and looked up by name.
#[derive(Debug, Clone)]
pub struct Branch {
    inner: Arc<BranchInner>,
}

#[derive(Debug)]
struct BranchInner {
    resident: Arc<Resident>,
    details: Mutex<BranchChange>,
}

impl Branch {
    pub(crate) fn new(resident: Arc<Resident>) -> Self {
        Self {
            inner: Arc::new(BranchInner {
                resident,
                details: Mutex::new(BranchChange::default()),
            }),
        }
    }

    pub fn cache_id(&self) -> u64 {
        self.inner.resident.cache_id()
    }

    pub fn id(&self) -> String {
        self.inner.details.lock().id.clone()
    }

    pub fn name(&self) -> String {
        self.inner.details.lock().name.clone()
    }

    /// Application name -> units tracking the branch. The returned map is
    /// a copy.
    pub fn assigned_units(&self) -> BTreeMap<String, Vec<String>> {
        self.inner.details.lock().assigned_units.clone()
    }

    /// Application name -> staged config deltas. The returned map is a
    /// copy.
    pub fn config(&self) -> BTreeMap<String, Vec<ItemChange>> {
        self.inner.details.lock().config.clone()
    }

    pub fn created(&self) -> i64 {
        self.inner.details.lock().created
    }

    pub fn created_by(&self) -> String {
        self.inner.details.lock().created_by.clone()
    }

    pub fn completed(&self) -> i64 {
        self.inner.details.lock().completed
    }

    pub fn completed_by(&self) -> String {
        self.inner.details.lock().completed_by.clone()
    }

    pub fn generation_id(&self) -> i64 {
        self.inner.details.lock().generation_id
    }

    pub fn details(&self) -> BranchChange {
        self.inner.details.lock().clone()
    }

    pub(crate) fn set_details(&self, details: BranchChange) {
        let mut current = self.inner.details.lock();
        self.inner.resident.set_removal_message(|| {
            RemoveBranch {
                model_uuid: details.model_uuid.clone(),
                id: details.id.clone(),
            }
            .into()
        });
        self.inner.resident.set_stale(false);
        *current = details;
    }
}

impl Cached for Branch {
    fn resident(&self) -> &Arc<Resident> {
        &self.inner.resident
    }
}
