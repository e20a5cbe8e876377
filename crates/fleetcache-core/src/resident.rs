// ── Resident lifecycle tracking ──
//
// Every cached entity embeds a `Resident`: a process-unique id, the set of
// background workers it owns, its staleness flag and the removal message
// the sweep synthesizes for it. The `ResidentManager` is the registry all
// residents of one controller live in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::model::Change;
use crate::worker::WorkerHandle;

// ── ResidentManager ──────────────────────────────────────────────────

/// Registry of every live resident belonging to one controller.
#[derive(Debug, Default)]
pub struct ResidentManager {
    next_id: AtomicU64,
    residents: DashMap<u64, Arc<Resident>>,
    marked: AtomicBool,
}

impl ResidentManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate and register a new resident with the next id.
    pub(crate) fn new_resident(&self) -> Arc<Resident> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let resident = Arc::new(Resident::new(id));
        self.residents.insert(id, Arc::clone(&resident));
        resident
    }

    /// Whether a resident with this id is still registered.
    pub fn is_resident(&self, id: u64) -> bool {
        self.residents.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.residents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residents.is_empty()
    }

    pub fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Acquire)
    }

    /// Flag every resident as stale. Subsequent applies clear the flag on
    /// whatever they touch.
    pub(crate) fn mark(&self) {
        for entry in &self.residents {
            entry.value().set_stale(true);
        }
        self.marked.store(true, Ordering::Release);
    }

    pub(crate) fn clear_mark(&self) {
        self.marked.store(false, Ordering::Release);
    }

    /// Removal messages for every stale resident, children before parents.
    /// Within one kind, the most recently created resident goes first.
    pub(crate) fn stale_removals(&self) -> Vec<Change> {
        let mut stale: Vec<(u64, Change)> = self
            .residents
            .iter()
            .filter(|entry| entry.value().is_stale())
            .filter_map(|entry| {
                let removal = entry.value().removal_message()?;
                Some((*entry.key(), removal))
            })
            .collect();

        stale.sort_by(|(a_id, a), (b_id, b)| {
            a.sweep_rank()
                .cmp(&b.sweep_rank())
                .then_with(|| b_id.cmp(a_id))
        });
        stale.into_iter().map(|(_, removal)| removal).collect()
    }

    /// Stop every worker the resident owns, then forget it.
    pub(crate) async fn evict(&self, resident: &Resident) {
        resident.kill_workers().await;
        self.residents.remove(&resident.cache_id());
        debug!(resident = resident.cache_id(), "resident evicted");
    }

    /// Stop the workers of every registered resident. Used when the
    /// controller shuts down.
    pub(crate) async fn kill_all(&self) {
        let residents: Vec<Arc<Resident>> = self
            .residents
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for resident in residents {
            resident.kill_workers().await;
        }
    }
}

// ── Resident ─────────────────────────────────────────────────────────

/// Lifecycle mixin shared by all cached entities.
#[derive(Debug)]
pub struct Resident {
    id: u64,
    next_worker_id: AtomicU64,
    workers: Mutex<HashMap<u64, WorkerHandle>>,
    removal: Mutex<Option<Change>>,
    stale: AtomicBool,
}

impl Resident {
    fn new(id: u64) -> Self {
        Self {
            id,
            next_worker_id: AtomicU64::new(0),
            workers: Mutex::new(HashMap::new()),
            removal: Mutex::new(None),
            stale: AtomicBool::new(false),
        }
    }

    /// Process-unique id of this resident.
    pub fn cache_id(&self) -> u64 {
        self.id
    }

    /// Track a worker whose lifetime is bounded by this resident.
    ///
    /// Registering the same worker twice yields two independent entries.
    pub fn register_worker(self: &Arc<Self>, worker: WorkerHandle) -> Registration {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.workers.lock().insert(id, worker);
        Registration {
            resident: Arc::downgrade(self),
            id,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn has_worker(&self, id: u64) -> bool {
        self.workers.lock().contains_key(&id)
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    pub(crate) fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::Release);
    }

    /// Remember the removal message. Only the first call has any effect.
    pub(crate) fn set_removal_message(&self, removal: impl FnOnce() -> Change) {
        let mut slot = self.removal.lock();
        if slot.is_none() {
            *slot = Some(removal());
        }
    }

    pub(crate) fn removal_message(&self) -> Option<Change> {
        self.removal.lock().clone()
    }

    /// Kill every owned worker, then wait for all of them to exit.
    ///
    /// The lock is released before waiting: worker teardown deregisters
    /// itself from this resident.
    pub(crate) async fn kill_workers(&self) {
        let workers: Vec<(u64, WorkerHandle)> = self
            .workers
            .lock()
            .iter()
            .map(|(id, worker)| (*id, worker.clone()))
            .collect();

        for (_, worker) in &workers {
            worker.kill();
        }
        for (id, worker) in workers {
            if let Err(e) = worker.wait().await {
                warn!(resident = self.id, worker = id, error = %e, "owned worker stopped with error");
            }
            self.workers.lock().remove(&id);
        }
    }

    fn deregister(&self, id: u64) {
        self.workers.lock().remove(&id);
    }
}

// ── Registration ─────────────────────────────────────────────────────

/// Returned by [`Resident::register_worker`]; releases the entry.
#[derive(Debug)]
#[must_use = "dropping a registration keeps the worker tracked until the resident dies"]
pub struct Registration {
    resident: Weak<Resident>,
    id: u64,
}

impl Registration {
    /// Id of the tracked entry within its resident.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop tracking the worker. Idempotent.
    pub fn deregister(&self) {
        if let Some(resident) = self.resident.upgrade() {
            resident.deregister(self.id);
        }
    }
}
