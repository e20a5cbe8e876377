// ── Controller ──
//
// Owns every cached model and the single apply loop that mutates them.
// All writes happen on that loop; any number of callers read through the
// `Model` handles it hands out. Mark-and-sweep reconciles the cache
// against a full upstream resync.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{ControllerConfig, NotifyHook};
use crate::error::CacheError;
use crate::metrics::CacheMetrics;
use crate::model::Change;
use crate::resident::ResidentManager;
use crate::store::{Model, ModelReport};
use crate::worker::{WorkerHandle, new_worker};

const CONTROL_CHANNEL_SIZE: usize = 8;

// ── Control requests ─────────────────────────────────────────────────

/// Requests executed on the apply loop. Every change already queued when
/// a request is picked up is applied before the request itself.
enum Control {
    /// Flag every cached entity as stale.
    Mark { done: oneshot::Sender<()> },
    /// Remove every stale entity, then clear the mark.
    Sweep {
        done: oneshot::Sender<Result<(), CacheError>>,
    },
    /// Acknowledge once every change queued ahead has been applied.
    Flush { done: oneshot::Sender<()> },
    /// Fail the loop as if applying a change had failed.
    #[cfg(test)]
    Fail { message: String },
}

// ── Controller ───────────────────────────────────────────────────────

/// The entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. The apply loop starts in
/// [`new`](Self::new) and runs until killed, until the change channel
/// closes, or until applying a change fails.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    models: RwLock<HashMap<String, Model>>,
    manager: Arc<ResidentManager>,
    metrics: Arc<CacheMetrics>,
    notify: Option<NotifyHook>,
    control_tx: mpsc::Sender<Control>,
    worker: WorkerHandle,
}

impl Controller {
    /// Validate `config` and start the apply loop on the ambient tokio
    /// runtime.
    pub fn new(mut config: ControllerConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let changes = config.changes.take().ok_or_else(|| CacheError::NotValid {
            message: "missing change channel".into(),
        })?;

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        let (worker, tomb) = new_worker();
        let controller = Self {
            inner: Arc::new(ControllerInner {
                models: RwLock::new(HashMap::new()),
                manager: ResidentManager::new(),
                metrics: config.metrics,
                notify: config.notify,
                control_tx,
                worker,
            }),
        };

        let cancel = tomb.token();
        let looped = controller.clone();
        tomb.go(async move { looped.run(changes, control_rx, cancel).await });

        info!("cache controller started");
        Ok(controller)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// The cached model with this uuid.
    pub fn model(&self, uuid: &str) -> Result<Model, CacheError> {
        self.inner
            .models
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| CacheError::not_found("model", uuid))
    }

    /// Uuids of every cached model, sorted.
    pub fn model_uuids(&self) -> Vec<String> {
        let mut uuids: Vec<String> = self.inner.models.read().keys().cloned().collect();
        uuids.sort();
        uuids
    }

    /// Per-model summary, keyed by model uuid.
    pub fn report(&self) -> BTreeMap<String, ModelReport> {
        let models: Vec<(String, Model)> = self
            .inner
            .models
            .read()
            .iter()
            .map(|(uuid, model)| (uuid.clone(), model.clone()))
            .collect();
        models
            .into_iter()
            .map(|(uuid, model)| (uuid, model.report()))
            .collect()
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.inner.metrics
    }

    /// Number of live residents (models and every entity in them).
    pub fn resident_count(&self) -> usize {
        self.inner.manager.len()
    }

    pub fn is_resident(&self, cache_id: u64) -> bool {
        self.inner.manager.is_resident(cache_id)
    }

    // ── Mark and sweep ───────────────────────────────────────────────

    /// Flag every cached entity as stale. Entities refreshed by a change
    /// before the next [`sweep`](Self::sweep) survive it.
    ///
    /// Ordered against the change stream like [`sweep`](Self::sweep):
    /// changes sent before this call are applied first, so they cannot
    /// refresh an entity after the mark.
    pub async fn mark(&self) -> Result<(), CacheError> {
        let (done, rx) = oneshot::channel();
        self.request(Control::Mark { done }).await?;
        rx.await.map_err(|_| CacheError::Stopped)
    }

    pub fn marked(&self) -> bool {
        self.inner.manager.is_marked()
    }

    /// Remove every entity still stale since the last [`mark`](Self::mark),
    /// units first and models last. Runs on the apply loop once the
    /// changes already queued have been applied; resolves after every
    /// removal was applied and the mark cleared.
    pub async fn sweep(&self) -> Result<(), CacheError> {
        let (done, rx) = oneshot::channel();
        self.request(Control::Sweep { done }).await?;
        rx.await.map_err(|_| CacheError::Stopped)?
    }

    /// Resolve once every change sent before this call has been applied.
    pub async fn flush(&self) -> Result<(), CacheError> {
        let (done, rx) = oneshot::channel();
        self.request(Control::Flush { done }).await?;
        rx.await.map_err(|_| CacheError::Stopped)
    }

    async fn request(&self, request: Control) -> Result<(), CacheError> {
        self.inner
            .control_tx
            .send(request)
            .await
            .map_err(|_| CacheError::Stopped)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Request the apply loop to stop. Returns immediately.
    pub fn kill(&self) {
        self.inner.worker.kill();
    }

    /// Wait for the apply loop to exit and every owned watcher to stop.
    /// Returns the error that terminated the loop, if any.
    pub async fn wait(&self) -> Result<(), CacheError> {
        self.inner.worker.wait().await
    }

    pub fn handle(&self) -> WorkerHandle {
        self.inner.worker.clone()
    }

    // ── Apply loop ───────────────────────────────────────────────────

    async fn run(
        &self,
        mut changes: mpsc::Receiver<Change>,
        mut control: mpsc::Receiver<Control>,
        cancel: CancellationToken,
    ) -> Result<(), CacheError> {
        let result = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                Some(request) = control.recv() => {
                    if let Err(e) = self.serve(request, &mut changes).await {
                        break Err(e);
                    }
                }
                change = changes.recv() => {
                    let Some(change) = change else {
                        break Err(CacheError::StreamClosed { stream: "changes".into() });
                    };
                    if let Err(e) = self.apply_and_notify(change).await {
                        break Err(e);
                    }
                }
            }
        };

        match &result {
            Ok(()) => info!("cache controller stopping"),
            Err(e) => error!(error = %e, "cache controller stopped with error"),
        }
        self.inner.manager.kill_all().await;
        result
    }

    async fn apply_and_notify(&self, change: Change) -> Result<(), CacheError> {
        debug!(kind = change.kind(), model = change.model_uuid(), "applying change");
        self.apply(&change).await?;
        self.inner.metrics.changes_applied.inc();
        if let Some(notify) = &self.inner.notify {
            notify(&change);
        }
        Ok(())
    }

    /// Apply the changes queued ahead of `request`, then execute it. Only
    /// what is queued now is drained; a busy producer delays a request by
    /// at most one channel's worth of changes.
    async fn serve(
        &self,
        request: Control,
        changes: &mut mpsc::Receiver<Change>,
    ) -> Result<(), CacheError> {
        for _ in 0..changes.len() {
            let Ok(change) = changes.try_recv() else {
                break;
            };
            self.apply_and_notify(change).await?;
        }

        match request {
            Control::Mark { done } => {
                self.inner.manager.mark();
                debug!(residents = self.inner.manager.len(), "cache marked");
                let _ = done.send(());
                Ok(())
            }
            Control::Sweep { done } => {
                let result = self.run_sweep().await;
                let _ = done.send(result.clone());
                result
            }
            Control::Flush { done } => {
                let _ = done.send(());
                Ok(())
            }
            #[cfg(test)]
            Control::Fail { message } => Err(CacheError::Apply { message }),
        }
    }

    async fn run_sweep(&self) -> Result<(), CacheError> {
        let removals = self.inner.manager.stale_removals();
        info!(removals = removals.len(), "sweeping stale entities");
        for removal in removals {
            self.inner.metrics.removals_synthesized.inc();
            self.apply_and_notify(removal).await?;
        }
        self.inner.manager.clear_mark();
        Ok(())
    }

    async fn apply(&self, change: &Change) -> Result<(), CacheError> {
        let manager = &self.inner.manager;
        match change {
            Change::Model(details) => self
                .ensure_model(&details.model_uuid)
                .set_details(details.clone())
                .map_err(fatal),
            Change::RemoveModel(removal) => {
                let removed = self.inner.models.write().remove(&removal.model_uuid);
                if let Some(model) = removed {
                    model.remove_all(manager).await;
                    debug!(model = %removal.model_uuid, "model removed");
                }
                Ok(())
            }
            Change::Application(details) => self
                .ensure_model(&details.model_uuid)
                .update_application(details.clone(), manager)
                .map_err(fatal),
            Change::RemoveApplication(removal) => {
                if let Ok(model) = self.model(&removal.model_uuid) {
                    model.remove_application(&removal.name, manager).await;
                }
                Ok(())
            }
            Change::Charm(details) => self
                .ensure_model(&details.model_uuid)
                .update_charm(details.clone(), manager)
                .map_err(fatal),
            Change::RemoveCharm(removal) => {
                if let Ok(model) = self.model(&removal.model_uuid) {
                    model.remove_charm(&removal.charm_url, manager).await;
                }
                Ok(())
            }
            Change::Machine(details) => self
                .ensure_model(&details.model_uuid)
                .update_machine(details.clone(), manager)
                .map_err(fatal),
            Change::RemoveMachine(removal) => {
                if let Ok(model) = self.model(&removal.model_uuid) {
                    model.remove_machine(&removal.id, manager).await;
                }
                Ok(())
            }
            Change::Unit(details) => {
                self.ensure_model(&details.model_uuid)
                    .update_unit(details.clone(), manager);
                Ok(())
            }
            Change::RemoveUnit(removal) => {
                if let Ok(model) = self.model(&removal.model_uuid) {
                    model.remove_unit(&removal.name, manager).await;
                }
                Ok(())
            }
            Change::Branch(details) => {
                self.ensure_model(&details.model_uuid)
                    .update_branch(details.clone(), manager);
                Ok(())
            }
            Change::RemoveBranch(removal) => {
                if let Ok(model) = self.model(&removal.model_uuid) {
                    model.remove_branch(&removal.id, manager).await;
                }
                Ok(())
            }
        }
    }

    /// The model with this uuid, created empty when absent.
    fn ensure_model(&self, uuid: &str) -> Model {
        if let Some(model) = self.inner.models.read().get(uuid) {
            return model.clone();
        }
        self.inner
            .models
            .write()
            .entry(uuid.to_owned())
            .or_insert_with(|| {
                debug!(model = uuid, "model created");
                Model::new(
                    uuid,
                    self.inner.manager.new_resident(),
                    Arc::clone(&self.inner.metrics),
                )
            })
            .clone()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("models", &self.inner.models.read().len())
            .field("residents", &self.inner.manager.len())
            .field("marked", &self.inner.manager.is_marked())
            .finish_non_exhaustive()
    }
}

/// Everything surfaced while applying a change ends the loop. Errors that
/// already describe an apply failure pass through unchanged.
fn fatal(e: CacheError) -> CacheError {
    match e {
        CacheError::Apply { .. } => e,
        other => CacheError::Apply {
            message: other.to_string(),
        },
    }
}
