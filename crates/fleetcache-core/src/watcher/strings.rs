// ── StringsWatcher / PredicateStringsWatcher ──
//
// Delivers batches of ids. The first batch is the seed the watcher was
// built with, sent even when empty. After that, hub handlers append ids
// to a pending list and wake the loop; the loop reserves channel capacity
// before draining the list, so ids keep accumulating while the consumer
// is behind and no delivery is ever dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;
use crate::hub::Subscription;
use crate::resident::Resident;
use crate::worker::{WorkerHandle, new_worker};

/// Filter applied to every id before it reaches the pending list.
pub type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Default)]
struct Pending {
    ids: Mutex<Vec<String>>,
    wake: Notify,
}

/// Input side handed to hub handlers.
#[derive(Clone)]
pub(crate) struct StringsFeed {
    pending: Arc<Pending>,
    predicate: Option<Predicate>,
}

impl StringsFeed {
    /// Queue `ids` for the next delivery. Ids already pending are not
    /// repeated; ids rejected by the predicate are dropped.
    pub(crate) fn push<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = false;
        {
            let mut pending = self.pending.ids.lock();
            for id in ids {
                let id = id.as_ref();
                if !self.accepts(id) || pending.iter().any(|p| p == id) {
                    continue;
                }
                pending.push(id.to_owned());
                added = true;
            }
        }
        if added {
            self.pending.wake.notify_one();
        }
    }

    fn accepts(&self, id: &str) -> bool {
        self.predicate.as_ref().is_none_or(|predicate| predicate(id))
    }
}

/// Watcher delivering batches of changed ids.
#[derive(Debug)]
pub struct StringsWatcher {
    handle: WorkerHandle,
    rx: mpsc::Receiver<Vec<String>>,
}

/// A [`StringsWatcher`] that only tracks ids satisfying a predicate.
pub type PredicateStringsWatcher = StringsWatcher;

impl StringsWatcher {
    /// Start a watcher owned by `resident`. `initial` is the first delivery.
    #[cfg(test)]
    pub(crate) fn spawn<F>(resident: &Arc<Resident>, initial: Vec<String>, subscribe: F) -> Self
    where
        F: FnOnce(&StringsFeed) -> Vec<Subscription>,
    {
        Self::spawn_inner(resident, initial, None, subscribe)
    }

    /// Start a watcher whose seed and later ids are filtered by `predicate`.
    pub(crate) fn spawn_filtered<F>(
        resident: &Arc<Resident>,
        initial: Vec<String>,
        predicate: Predicate,
        subscribe: F,
    ) -> PredicateStringsWatcher
    where
        F: FnOnce(&StringsFeed) -> Vec<Subscription>,
    {
        let initial = initial.into_iter().filter(|id| predicate(id)).collect();
        Self::spawn_inner(resident, initial, Some(predicate), subscribe)
    }

    fn spawn_inner<F>(
        resident: &Arc<Resident>,
        initial: Vec<String>,
        predicate: Option<Predicate>,
        subscribe: F,
    ) -> Self
    where
        F: FnOnce(&StringsFeed) -> Vec<Subscription>,
    {
        let (tx, rx) = mpsc::channel(1);
        let pending = Arc::new(Pending::default());
        let feed = StringsFeed {
            pending: Arc::clone(&pending),
            predicate,
        };
        let subscriptions = subscribe(&feed);

        let (handle, tomb) = new_worker();
        let registration = resident.register_worker(handle.clone());
        let cancel = tomb.token();
        tomb.go(async move {
            deliver(initial, &pending, &tx, &cancel).await;
            for subscription in &subscriptions {
                subscription.unsubscribe();
            }
            registration.deregister();
            Ok(())
        });

        Self { handle, rx }
    }

    /// The delivery channel.
    pub fn changes(&mut self) -> &mut mpsc::Receiver<Vec<String>> {
        &mut self.rx
    }

    pub async fn next(&mut self) -> Option<Vec<String>> {
        self.rx.recv().await
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn kill(&self) {
        self.handle.kill();
    }

    pub async fn wait(&self) -> Result<(), CacheError> {
        self.handle.wait().await
    }

    pub async fn stop(&self) -> Result<(), CacheError> {
        self.handle.stop().await
    }
}

/// Loop body. Returns when cancelled or when the consumer went away.
async fn deliver(
    initial: Vec<String>,
    pending: &Pending,
    tx: &mpsc::Sender<Vec<String>>,
    cancel: &CancellationToken,
) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        sent = tx.send(initial) => {
            if sent.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tx.closed() => return,
            () = pending.wake.notified() => {}
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let ids = std::mem::take(&mut *pending.ids.lock());
        if ids.is_empty() {
            continue;
        }
        permit.send(ids);
    }
}
