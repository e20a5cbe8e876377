// ── NotifyWatcher ──
//
// Content-free change signal over a capacity-1 channel. Hub handlers
// write straight into the channel with `try_send`, so a burst of changes
// while the consumer is busy collapses into one pending signal and the
// apply loop never waits on a slow consumer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::CacheError;
use crate::hub::Subscription;
use crate::resident::Resident;
use crate::worker::{WorkerHandle, new_worker};

/// Sending half handed to hub handlers.
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    tx: mpsc::Sender<()>,
}

impl Notifier {
    /// Capacity-1 signal channel.
    pub(crate) fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Resolves once the consumer dropped its receiver.
    pub(crate) async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Queue a signal unless one is already pending.
    pub(crate) fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(()) | TrySendError::Closed(())) => false,
        }
    }
}

/// Watcher that delivers `()` whenever its condition may have changed.
#[derive(Debug)]
pub struct NotifyWatcher {
    handle: WorkerHandle,
    rx: mpsc::Receiver<()>,
}

impl NotifyWatcher {
    /// Start a watcher owned by `resident`.
    ///
    /// `subscribe` receives the notifier and returns the hub subscriptions
    /// that drive it. With `initial` set, a signal is pending before any
    /// subscription exists.
    pub(crate) fn spawn<F>(resident: &Arc<Resident>, initial: bool, subscribe: F) -> Self
    where
        F: FnOnce(&Notifier) -> Vec<Subscription>,
    {
        let (notifier, rx) = Notifier::channel();
        if initial {
            notifier.notify();
        }
        let subscriptions = subscribe(&notifier);

        let (handle, tomb) = new_worker();
        let registration = resident.register_worker(handle.clone());
        let cancel = tomb.token();
        tomb.go(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = notifier.closed() => {}
            }
            for subscription in &subscriptions {
                subscription.unsubscribe();
            }
            registration.deregister();
            Ok(())
        });

        Self { handle, rx }
    }

    /// Wrap a worker started elsewhere that signals through `rx`.
    pub(crate) fn from_parts(handle: WorkerHandle, rx: mpsc::Receiver<()>) -> Self {
        Self { handle, rx }
    }

    /// The signal channel. At most one signal is ever pending.
    pub fn changes(&mut self) -> &mut mpsc::Receiver<()> {
        &mut self.rx
    }

    /// Wait for the next signal. `None` once the watcher has stopped and
    /// the pending signal (if any) was consumed.
    pub async fn next(&mut self) -> Option<()> {
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

    /// Kill and wait.
    pub async fn stop(&self) -> Result<(), CacheError> {
        self.handle.stop().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::hub::{Hub, HubMessage, Topic, TopicKind};
    use crate::resident::ResidentManager;

    fn topic() -> Topic {
        Topic::global(TopicKind::ModelUnitAdd)
    }

    #[tokio::test]
    async fn bursts_coalesce_into_one_signal() {
        let manager = ResidentManager::new();
        let resident = manager.new_resident();
        let hub = Hub::new();

        let mut watcher = NotifyWatcher::spawn(&resident, true, |notifier| {
            let notifier = notifier.clone();
            vec![hub.subscribe(topic(), move |_| {
                notifier.notify();
            })]
        });

        for _ in 0..5 {
            hub.publish(&topic(), &HubMessage::Signal);
        }

        assert_eq!(watcher.changes().try_recv().ok(), Some(()));
        assert!(watcher.changes().try_recv().is_err());

        hub.publish(&topic(), &HubMessage::Signal);
        assert_eq!(watcher.changes().try_recv().ok(), Some(()));

        watcher.stop().await.ok();
    }

    #[tokio::test]
    async fn kill_unsubscribes_and_deregisters() {
        let manager = ResidentManager::new();
        let resident = manager.new_resident();
        let hub = Hub::new();

        let watcher = NotifyWatcher::spawn(&resident, false, |notifier| {
            let notifier = notifier.clone();
            vec![hub.subscribe(topic(), move |_| {
                notifier.notify();
            })]
        });
        assert_eq!(resident.worker_count(), 1);
        assert_eq!(hub.subscriber_count(&topic()), 1);

        assert_eq!(watcher.stop().await, Ok(()));
        assert_eq!(resident.worker_count(), 0);
        assert_eq!(hub.subscriber_count(&topic()), 0);
    }

    #[tokio::test]
    async fn dropping_the_watcher_stops_it() {
        let manager = ResidentManager::new();
        let resident = manager.new_resident();
        let hub = Hub::new();

        let watcher = NotifyWatcher::spawn(&resident, true, |notifier| {
            let notifier = notifier.clone();
            vec![hub.subscribe(topic(), move |_| {
                notifier.notify();
            })]
        });
        let handle = watcher.handle();
        drop(watcher);

        let result = timeout(Duration::from_secs(5), handle.wait()).await;
        assert_eq!(result.ok(), Some(Ok(())));
        assert_eq!(hub.subscriber_count(&topic()), 0);
    }
}
