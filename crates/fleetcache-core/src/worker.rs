// ── Worker lifecycle plumbing ──
//
// Every long-lived loop in the cache (the controller's apply loop and each
// watcher) is a tokio task paired with a cancellation token and a `watch`
// slot for its terminal result. `WorkerHandle` is the consumer side:
// `kill()` requests a stop, `wait()` resolves once the loop has exited and
// released everything it owned.

use std::future::Future;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;

type Outcome = Option<Result<(), CacheError>>;

/// Cloneable control handle for a running worker loop.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    done: watch::Receiver<Outcome>,
}

impl WorkerHandle {
    /// Request the worker to stop. Idempotent, returns immediately.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    /// Whether a stop has been requested or the loop already exited.
    pub fn is_dying(&self) -> bool {
        self.cancel.is_cancelled() || self.is_finished()
    }

    /// Whether the loop has exited and reported its result.
    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// Wait for the loop to exit, returning its terminal result.
    ///
    /// Any number of callers may wait; each sees the same result.
    pub async fn wait(&self) -> Result<(), CacheError> {
        let mut done = self.done.clone();
        let outcome = match done.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => {
                return Err(CacheError::Internal(
                    "worker exited without reporting a result".into(),
                ));
            }
        };
        outcome.unwrap_or(Ok(()))
    }

    /// Kill and wait in one step.
    pub async fn stop(&self) -> Result<(), CacheError> {
        self.kill();
        self.wait().await
    }
}

/// Task-side half of a worker: owns the result slot.
pub(crate) struct Tomb {
    cancel: CancellationToken,
    done: watch::Sender<Outcome>,
}

impl Tomb {
    /// Token that fires once `kill()` has been called on any handle.
    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the worker loop. Its result is published to every handle.
    pub(crate) fn go<F>(self, fut: F)
    where
        F: Future<Output = Result<(), CacheError>> + Send + 'static,
    {
        tokio::spawn(async move {
            let result = fut.await;
            self.done.send_replace(Some(result));
        });
    }
}

/// Create a connected handle/tomb pair. The handle can be registered with
/// an owner before the loop is spawned, so teardown never races
/// registration.
pub(crate) fn new_worker() -> (WorkerHandle, Tomb) {
    let cancel = CancellationToken::new();
    let (done_tx, done_rx) = watch::channel(None);
    (
        WorkerHandle {
            cancel: cancel.clone(),
            done: done_rx,
        },
        Tomb {
            cancel,
            done: done_tx,
        },
    )
}
