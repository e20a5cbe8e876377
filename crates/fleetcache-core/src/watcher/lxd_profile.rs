// ── Machine LXD profile watcher ──
//
// Composite watcher: several hub topics only wake the loop, which then
// recomputes which applications on the machine carry a charm with a
// non-empty LXD profile. A signal goes out only when that set moved.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::notify::{Notifier, NotifyWatcher};
use crate::error::CacheError;
use crate::hub::{Topic, TopicKind};
use crate::store::{Cached, Machine};
use crate::worker::new_worker;

/// Application name -> charm URL, for every application on the machine
/// whose charm ships a non-empty profile. `None` while unprovisioned.
type ProfileState = Option<BTreeMap<String, String>>;

pub(crate) fn spawn_lxd_profile_watcher(machine: &Machine) -> Result<NotifyWatcher, CacheError> {
    let initial = profile_state(machine)?;

    let (notifier, rx) = Notifier::channel();
    notifier.notify();

    let wake = Arc::new(Notify::new());
    let hub = machine.hub();
    let topics = [
        Topic::global(TopicKind::ApplicationCharmUrlChange),
        Topic::instance(TopicKind::MachineProvisioned, machine.id()),
        Topic::global(TopicKind::ModelUnitAdd),
        Topic::global(TopicKind::ModelUnitRemove),
    ];
    let subscriptions: Vec<_> = topics
        .into_iter()
        .map(|topic| {
            let wake = Arc::clone(&wake);
            hub.subscribe(topic, move |_| wake.notify_one())
        })
        .collect();

    let (handle, tomb) = new_worker();
    let registration = machine.resident().register_worker(handle.clone());
    let cancel = tomb.token();
    let machine = machine.clone();
    tomb.go(async move {
        let result = watch_loop(&machine, initial, &wake, &notifier, &cancel).await;
        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        registration.deregister();
        result
    });

    Ok(NotifyWatcher::from_parts(handle, rx))
}

async fn watch_loop(
    machine: &Machine,
    mut last: ProfileState,
    wake: &Notify,
    notifier: &Notifier,
    cancel: &CancellationToken,
) -> Result<(), CacheError> {
    let metrics = Arc::clone(machine.metrics());
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            () = notifier.closed() => return Ok(()),
            () = wake.notified() => {}
        }

        let current = match profile_state(machine) {
            Ok(current) => current,
            Err(e @ CacheError::Inconsistent { .. }) => {
                metrics.lxd_profile_change_error.inc();
                warn!(machine = %machine.id(), error = %e, "lxd profile check failed");
                continue;
            }
            Err(e) => {
                metrics.lxd_profile_change_error.inc();
                return Err(e);
            }
        };

        if !needs_notification(last.as_ref(), current.as_ref()) {
            metrics.lxd_profile_no_change.inc();
            last = current;
            continue;
        }

        debug!(machine = %machine.id(), "lxd profile verification needed");
        metrics.lxd_profile_change_notification.inc();
        notifier.notify();
        last = current;
    }
}

/// A change is worth a signal when the machine is provisioned and the
/// profile set differs, unless the machine just got provisioned without
/// any profiled application on it.
fn needs_notification(
    last: Option<&BTreeMap<String, String>>,
    current: Option<&BTreeMap<String, String>>,
) -> bool {
    match (last, current) {
        (_, None) => false,
        (None, Some(current)) => !current.is_empty(),
        (Some(last), Some(current)) => last != current,
    }
}

fn profile_state(machine: &Machine) -> Result<ProfileState, CacheError> {
    if !machine.is_provisioned() {
        return Ok(None);
    }
    let model = machine.model()?;

    let mut profiled = BTreeMap::new();
    for unit in machine.units()? {
        let name = unit.application();
        let Ok(application) = model.application(&name) else {
            continue;
        };
        let charm_url = application.charm_url();
        let Ok(charm) = model.charm(&charm_url) else {
            continue;
        };
        if !charm.lxd_profile().is_empty() {
            profiled.insert(name, charm_url);
        }
    }
    Ok(Some(profiled))
}
