// Integration tests for the cache controller: apply loop, mark/sweep and
// the watchers it drives.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use fleetcache_core::{
    ApplicationChange, BranchChange, CacheError, CacheMetrics, Change, CharmChange, ConfigMap,
    Controller, ControllerConfig, LxdProfile, MachineChange, ModelChange, Port, RemoveApplication,
    RemoveBranch, RemoveCharm, RemoveMachine, RemoveModel, RemoveUnit, UnitChange,
};

const MODEL: &str = "m1";
const DELIVERY: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(100);

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    tx: mpsc::Sender<Change>,
    controller: Controller,
    seen: Arc<Mutex<Vec<Change>>>,
}

impl Harness {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let metrics = Arc::new(CacheMetrics::new().unwrap());
        let config =
            ControllerConfig::new(rx, metrics).with_notify(move |change| log.lock().push(change.clone()));
        let controller = Controller::new(config).unwrap();
        Self {
            tx,
            controller,
            seen,
        }
    }

    async fn apply(&self, changes: Vec<Change>) {
        for change in changes {
            self.tx.send(change).await.unwrap();
        }
        self.controller.flush().await.unwrap();
    }

    fn seen_kinds(&self) -> Vec<&'static str> {
        self.seen.lock().iter().map(Change::kind).collect()
    }

    fn clear_seen(&self) {
        self.seen.lock().clear();
    }

    async fn shutdown(self) {
        self.controller.kill();
        timeout(DELIVERY, self.controller.wait())
            .await
            .unwrap()
            .unwrap();
    }
}

fn model_change() -> Change {
    ModelChange {
        model_uuid: MODEL.into(),
        name: "demo".into(),
        owner: "admin".into(),
        config: ConfigMap::from([("key".to_owned(), json!("value"))]),
        ..ModelChange::default()
    }
    .into()
}

fn application_change(name: &str, charm_url: &str) -> Change {
    ApplicationChange {
        model_uuid: MODEL.into(),
        name: name.into(),
        charm_url: charm_url.into(),
        ..ApplicationChange::default()
    }
    .into()
}

fn charm_change(url: &str, profiled: bool) -> Change {
    let mut lxd_profile = LxdProfile::default();
    if profiled {
        lxd_profile
            .config
            .insert("security.nesting".into(), "true".into());
    }
    CharmChange {
        model_uuid: MODEL.into(),
        charm_url: url.into(),
        lxd_profile,
        ..CharmChange::default()
    }
    .into()
}

fn machine_change(id: &str) -> Change {
    MachineChange {
        model_uuid: MODEL.into(),
        id: id.into(),
        ..MachineChange::default()
    }
    .into()
}

fn provisioned_machine_change(id: &str) -> Change {
    MachineChange {
        model_uuid: MODEL.into(),
        id: id.into(),
        instance_id: format!("juju-{id}"),
        ..MachineChange::default()
    }
    .into()
}

fn unit_change(name: &str, application: &str, machine_id: &str) -> Change {
    UnitChange {
        model_uuid: MODEL.into(),
        name: name.into(),
        application: application.into(),
        machine_id: machine_id.into(),
        ..UnitChange::default()
    }
    .into()
}

fn branch_change() -> Change {
    BranchChange {
        model_uuid: MODEL.into(),
        id: "0".into(),
        name: "new-branch".into(),
        ..BranchChange::default()
    }
    .into()
}

fn populated_model() -> Vec<Change> {
    vec![
        model_change(),
        charm_change("cs:app-1", false),
        application_change("app", "cs:app-1"),
        machine_change("0"),
        unit_change("app/0", "app", "0"),
    ]
}

// ── Apply loop ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_model_add_then_remove() {
    let h = Harness::new();

    h.apply(vec![model_change()]).await;
    let model = h.controller.model(MODEL).unwrap();
    assert_eq!(model.name(), "demo");
    assert_eq!(h.controller.model_uuids(), vec![MODEL.to_owned()]);
    assert_eq!(h.controller.resident_count(), 1);
    assert!(h.controller.is_resident(model.cache_id()));

    h.apply(vec![RemoveModel { model_uuid: MODEL.into() }.into()])
        .await;
    let err = h.controller.model(MODEL).unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
    assert!(!h.controller.is_resident(model.cache_id()));
    assert_eq!(h.controller.resident_count(), 0);

    assert_eq!(h.seen_kinds(), vec!["model", "remove-model"]);
    h.shutdown().await;
}

#[tokio::test]
async fn test_entity_add_and_remove() {
    let h = Harness::new();
    h.apply(populated_model()).await;
    h.apply(vec![branch_change()]).await;

    let model = h.controller.model(MODEL).unwrap();
    let app = model.application("app").unwrap();
    let charm = model.charm("cs:app-1").unwrap();
    let machine = model.machine("0").unwrap();
    let unit = model.unit("app/0").unwrap();
    let branch = model.branch("new-branch").unwrap();
    assert_eq!(h.controller.resident_count(), 6);

    h.apply(vec![
        RemoveUnit {
            model_uuid: MODEL.into(),
            name: "app/0".into(),
        }
        .into(),
        RemoveMachine {
            model_uuid: MODEL.into(),
            id: "0".into(),
        }
        .into(),
        RemoveApplication {
            model_uuid: MODEL.into(),
            name: "app".into(),
        }
        .into(),
        RemoveCharm {
            model_uuid: MODEL.into(),
            charm_url: "cs:app-1".into(),
        }
        .into(),
        RemoveBranch {
            model_uuid: MODEL.into(),
            id: "0".into(),
        }
        .into(),
    ])
    .await;

    for id in [
        app.cache_id(),
        charm.cache_id(),
        machine.cache_id(),
        unit.cache_id(),
        branch.cache_id(),
    ] {
        assert!(!h.controller.is_resident(id));
    }
    assert!(model.application("app").unwrap_err().is_not_found());
    assert!(model.unit("app/0").unwrap_err().is_not_found());
    assert_eq!(h.controller.resident_count(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn test_removing_absent_entities_is_noop() {
    let h = Harness::new();
    h.apply(vec![
        RemoveModel {
            model_uuid: "missing".into(),
        }
        .into(),
        RemoveUnit {
            model_uuid: "missing".into(),
            name: "app/0".into(),
        }
        .into(),
    ])
    .await;
    h.apply(vec![model_change()]).await;
    h.apply(vec![
        RemoveMachine {
            model_uuid: MODEL.into(),
            id: "7".into(),
        }
        .into(),
    ])
    .await;

    assert!(h.controller.model("missing").unwrap_err().is_not_found());
    assert_eq!(h.controller.resident_count(), 1);
    assert_eq!(h.seen_kinds().len(), 4);
    assert!(!h.controller.handle().is_finished());
    h.shutdown().await;
}

#[tokio::test]
async fn test_last_write_wins_and_handles_see_updates() {
    let h = Harness::new();
    h.apply(vec![model_change(), machine_change("0")]).await;
    let machine = h.controller.model(MODEL).unwrap().machine("0").unwrap();
    assert!(machine.instance_id().unwrap_err().is_not_provisioned());

    h.apply(vec![provisioned_machine_change("0")]).await;
    assert_eq!(machine.instance_id().unwrap(), "juju-0");
    h.shutdown().await;
}

#[tokio::test]
async fn test_report() {
    let h = Harness::new();
    h.apply(populated_model()).await;
    h.apply(vec![branch_change()]).await;

    let report = h.controller.report();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(
        value,
        json!({
            MODEL: {
                "name": "admin/demo",
                "life": "alive",
                "application-count": 1,
                "charm-count": 1,
                "machine-count": 1,
                "unit-count": 1,
                "branch-count": 1,
            }
        })
    );
    h.shutdown().await;
}

#[tokio::test]
async fn test_metrics_track_applied_changes() {
    let h = Harness::new();
    h.apply(populated_model()).await;
    assert_eq!(h.controller.metrics().changes_applied.get(), 5);
    assert_eq!(h.controller.metrics().removals_synthesized.get(), 0);
    h.shutdown().await;
}

// ── Mark and sweep ──────────────────────────────────────────────────

#[tokio::test]
async fn test_sweep_removes_stale_children_first() {
    let h = Harness::new();
    h.apply(populated_model()).await;
    h.apply(vec![branch_change()]).await;
    h.clear_seen();

    h.controller.mark().await.unwrap();
    assert!(h.controller.marked());
    timeout(DELIVERY, h.controller.sweep())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        h.seen_kinds(),
        vec![
            "remove-unit",
            "remove-machine",
            "remove-application",
            "remove-charm",
            "remove-branch",
            "remove-model",
        ]
    );
    assert!(!h.controller.marked());
    assert_eq!(h.controller.resident_count(), 0);
    assert!(h.controller.model(MODEL).unwrap_err().is_not_found());
    assert_eq!(h.controller.metrics().removals_synthesized.get(), 6);
    h.shutdown().await;
}

#[tokio::test]
async fn test_sweep_after_full_refresh_removes_nothing() {
    let h = Harness::new();
    h.apply(populated_model()).await;
    let residents = h.controller.resident_count();

    h.controller.mark().await.unwrap();
    h.apply(populated_model()).await;
    h.clear_seen();
    h.controller.sweep().await.unwrap();

    assert!(h.seen_kinds().is_empty());
    assert!(!h.controller.marked());
    assert_eq!(h.controller.resident_count(), residents);
    h.shutdown().await;
}

#[tokio::test]
async fn test_sweep_keeps_refreshed_entities() {
    let h = Harness::new();
    h.apply(populated_model()).await;
    h.apply(vec![machine_change("1")]).await;

    h.controller.mark().await.unwrap();
    h.apply(populated_model()).await;
    h.clear_seen();
    h.controller.sweep().await.unwrap();

    let removed: Vec<Change> = h.seen.lock().clone();
    assert_eq!(
        removed,
        vec![Change::from(RemoveMachine {
            model_uuid: MODEL.into(),
            id: "1".into(),
        })]
    );
    assert!(h.controller.model(MODEL).unwrap().machine("0").is_ok());
    h.shutdown().await;
}

#[tokio::test]
async fn test_mark_applies_changes_queued_ahead() {
    let h = Harness::new();
    h.apply(populated_model()).await;

    // Still queued when mark is requested: it must not count as a refresh.
    h.tx.send(machine_change("1")).await.unwrap();
    h.controller.mark().await.unwrap();
    assert!(h.controller.model(MODEL).unwrap().machine("1").is_ok());

    h.apply(populated_model()).await;
    h.clear_seen();
    h.controller.sweep().await.unwrap();

    let removed: Vec<Change> = h.seen.lock().clone();
    assert_eq!(
        removed,
        vec![Change::from(RemoveMachine {
            model_uuid: MODEL.into(),
            id: "1".into(),
        })]
    );
    assert!(h.controller.model(MODEL).unwrap().machine("1").is_err());
    h.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_requests_are_served_under_a_busy_stream() {
    let h = Harness::new();
    h.apply(vec![model_change()]).await;

    let tx = h.tx.clone();
    let producer = tokio::spawn(async move {
        let mut sent = 0_u64;
        while tx.send(machine_change("0")).await.is_ok() {
            sent += 1;
        }
        sent
    });

    timeout(DELIVERY, h.controller.flush())
        .await
        .unwrap()
        .unwrap();
    timeout(DELIVERY, h.controller.mark())
        .await
        .unwrap()
        .unwrap();
    timeout(DELIVERY, h.controller.sweep())
        .await
        .unwrap()
        .unwrap();

    h.controller.kill();
    timeout(DELIVERY, h.controller.wait())
        .await
        .unwrap()
        .unwrap();
    drop(h);
    assert!(timeout(DELIVERY, producer).await.unwrap().unwrap() > 0);
}

#[tokio::test]
async fn test_sweep_without_mark_is_noop() {
    let h = Harness::new();
    h.apply(populated_model()).await;
    h.clear_seen();
    h.controller.sweep().await.unwrap();
    assert!(h.seen_kinds().is_empty());
    h.shutdown().await;
}

// ── Watchers ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_machine_watcher_delivers_new_ids_only() {
    let h = Harness::new();
    h.apply(vec![model_change(), machine_change("0")]).await;

    let model = h.controller.model(MODEL).unwrap();
    let mut watcher = model.watch_machines().unwrap();
    let first = timeout(DELIVERY, watcher.next()).await.unwrap();
    assert_eq!(first, Some(vec!["0".to_owned()]));

    h.apply(vec![machine_change("1")]).await;
    let next = timeout(DELIVERY, watcher.next()).await.unwrap();
    assert_eq!(next, Some(vec!["1".to_owned()]));

    h.apply(vec![machine_change("0")]).await;
    assert!(timeout(QUIET, watcher.next()).await.is_err());

    watcher.stop().await.unwrap();
    h.shutdown().await;
}

#[tokio::test]
async fn test_container_watcher_filters_by_host() {
    let h = Harness::new();
    h.apply(vec![model_change(), machine_change("2")]).await;

    let machine = h.controller.model(MODEL).unwrap().machine("2").unwrap();
    let mut watcher = machine.watch_containers().unwrap();
    let first = timeout(DELIVERY, watcher.next()).await.unwrap();
    assert_eq!(first, Some(Vec::new()));

    h.apply(vec![machine_change("2/lxd/0")]).await;
    let next = timeout(DELIVERY, watcher.next()).await.unwrap();
    assert_eq!(next, Some(vec!["2/lxd/0".to_owned()]));

    h.apply(vec![machine_change("3"), machine_change("3/lxd/0")])
        .await;
    assert!(timeout(QUIET, watcher.next()).await.is_err());

    watcher.stop().await.unwrap();
    h.shutdown().await;
}

#[tokio::test]
async fn test_removing_entity_stops_its_watchers() {
    let h = Harness::new();
    h.apply(vec![model_change(), machine_change("0")]).await;

    let machine = h.controller.model(MODEL).unwrap().machine("0").unwrap();
    let watcher = machine.watch_config(&["key"]);

    h.apply(vec![
        RemoveMachine {
            model_uuid: MODEL.into(),
            id: "0".into(),
        }
        .into(),
    ])
    .await;
    assert!(watcher.handle().is_finished());
    assert_eq!(watcher.wait().await, Ok(()));
    h.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_every_watcher() {
    let h = Harness::new();
    h.apply(vec![model_change(), machine_change("0")]).await;
    let model = h.controller.model(MODEL).unwrap();
    let config = model.watch_config::<&str>(&[]);
    let machines = model.watch_machines().unwrap();

    h.shutdown().await;
    assert!(config.handle().is_finished());
    assert!(machines.handle().is_finished());
}

#[tokio::test]
async fn test_model_config_watcher() {
    let h = Harness::new();
    h.apply(vec![model_change()]).await;
    let model = h.controller.model(MODEL).unwrap();
    let mut watcher = model.watch_config(&["key"]);
    assert_eq!(timeout(DELIVERY, watcher.next()).await.unwrap(), Some(()));

    let mut change = ModelChange {
        model_uuid: MODEL.into(),
        name: "demo".into(),
        owner: "admin".into(),
        config: ConfigMap::from([
            ("key".to_owned(), json!("value")),
            ("other".to_owned(), json!(1)),
        ]),
        ..ModelChange::default()
    };
    h.apply(vec![change.clone().into()]).await;
    assert!(timeout(QUIET, watcher.next()).await.is_err());

    change.config.insert("key".into(), json!("changed"));
    h.apply(vec![change.into()]).await;
    assert_eq!(timeout(DELIVERY, watcher.next()).await.unwrap(), Some(()));

    watcher.stop().await.unwrap();
    h.shutdown().await;
}

#[tokio::test]
async fn test_lxd_profile_watcher() {
    let h = Harness::new();
    h.apply(vec![
        model_change(),
        charm_change("cs:plain-1", false),
        charm_change("cs:profiled-1", true),
        application_change("plain", "cs:plain-1"),
        application_change("profiled", "cs:profiled-1"),
        provisioned_machine_change("0"),
        unit_change("plain/0", "plain", "0"),
    ])
    .await;

    let machine = h.controller.model(MODEL).unwrap().machine("0").unwrap();
    let mut watcher = machine.watch_lxd_profile_verification_needed().unwrap();
    assert_eq!(timeout(DELIVERY, watcher.next()).await.unwrap(), Some(()));

    // A unit without a profile changes nothing.
    h.apply(vec![unit_change("plain/1", "plain", "0")]).await;
    assert!(timeout(QUIET, watcher.next()).await.is_err());

    h.apply(vec![unit_change("profiled/0", "profiled", "0")])
        .await;
    assert_eq!(timeout(DELIVERY, watcher.next()).await.unwrap(), Some(()));

    h.apply(vec![
        charm_change("cs:profiled-2", true),
        application_change("profiled", "cs:profiled-2"),
    ])
    .await;
    assert_eq!(timeout(DELIVERY, watcher.next()).await.unwrap(), Some(()));

    let metrics = h.controller.metrics();
    assert!(metrics.lxd_profile_change_notification.get() >= 2);
    assert!(metrics.lxd_profile_no_change.get() >= 1);

    watcher.stop().await.unwrap();
    h.shutdown().await;
}

// ── Relationships ───────────────────────────────────────────────────

#[tokio::test]
async fn test_machine_units_follow_principals() {
    let h = Harness::new();
    let mut subordinate = UnitChange {
        model_uuid: MODEL.into(),
        name: "logging/0".into(),
        application: "logging".into(),
        principal: "app/0".into(),
        subordinate: true,
        ..UnitChange::default()
    };
    h.apply(populated_model()).await;
    h.apply(vec![subordinate.clone().into()]).await;

    let machine = h.controller.model(MODEL).unwrap().machine("0").unwrap();
    let names: Vec<String> = machine.units().unwrap().iter().map(|u| u.name()).collect();
    assert_eq!(names, vec!["app/0", "logging/0"]);

    subordinate.name = "logging/1".into();
    subordinate.principal = "app/9".into();
    h.apply(vec![subordinate.into()]).await;
    assert!(matches!(
        machine.units(),
        Err(CacheError::Inconsistent { .. })
    ));
    h.shutdown().await;
}

#[tokio::test]
async fn test_copy_out_isolation() {
    let h = Harness::new();
    let mut unit = UnitChange {
        model_uuid: MODEL.into(),
        name: "app/0".into(),
        application: "app".into(),
        ..UnitChange::default()
    };
    unit.ports.push(Port::tcp(80));
    h.apply(vec![model_change(), unit.into()]).await;

    let cached = h.controller.model(MODEL).unwrap().unit("app/0").unwrap();
    let mut ports = cached.ports();
    ports.push(Port::tcp(443));
    assert_eq!(cached.ports(), vec![Port::tcp(80)]);
    h.shutdown().await;
}
