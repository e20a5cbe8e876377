// ── Config watchers ──
//
// A NotifyWatcher over an entity's config-change topic. Each publish
// carries the new snapshot's hash cache; the watcher asks it for the hash
// of the keys it was built with and signals only when that hash moved.

use std::sync::Arc;

use parking_lot::Mutex;

use super::notify::NotifyWatcher;
use crate::hash::HashCache;
use crate::hub::{Hub, HubMessage, Topic};
use crate::resident::Resident;

/// Build a config watcher seeded from `current`. The initial signal is
/// always pending.
pub(crate) fn spawn_config_watcher(
    resident: &Arc<Resident>,
    hub: &Hub,
    topic: Topic,
    current: &HashCache,
    keys: Vec<String>,
) -> NotifyWatcher {
    let last = Mutex::new(current.hash(&keys));

    NotifyWatcher::spawn(resident, true, |notifier| {
        let notifier = notifier.clone();
        vec![hub.subscribe(topic, move |message| {
            let HubMessage::ConfigHashes(hashes) = message else {
                return;
            };
            let hash = hashes.hash(&keys);
            let changed = {
                let mut last = last.lock();
                if *last == hash {
                    false
                } else {
                    *last = hash;
                    true
                }
            };
            if changed {
                notifier.notify();
            }
        })]
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use prometheus::IntCounter;
    use serde_json::json;

    use super::*;
    use crate::hub::TopicKind;
    use crate::model::ConfigMap;
    use crate::resident::ResidentManager;

    fn hashes(key: &str, another: &str) -> Arc<HashCache> {
        let config = ConfigMap::from([
            ("key".to_owned(), json!(key)),
            ("another".to_owned(), json!(another)),
        ]);
        let hit = IntCounter::new("hit", "hit").unwrap();
        let miss = IntCounter::new("miss", "miss").unwrap();
        Arc::new(HashCache::new(config, hit, miss).unwrap())
    }

    #[tokio::test]
    async fn only_watched_keys_trigger() {
        let manager = ResidentManager::new();
        let resident = manager.new_resident();
        let hub = Hub::new();
        let topic = Topic::global(TopicKind::ModelConfigChange);

        let mut watcher = spawn_config_watcher(
            &resident,
            &hub,
            topic.clone(),
            &hashes("value", "foo"),
            vec!["key".into()],
        );
        assert_eq!(watcher.changes().try_recv().ok(), Some(()));

        hub.publish(
            &topic,
            &HubMessage::ConfigHashes(hashes("value", "changed")),
        );
        assert!(watcher.changes().try_recv().is_err());

        hub.publish(
            &topic,
            &HubMessage::ConfigHashes(hashes("changed", "changed")),
        );
        assert_eq!(watcher.changes().try_recv().ok(), Some(()));

        watcher.stop().await.unwrap();
        assert_eq!(resident.worker_count(), 0);
    }
}
