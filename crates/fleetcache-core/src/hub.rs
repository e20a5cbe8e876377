// ── In-process event hub ──
//
// Synchronous publish/subscribe keyed by typed topics. Entities publish,
// watchers subscribe. The subscriber table has its own locking (DashMap
// shards) and is never held while a handler runs, so entity locks and the
// hub can't form a lock-ordering cycle.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::trace;

use crate::hash::HashCache;

// ── Topics ───────────────────────────────────────────────────────────

/// The closed set of things that can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// A model's config hash changed.
    ModelConfigChange,
    /// A machine was added to or removed from a model.
    ModelAddRemoveMachine,
    /// A unit was added to a model.
    ModelUnitAdd,
    /// A unit was removed from a model.
    ModelUnitRemove,
    /// An application's charm URL changed.
    ApplicationCharmUrlChange,
    /// An application's config hash changed. Instance: application name.
    ApplicationConfigChange,
    /// A machine received its instance id. Instance: machine id.
    MachineProvisioned,
    /// A machine's config hash changed. Instance: machine id.
    MachineConfigChange,
}

/// A topic kind, optionally scoped to one entity instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub kind: TopicKind,
    pub instance: Option<String>,
}

impl Topic {
    /// Model-wide topic.
    pub fn global(kind: TopicKind) -> Self {
        Self {
            kind,
            instance: None,
        }
    }

    /// Topic scoped to a single entity.
    pub fn instance(kind: TopicKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            instance: Some(key.into()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(key) => write!(f, "{key}:{:?}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl From<TopicKind> for Topic {
    fn from(kind: TopicKind) -> Self {
        Self::global(kind)
    }
}

// ── Messages ─────────────────────────────────────────────────────────

/// Payload delivered with a publish.
#[derive(Debug, Clone)]
pub enum HubMessage {
    /// Content-free signal.
    Signal,
    /// Ids of entities added or removed.
    Ids(Vec<String>),
    /// Name of the unit added or removed.
    Unit(String),
    /// An application now references a different charm.
    CharmUrl {
        application: String,
        charm_url: String,
    },
    /// Fresh hashes for a new config snapshot.
    ConfigHashes(Arc<HashCache>),
}

pub type Handler = Arc<dyn Fn(&HubMessage) + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    handler: Handler,
}

// ── Hub ──────────────────────────────────────────────────────────────

/// Cheaply cloneable publish/subscribe bus.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    subscribers: DashMap<Topic, Vec<Subscriber>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every later publish on `topic`.
    ///
    /// Late subscribers never see earlier publishes.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&HubMessage) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .subscribers
            .entry(topic.clone())
            .or_default()
            .push(Subscriber {
                id,
                handler: Arc::new(handler),
            });
        trace!(%topic, subscriber = id, "subscribed");

        Subscription {
            hub: Arc::downgrade(&self.inner),
            topic,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Deliver `message` synchronously to the subscribers of `topic` as of
    /// this call. Returns the number of handlers invoked.
    ///
    /// Handlers must not block. A handler that publishes back onto the
    /// topic it is handling recurses.
    pub fn publish(&self, topic: &Topic, message: &HubMessage) -> usize {
        let subscribers: Vec<Subscriber> = match self.inner.subscribers.get(topic) {
            Some(entry) => entry.value().clone(),
            None => return 0,
        };
        for subscriber in &subscribers {
            (subscriber.handler)(message);
        }
        trace!(%topic, delivered = subscribers.len(), "published");
        subscribers.len()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .subscribers
            .get(topic)
            .map_or(0, |entry| entry.value().len())
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("topics", &self.inner.subscribers.len())
            .finish()
    }
}

impl HubInner {
    fn unsubscribe(&self, topic: &Topic, id: u64) {
        let emptied = match self.subscribers.get_mut(topic) {
            Some(mut entry) => {
                entry.value_mut().retain(|s| s.id != id);
                entry.value().is_empty()
            }
            None => false,
        };
        if emptied {
            self.subscribers
                .remove_if(topic, |_, subscribers| subscribers.is_empty());
        }
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Live subscription. Call [`unsubscribe`](Self::unsubscribe) to stop
/// receiving publishes.
#[derive(Debug)]
#[must_use = "a subscription stays active until unsubscribed"]
pub struct Subscription {
    hub: Weak<HubInner>,
    topic: Topic,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Stop receiving publishes. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.topic, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn publish_reaches_only_matching_topic() {
        let hub = Hub::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let sub = hub.subscribe(Topic::global(TopicKind::ModelUnitAdd), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(
            hub.publish(
                &Topic::global(TopicKind::ModelUnitAdd),
                &HubMessage::Unit("app/0".into())
            ),
            1
        );
        assert_eq!(
            hub.publish(
                &Topic::global(TopicKind::ModelUnitRemove),
                &HubMessage::Unit("app/0".into())
            ),
            0
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        sub.unsubscribe();
    }

    #[test]
    fn instance_topics_are_distinct() {
        let hub = Hub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        let sub = hub.subscribe(
            Topic::instance(TopicKind::MachineProvisioned, "0"),
            move |_| log.lock().push("0"),
        );

        hub.publish(
            &Topic::instance(TopicKind::MachineProvisioned, "1"),
            &HubMessage::Signal,
        );
        hub.publish(
            &Topic::instance(TopicKind::MachineProvisioned, "0"),
            &HubMessage::Signal,
        );
        assert_eq!(*seen.lock(), vec!["0"]);
        sub.unsubscribe();
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let hub = Hub::new();
        let topic = Topic::global(TopicKind::ModelAddRemoveMachine);
        let first = hub.subscribe(topic.clone(), |_| {});
        let second = hub.subscribe(topic.clone(), |_| {});
        assert_eq!(hub.subscriber_count(&topic), 2);

        first.unsubscribe();
        first.unsubscribe();
        assert_eq!(hub.subscriber_count(&topic), 1);

        second.unsubscribe();
        assert_eq!(hub.subscriber_count(&topic), 0);
        assert_eq!(hub.publish(&topic, &HubMessage::Signal), 0);
    }

    #[test]
    fn subscription_added_during_publish_misses_that_publish() {
        let hub = Hub::new();
        let topic = Topic::global(TopicKind::ModelUnitAdd);
        let late_hits = Arc::new(AtomicUsize::new(0));
        let late_subs = Arc::new(Mutex::new(Vec::new()));

        let inner_hub = hub.clone();
        let inner_topic = topic.clone();
        let hits = Arc::clone(&late_hits);
        let subs = Arc::clone(&late_subs);
        let outer = hub.subscribe(topic.clone(), move |_| {
            let hits = Arc::clone(&hits);
            let sub = inner_hub.subscribe(inner_topic.clone(), move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
            subs.lock().push(sub);
        });

        assert_eq!(hub.publish(&topic, &HubMessage::Signal), 1);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);

        outer.unsubscribe();
        hub.publish(&topic, &HubMessage::Signal);
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
        for sub in late_subs.lock().iter() {
            sub.unsubscribe();
        }
    }
}
