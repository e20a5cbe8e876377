// fleetcache-core: In-memory model cache fed by an orchestrator change stream.

pub mod config;
pub mod controller;
pub mod error;
pub mod hash;
pub mod hub;
pub mod metrics;
pub mod model;
pub mod resident;
pub mod store;
pub mod watcher;
pub mod worker;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ControllerConfig, NotifyHook};
pub use controller::Controller;
pub use error::CacheError;
pub use hash::HashCache;
pub use hub::{Hub, HubMessage, Subscription, Topic, TopicKind};
pub use metrics::CacheMetrics;
pub use resident::{Registration, Resident, ResidentManager};
pub use worker::WorkerHandle;

// Cached entity handles and their watchers.
pub use store::{Application, Branch, Charm, Machine, Model, ModelReport, Unit};
pub use watcher::{NotifyWatcher, Predicate, PredicateStringsWatcher, StringsWatcher};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Stream envelope
    Change,
    // Entity snapshots
    ApplicationChange, BranchChange, CharmChange, MachineChange, ModelChange, UnitChange,
    // Removals
    RemoveApplication, RemoveBranch, RemoveCharm, RemoveMachine, RemoveModel, RemoveUnit,
    // Supporting types
    ConfigMap, ItemChange, Life, LxdProfile, Port, Status, StatusInfo,
};
