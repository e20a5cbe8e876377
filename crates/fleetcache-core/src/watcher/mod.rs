// ── Watchers ──
//
// Long-lived subscriptions that turn hub publishes into notifications on
// a consumer-owned channel. Each watcher runs as a worker registered with
// the resident of the entity that created it.

mod config;
mod lxd_profile;
mod notify;
mod strings;

pub use notify::NotifyWatcher;
pub use strings::{Predicate, PredicateStringsWatcher, StringsWatcher};

pub(crate) use config::spawn_config_watcher;
pub(crate) use lxd_profile::spawn_lxd_profile_watcher;
