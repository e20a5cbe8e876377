// ── Cache counters ──
//
// Owned by whoever builds the controller and passed in explicitly. Nothing
// here is registered globally; `register` adds the counters to a registry
// the caller owns.

use prometheus::{IntCounter, Opts, Registry};

use crate::error::CacheError;

macro_rules! cache_metrics {
    ($($field:ident => $help:literal),* $(,)?) => {
        /// Counters updated by the cache as it applies changes and serves
        /// watchers.
        #[derive(Debug, Clone)]
        pub struct CacheMetrics {
            $(pub $field: IntCounter,)*
        }

        impl CacheMetrics {
            pub fn new() -> Result<Self, CacheError> {
                Ok(Self {
                    $($field: counter(stringify!($field), $help)?,)*
                })
            }

            /// Add every counter to `registry`.
            pub fn register(&self, registry: &Registry) -> Result<(), CacheError> {
                $(
                    registry
                        .register(Box::new(self.$field.clone()))
                        .map_err(|e| CacheError::Internal(format!("registering metric: {e}")))?;
                )*
                Ok(())
            }
        }
    };
}

cache_metrics! {
    model_config_reads => "Reads of a model's config",
    model_hash_cache_hit => "Model config hash lookups served from cache",
    model_hash_cache_miss => "Model config hash lookups computed",
    application_config_reads => "Reads of an application's config",
    application_hash_cache_hit => "Application config hash lookups served from cache",
    application_hash_cache_miss => "Application config hash lookups computed",
    machine_hash_cache_hit => "Machine config hash lookups served from cache",
    machine_hash_cache_miss => "Machine config hash lookups computed",
    lxd_profile_change_error => "LXD profile watcher recomputations that failed",
    lxd_profile_change_notification => "LXD profile watcher notifications sent",
    lxd_profile_no_change => "LXD profile watcher recomputations without a change",
    changes_applied => "Change events applied by the controller",
    removals_synthesized => "Removal events synthesized by a sweep",
}

fn counter(name: &str, help: &str) -> Result<IntCounter, CacheError> {
    IntCounter::with_opts(Opts::new(name, help).namespace("fleetcache"))
        .map_err(|e| CacheError::Internal(format!("creating metric {name}: {e}")))
}
