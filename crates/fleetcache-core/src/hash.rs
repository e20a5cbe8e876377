// ── Config hashing and the per-snapshot dedup cache ──

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use prometheus::IntCounter;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::CacheError;
use crate::model::ConfigMap;

/// SHA-256 over the canonical JSON encoding of `config`, hex encoded.
///
/// An empty map hashes to the empty string, so "no config" and "config
/// never seen" compare equal. `serde_json` does not fail on a string-keyed
/// map of `Value`s; if an encoder ever does, the error is a fatal
/// [`CacheError::Apply`] for the change carrying the config.
pub fn hash_config(config: &ConfigMap) -> Result<String, CacheError> {
    if config.is_empty() {
        return Ok(String::new());
    }
    let encoded = serde_json::to_vec(config).map_err(|e| CacheError::Apply {
        message: format!("config not hashable: {e}"),
    })?;

    Ok(hex::encode(Sha256::digest(&encoded)))
}

/// Memoized hashes of one config snapshot.
///
/// Built once per applied change and handed to config watchers, which
/// ask for the hash of the keys they care about. Subset hashes are keyed
/// by the sorted key list, so `["a", "b"]` and `["b", "a"]` share an entry.
pub struct HashCache {
    config: ConfigMap,
    hashes: Mutex<HashMap<String, String>>,
    hit: IntCounter,
    miss: IntCounter,
}

impl HashCache {
    /// Snapshot `config` and compute its whole-config hash (one miss).
    pub fn new(config: ConfigMap, hit: IntCounter, miss: IntCounter) -> Result<Self, CacheError> {
        let all = hash_config(&config)?;
        miss.inc();

        let mut hashes = HashMap::new();
        hashes.insert(String::new(), all);
        Ok(Self {
            config,
            hashes: Mutex::new(hashes),
            hit,
            miss,
        })
    }

    /// Placeholder for an entity that has not received a snapshot yet.
    /// Nothing is hashed and nothing is counted.
    pub(crate) fn empty(hit: IntCounter, miss: IntCounter) -> Self {
        let mut hashes = HashMap::new();
        hashes.insert(String::new(), String::new());
        Self {
            config: ConfigMap::new(),
            hashes: Mutex::new(hashes),
            hit,
            miss,
        }
    }

    /// Hash of the whole config.
    pub fn all(&self) -> String {
        self.hashes.lock().get("").cloned().unwrap_or_default()
    }

    /// Hash of the values under `keys`. An empty key list means every key.
    pub fn hash<S: AsRef<str>>(&self, keys: &[S]) -> String {
        let cache_key = cache_key(keys);
        if let Some(hash) = self.hashes.lock().get(&cache_key) {
            self.hit.inc();
            return hash.clone();
        }

        let subset: ConfigMap = keys
            .iter()
            .filter_map(|key| {
                let key = key.as_ref();
                self.config.get(key).map(|v| (key.to_owned(), v.clone()))
            })
            .collect();
        let hash = match hash_config(&subset) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(keys = %cache_key, error = %e, "config subset not hashable");
                String::new()
            }
        };

        self.miss.inc();
        self.hashes.lock().insert(cache_key, hash.clone());
        hash
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }
}

impl fmt::Debug for HashCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashCache")
            .field("keys", &self.config.len())
            .field("memoized", &self.hashes.lock().len())
            .finish()
    }
}

fn cache_key<S: AsRef<str>>(keys: &[S]) -> String {
    let mut sorted: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join("#")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn counters() -> (IntCounter, IntCounter) {
        (
            IntCounter::new("hit", "hit").expect("counter"),
            IntCounter::new("miss", "miss").expect("counter"),
        )
    }

    fn config() -> ConfigMap {
        ConfigMap::from([
            ("key".to_owned(), json!("value")),
            ("another".to_owned(), json!(42)),
        ])
    }

    #[test]
    fn empty_config_hashes_to_empty_string() {
        assert_eq!(hash_config(&ConfigMap::new()).ok(), Some(String::new()));
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = hash_config(&config()).expect("hash");
        let b = hash_config(&config()).expect("hash");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let mut changed = config();
        changed.insert("key".into(), json!("other"));
        assert_ne!(a, hash_config(&changed).expect("hash"));
    }

    #[test]
    fn hash_is_lowercase_hex_sha256() {
        let config = ConfigMap::from([("key".to_owned(), json!("value"))]);
        assert_eq!(
            hash_config(&config).expect("hash"),
            "e43abcf3375244839c012f9633f95862d232a95b00d5bc7348b3098b9fed7f32"
        );
    }

    #[test]
    fn new_counts_one_miss() {
        let (hit, miss) = counters();
        let cache = HashCache::new(config(), hit.clone(), miss.clone()).expect("cache");
        assert_eq!(miss.get(), 1);
        assert_eq!(hit.get(), 0);
        assert_eq!(cache.all(), hash_config(&config()).expect("hash"));
    }

    #[test]
    fn key_order_does_not_matter() {
        let (hit, miss) = counters();
        let cache = HashCache::new(config(), hit.clone(), miss.clone()).expect("cache");

        let first = cache.hash(&["key", "another"]);
        let second = cache.hash(&["another", "key"]);
        assert_eq!(first, second);
        assert_eq!(miss.get(), 2);
        assert_eq!(hit.get(), 1);
    }

    #[test]
    fn empty_key_list_is_the_whole_config() {
        let (hit, miss) = counters();
        let cache = HashCache::new(config(), hit.clone(), miss).expect("cache");
        let keys: [&str; 0] = [];
        assert_eq!(cache.hash(&keys), cache.all());
        assert_eq!(hit.get(), 1);
    }

    #[test]
    fn missing_keys_hash_to_empty() {
        let (hit, miss) = counters();
        let cache = HashCache::new(config(), hit, miss).expect("cache");
        assert_eq!(cache.hash(&["absent"]), "");
    }
}
