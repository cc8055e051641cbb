//! Best-effort typed cache over the key-value store.
//!
//! The cache is never authoritative. Every store failure is logged here and
//! degrades to "no value": reads return `None`, writes silently do nothing.
//! Callers therefore never see a cache error, only a miss.
//!
//! Values are JSON-encoded; the types in this workspace use camelCase field
//! names, so a value written by one process reads back identically in any other.
//!
//! `remove_by_prefix` enumerates matching keys and deletes them one by one. It
//! is not atomic across the matched set: a writer can create a new matching
//! key after enumeration. Use it for invalidation, not for consistency.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::store::KeyValueStore;

/// Standard expiry for dataset profiles.
pub const PROFILE_TTL: Duration = Duration::from_secs(60 * 60);
/// Standard expiry for statistical analysis results.
pub const STATISTICS_TTL: Duration = Duration::from_secs(30 * 60);
/// Standard expiry for trained models.
pub const MODEL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct CacheService<S> {
    store: S,
    default_ttl: Option<Duration>,
}

impl<S: KeyValueStore> CacheService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            default_ttl: None,
        }
    }

    /// Cache with `settings.cache_ttl` as its default expiry.
    pub fn from_settings(store: S, settings: &Settings) -> Self {
        Self::new(store).with_default_ttl(settings.cache_ttl)
    }

    /// TTL used by [`CacheService::set`] when the caller passes `None`.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                error!(key, error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "cached value could not be decoded");
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(key, error = %e, "cache value could not be encoded");
                return;
            }
        };

        match self.store.set(key, &bytes, ttl.or(self.default_ttl)) {
            Ok(()) => debug!(key, "cache value set"),
            Err(e) => error!(key, error = %e, "cache write failed"),
        }
    }

    pub fn remove(&self, key: &str) {
        match self.store.delete(key) {
            Ok(_) => debug!(key, "cache value removed"),
            Err(e) => error!(key, error = %e, "cache delete failed"),
        }
    }

    /// Remove every key matching `pattern` (glob). Returns how many were deleted.
    pub fn remove_by_prefix(&self, pattern: &str) -> usize {
        let keys = match self.store.keys(pattern) {
            Ok(keys) => keys,
            Err(e) => {
                error!(pattern, error = %e, "cache key enumeration failed");
                return 0;
            }
        };

        let mut removed = 0;
        for key in &keys {
            match self.store.delete(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => error!(key = %key, error = %e, "cache delete failed"),
            }
        }

        info!(pattern, matched = keys.len(), removed, "cache entries invalidated");
        removed
    }

    pub fn exists(&self, key: &str) -> bool {
        self.store.exists(key).unwrap_or_else(|e| {
            error!(key, error = %e, "cache existence check failed");
            false
        })
    }

    /// Atomically add `by` to a counter. `None` when the store rejected it.
    pub fn increment(&self, key: &str, by: i64) -> Option<i64> {
        self.store
            .increment(key, by)
            .map_err(|e| error!(key, error = %e, "cache increment failed"))
            .ok()
    }

    pub fn decrement(&self, key: &str, by: i64) -> Option<i64> {
        self.store
            .decrement(key, by)
            .map_err(|e| error!(key, error = %e, "cache decrement failed"))
            .ok()
    }

    /// Write one field of a hash entry.
    pub fn set_hash_field<T: Serialize + ?Sized>(&self, key: &str, field: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(key, field, error = %e, "hash field could not be encoded");
                return;
            }
        };

        if let Err(e) = self.store.hash_set(key, field, &bytes) {
            error!(key, field, error = %e, "hash field write failed");
        }
    }

    /// Write several fields of a hash entry (one atomic write per field).
    pub fn set_hash<T: Serialize>(&self, key: &str, fields: &BTreeMap<String, T>) {
        for (field, value) in fields {
            self.set_hash_field(key, field, value);
        }
        debug!(key, fields = fields.len(), "hash set");
    }

    pub fn get_hash_field<T: DeserializeOwned>(&self, key: &str, field: &str) -> Option<T> {
        let bytes = match self.store.hash_get(key, field) {
            Ok(bytes) => bytes?,
            Err(e) => {
                error!(key, field, error = %e, "hash field read failed");
                return None;
            }
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| warn!(key, field, error = %e, "hash field could not be decoded"))
            .ok()
    }

    /// Read a whole hash entry. `None` when the hash is missing or empty.
    ///
    /// Fields that are not valid JSON (written by another producer) come back
    /// as raw strings rather than failing the whole read.
    pub fn get_hash(&self, key: &str) -> Option<BTreeMap<String, JsonValue>> {
        let raw = match self.store.hash_get_all(key) {
            Ok(raw) => raw,
            Err(e) => {
                error!(key, error = %e, "hash read failed");
                return None;
            }
        };

        if raw.is_empty() {
            return None;
        }

        Some(
            raw.into_iter()
                .map(|(field, bytes)| {
                    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                        JsonValue::String(String::from_utf8_lossy(&bytes).into_owned())
                    });
                    (field, value)
                })
                .collect(),
        )
    }

    /// Read-through: return the cached value, or compute, cache and return it.
    ///
    /// Compute errors are returned as-is and nothing is cached.
    pub fn get_or_compute<T, E, F>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(cached) = self.get(key) {
            info!(key, "served from cache");
            return Ok(cached);
        }

        info!(key, "computing cache value");
        let value = compute()?;
        self.set(key, &value, ttl);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, StoreError, StoreResult, Subscription};
    use lumen_core::CacheKeys;
    use proptest::prelude::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::cell::Cell;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Profile {
        row_count: u64,
        column_names: Vec<String>,
        null_ratio: Option<f64>,
    }

    fn cache() -> CacheService<Arc<InMemoryStore>> {
        CacheService::new(Arc::new(InMemoryStore::new()))
    }

    /// Store that fails every operation, to check the cache swallows errors.
    struct DownStore;

    fn down<T>() -> StoreResult<T> {
        Err(StoreError::unavailable("connection refused"))
    }

    impl KeyValueStore for DownStore {
        fn get(&self, _: &str) -> StoreResult<Option<Vec<u8>>> {
            down()
        }
        fn set(&self, _: &str, _: &[u8], _: Option<Duration>) -> StoreResult<()> {
            down()
        }
        fn set_if_absent(&self, _: &str, _: &[u8], _: Option<Duration>) -> StoreResult<bool> {
            down()
        }
        fn delete(&self, _: &str) -> StoreResult<bool> {
            down()
        }
        fn exists(&self, _: &str) -> StoreResult<bool> {
            down()
        }
        fn increment(&self, _: &str, _: i64) -> StoreResult<i64> {
            down()
        }
        fn decrement(&self, _: &str, _: i64) -> StoreResult<i64> {
            down()
        }
        fn hash_set(&self, _: &str, _: &str, _: &[u8]) -> StoreResult<()> {
            down()
        }
        fn hash_get(&self, _: &str, _: &str) -> StoreResult<Option<Vec<u8>>> {
            down()
        }
        fn hash_get_all(&self, _: &str) -> StoreResult<BTreeMap<String, Vec<u8>>> {
            down()
        }
        fn list_push_left(&self, _: &str, _: &[u8]) -> StoreResult<usize> {
            down()
        }
        fn list_pop_right(&self, _: &str) -> StoreResult<Option<Vec<u8>>> {
            down()
        }
        fn list_len(&self, _: &str) -> StoreResult<usize> {
            down()
        }
        fn keys(&self, _: &str) -> StoreResult<Vec<String>> {
            down()
        }
        fn publish(&self, _: &str, _: &[u8]) -> StoreResult<usize> {
            down()
        }
        fn subscribe(&self, _: &str) -> StoreResult<Subscription> {
            down()
        }
        fn ping(&self) -> StoreResult<()> {
            down()
        }
    }

    #[test]
    fn typed_round_trip() {
        let cache = cache();
        let profile = Profile {
            row_count: 1000,
            column_names: vec!["a".into(), "b".into()],
            null_ratio: Some(0.05),
        };

        cache.set(&CacheKeys::dataset_profile("42"), &profile, Some(PROFILE_TTL));

        let cached: Option<Profile> = cache.get(&CacheKeys::dataset_profile("42"));
        assert_eq!(cached, Some(profile));
    }

    #[test]
    fn stored_json_uses_camel_case() {
        let cache = cache();
        let profile = Profile {
            row_count: 1,
            column_names: vec![],
            null_ratio: None,
        };
        cache.set("profile:1", &profile, None);

        let raw = cache.store().get("profile:1").unwrap().unwrap();
        let value: JsonValue = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["rowCount"], json!(1));
        assert!(value.get("row_count").is_none());
    }

    #[test]
    fn miss_and_undecodable_values_are_none() {
        let cache = cache();
        assert_eq!(cache.get::<Profile>("profile:missing"), None);

        cache.store().set("profile:bad", b"not json", None).unwrap();
        assert_eq!(cache.get::<Profile>("profile:bad"), None);
    }

    #[test]
    fn values_expire_with_ttl() {
        let cache = cache();
        cache.set("stats:1:t_test", &json!({"p": 0.02}), Some(Duration::from_millis(20)));
        assert!(cache.exists("stats:1:t_test"));

        std::thread::sleep(Duration::from_millis(40));
        assert!(!cache.exists("stats:1:t_test"));
        assert_eq!(cache.get::<JsonValue>("stats:1:t_test"), None);
    }

    #[test]
    fn default_ttl_applies_when_none_given() {
        let cache = cache().with_default_ttl(Duration::from_millis(20));
        cache.set("user:1", &"alice", None);
        assert!(cache.exists("user:1"));

        std::thread::sleep(Duration::from_millis(40));
        assert!(!cache.exists("user:1"));
    }

    #[test]
    fn remove_is_idempotent() {
        let cache = cache();
        cache.set("report:1", &json!({"title": "q3"}), None);

        cache.remove("report:1");
        assert!(!cache.exists("report:1"));
        cache.remove("report:1");
        assert!(!cache.exists("report:1"));
    }

    #[test]
    fn remove_by_prefix_only_touches_matching_keys() {
        let cache = cache();
        cache.set(&CacheKeys::statistics("42", "t_test"), &1, None);
        cache.set(&CacheKeys::statistics("42", "anova"), &2, None);
        cache.set(&CacheKeys::statistics("43", "anova"), &3, None);
        cache.set(&CacheKeys::dataset("42"), &4, None);

        let removed =
            cache.remove_by_prefix(&CacheKeys::dataset_pattern(CacheKeys::STATS_PREFIX, "42"));

        assert_eq!(removed, 2);
        assert!(!cache.exists("stats:42:t_test"));
        assert!(!cache.exists("stats:42:anova"));
        assert!(cache.exists("stats:43:anova"));
        assert!(cache.exists("dataset:42"));
    }

    #[test]
    fn counters() {
        let cache = cache();
        assert_eq!(cache.increment("counter:x", 5), Some(5));
        assert_eq!(cache.increment("counter:x", 5), Some(10));
        assert_eq!(cache.decrement("counter:x", 4), Some(6));
    }

    #[test]
    fn hash_fields_round_trip() {
        let cache = cache();
        cache.set_hash_field("h1", "f1", "v1");

        assert_eq!(cache.get_hash_field::<String>("h1", "f1").as_deref(), Some("v1"));
        assert_eq!(cache.get_hash_field::<String>("h1", "nope"), None);

        let all = cache.get_hash("h1").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["f1"], json!("v1"));
    }

    #[test]
    fn whole_hash_write_and_raw_fallback() {
        let cache = cache();
        let mut fields = BTreeMap::new();
        fields.insert("field1".to_string(), json!("value1"));
        fields.insert("field2".to_string(), json!(42));
        cache.set_hash("hash:key", &fields);

        // Written by someone else without JSON encoding.
        cache.store().hash_set("hash:key", "raw", b"plain text").unwrap();

        let all = cache.get_hash("hash:key").unwrap();
        assert_eq!(all["field1"], json!("value1"));
        assert_eq!(all["field2"], json!(42));
        assert_eq!(all["raw"], json!("plain text"));

        assert_eq!(cache.get_hash("hash:missing"), None);
    }

    #[test]
    fn get_or_compute_reads_through() {
        let cache = cache();
        let calls = Cell::new(0);
        let compute = || -> Result<u64, String> {
            calls.set(calls.get() + 1);
            Ok(950)
        };

        assert_eq!(cache.get_or_compute("result:1:clean", None, compute), Ok(950));
        assert_eq!(cache.get_or_compute("result:1:clean", None, compute), Ok(950));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn get_or_compute_does_not_cache_errors() {
        let cache = cache();
        let err: Result<u64, String> =
            cache.get_or_compute("result:1:clean", None, || Err("boom".to_string()));
        assert_eq!(err, Err("boom".to_string()));
        assert!(!cache.exists("result:1:clean"));
    }

    #[test]
    fn store_outage_degrades_to_absent() {
        let cache = CacheService::new(DownStore);

        cache.set("dataset:1", &json!({"a": 1}), None);
        cache.set_hash_field("h", "f", &1);
        cache.remove("dataset:1");

        assert_eq!(cache.get::<JsonValue>("dataset:1"), None);
        assert!(!cache.exists("dataset:1"));
        assert_eq!(cache.increment("counter:x", 1), None);
        assert_eq!(cache.get_hash_field::<i64>("h", "f"), None);
        assert_eq!(cache.get_hash("h"), None);
        assert_eq!(cache.remove_by_prefix("dataset:*"), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: a value reads back equal right after it is written.
        #[test]
        fn set_then_get_round_trips(
            key in "[a-z]{1,8}:[a-z0-9]{1,8}",
            rows in any::<u64>(),
            columns in prop::collection::vec("[a-zA-Z_]{0,10}", 0..6),
            ratio in prop::option::of((0u32..1000).prop_map(|n| f64::from(n) / 8.0)),
        ) {
            let cache = cache();
            let profile = Profile { row_count: rows, column_names: columns, null_ratio: ratio };
            cache.set(&key, &profile, None);
            prop_assert_eq!(cache.get::<Profile>(&key), Some(profile));
        }
    }
}
