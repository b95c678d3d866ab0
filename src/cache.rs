//! Two TTL-bounded caches: the result cache (keyed by request URL) and the
//! service-discovery cache (keyed by subscription+filter). Both use lazy
//! per-read expiry rather than a background sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use jiff::Timestamp;
use sha1::{Digest, Sha1};

use crate::metric_list::MetricList;

struct Entry<V> {
    value: V,
    expires_at: Timestamp,
}

/// A hash map of TTL entries guarded by a single mutex. `Get` treats an
/// expired entry as absent without removing it; `Set` always overwrites.
pub struct TtlCache<V: Clone> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str, now: Timestamp) -> Option<V> {
        let entries = self.entries.lock().expect("cache mutex poisoned");
        let entry = entries.get(key)?;
        if entry.expires_at <= now {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    pub fn set(&self, key: String, value: V, expires_at: Timestamp) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(key, Entry { value, expires_at });
    }
}

/// Holds whole, already-aggregated `MetricList` values, keyed by
/// `hex(sha1(request_url))`.
pub type ResultCache = TtlCache<Arc<MetricList>>;

/// Holds JSON-serialized service-discovery snapshots, keyed by
/// `hex(sha1(subscription:filter))`. Values are bytes (rather than a typed
/// target list) so a corrupted or foreign-written entry can be detected and
/// treated as a cache miss at decode time, per the `CacheCorrupt` error kind.
pub type ServiceDiscoveryCache = TtlCache<Arc<Vec<u8>>>;

/// `hex(sha1(request_url))`, used as the result-cache key.
pub fn hash_result_cache_key(request_url: &str) -> String {
    hex_sha1(request_url.as_bytes())
}

/// `hex(sha1(subscription + ":" + filter))`.
///
/// The source exporter seeds the hash with an empty string before appending
/// the payload; that is behaviorally identical to a single `sha1(payload)`
/// and is simplified to that here.
pub fn hash_sd_cache_key(subscription: &str, filter: &str) -> String {
    let payload = format!("{subscription}:{filter}");
    hex_sha1(payload.as_bytes())
}

fn hex_sha1(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_past_expiry() {
        let cache: TtlCache<i32> = TtlCache::new();
        let now = Timestamp::from_second(1_000_000).unwrap();
        cache.set("k".to_string(), 1, now);
        assert_eq!(cache.get("k", now.checked_add(jiff::Span::new().seconds(1)).unwrap()), None);
    }

    #[test]
    fn get_returns_value_before_expiry() {
        let cache: TtlCache<i32> = TtlCache::new();
        let now = Timestamp::from_second(1_000_000).unwrap();
        let later = now.checked_add(jiff::Span::new().seconds(60)).unwrap();
        cache.set("k".to_string(), 42, later);
        assert_eq!(cache.get("k", now), Some(42));
    }

    #[test]
    fn different_param_order_yields_different_keys() {
        let a = hash_result_cache_key("http://x/?a=1&b=2");
        let b = hash_result_cache_key("http://x/?b=2&a=1");
        assert_ne!(a, b);
    }

    #[test]
    fn sd_cache_key_is_deterministic() {
        let a = hash_sd_cache_key("SUB1", "type eq 'x'");
        let b = hash_sd_cache_key("SUB1", "type eq 'x'");
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
    }
}
