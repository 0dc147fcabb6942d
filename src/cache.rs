//! Time-bounded deduplication cache.
//!
//! A `TtlCache` sits beside the network path: queried before a round
//! trip, populated after a successful one. Entries expire individually
//! and the cache is capacity-bounded, evicting oldest-by-timestamp
//! entries first. All operations are synchronous and never touch the
//! network.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::CacheConfig;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) > self.ttl
    }
}

/// A key-value store with per-entry expiry and capacity eviction.
///
/// TTL and capacity are per-instance configuration: different data
/// categories (short-lived analysis results vs long-lived config) use
/// independently configured instances. Expired entries are logically
/// absent immediately and physically removed lazily.
///
/// There are no failure modes beyond programmer misuse; a missing key
/// is simply `None`.
///
/// # Example
///
/// ```
/// use uplink::{CacheConfig, TtlCache};
///
/// let cache: TtlCache<String, Vec<u32>> = TtlCache::new(CacheConfig::short_lived());
///
/// cache.set("drives".to_string(), vec![1, 2, 3]);
/// assert_eq!(cache.get(&"drives".to_string()), Some(vec![1, 2, 3]));
///
/// cache.remove(&"drives".to_string());
/// assert!(!cache.has(&"drives".to_string()));
/// ```
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    config: CacheConfig,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Look up a fresh value. An expired entry is evicted and reported
    /// as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a value under the instance's default TTL, overwriting any
    /// existing entry and restarting its clock.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.config.ttl());
    }

    /// Store a value with an explicit TTL override.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.entries.lock();
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
        Self::enforce_capacity(&mut entries, self.config.max_entries);
    }

    /// Whether a fresh value exists for `key`.
    pub fn has(&self, key: &K) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Explicitly invalidate one entry, e.g. after a mutation made the
    /// cached read stale.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key).map(|entry| entry.value)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of fresh entries. Sweeps expired ones as a side effect.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expired entries go first; if the cache is still over capacity,
    /// oldest-by-timestamp entries follow until it fits.
    fn enforce_capacity(entries: &mut HashMap<K, CacheEntry<V>>, max_entries: usize) {
        if entries.len() <= max_entries {
            return;
        }

        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));

        while entries.len() > max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
