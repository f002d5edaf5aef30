//! Per-chain in-memory cache.
//!
//! Each chain gets its own concurrent map, created on first access. Maps are
//! never evicted: the cache lives as long as the store that owns it.

use std::sync::Arc;

use chainstore_core::{
    BlockTime, ChainId, CompositeKey, HistoricalPrice, Keyed, RegistryVaultEvent, VaultRecord,
};
use dashmap::DashMap;

/// Concurrent map of chain id to (composite key to latest value).
///
/// Stores and loads on different keys or chains never block each other.
/// Stores to the same key race on visibility order only: the last physical
/// write wins, and values are whole replacements.
pub struct ChainKeyedCache<V> {
    chains: DashMap<ChainId, Arc<DashMap<CompositeKey, V>>>,
}

impl<V: Clone> ChainKeyedCache<V> {
    pub fn new() -> Self {
        Self {
            chains: DashMap::new(),
        }
    }

    /// Map for `chain_id`, created if missing.
    ///
    /// The fast path is a shared read; the entry API makes creation atomic
    /// when two callers race on a new chain.
    fn chain(&self, chain_id: ChainId) -> Arc<DashMap<CompositeKey, V>> {
        if let Some(map) = self.chains.get(&chain_id) {
            return Arc::clone(map.value());
        }
        Arc::clone(
            self.chains
                .entry(chain_id)
                .or_insert_with(|| Arc::new(DashMap::new()))
                .value(),
        )
    }

    /// Insert or overwrite the value for `key` on `chain_id`.
    pub fn store(&self, chain_id: ChainId, key: CompositeKey, value: V) {
        self.chain(chain_id).insert(key, value);
    }

    /// Insert `value` only if `key` has no entry yet on `chain_id`.
    /// Returns whether it was inserted.
    pub fn store_if_absent(&self, chain_id: ChainId, key: CompositeKey, value: V) -> bool {
        let map = self.chain(chain_id);
        let mut inserted = false;
        map.entry(key).or_insert_with(|| {
            inserted = true;
            value
        });
        inserted
    }

    /// Latest value for `key` on `chain_id`, if any.
    pub fn load(&self, chain_id: ChainId, key: &str) -> Option<V> {
        let map = self.chains.get(&chain_id)?;
        let value = map.get(key).map(|entry| entry.value().clone());
        value
    }

    /// Whether `key` is present on `chain_id`.
    pub fn contains(&self, chain_id: ChainId, key: &str) -> bool {
        self.chains
            .get(&chain_id)
            .map(|map| map.contains_key(key))
            .unwrap_or(false)
    }

    /// Snapshot of every value cached for `chain_id`, in no particular order.
    pub fn values(&self, chain_id: ChainId) -> Vec<V> {
        match self.chains.get(&chain_id) {
            Some(map) => map.iter().map(|entry| entry.value().clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Number of entries cached for `chain_id`.
    pub fn len(&self, chain_id: ChainId) -> usize {
        self.chains
            .get(&chain_id)
            .map(|map| map.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, chain_id: ChainId) -> bool {
        self.len(chain_id) == 0
    }

    /// Chains that have been touched so far.
    pub fn chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.chains.iter().map(|entry| *entry.key()).collect();
        chains.sort_unstable();
        chains
    }
}

impl<V: Clone + Keyed> ChainKeyedCache<V> {
    /// Store a keyed entity under its own chain and composite key.
    pub fn put(&self, value: V) {
        let chain_id = value.chain_id();
        let key = value.composite_key();
        self.store(chain_id, key, value);
    }
}

impl<V: Clone> Default for ChainKeyedCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// One cache per entity kind.
#[derive(Default)]
pub struct EntityCaches {
    pub block_times: ChainKeyedCache<BlockTime>,
    pub historical_prices: ChainKeyedCache<HistoricalPrice>,
    pub registry_vault_events: ChainKeyedCache<RegistryVaultEvent>,
    pub vault_records: ChainKeyedCache<VaultRecord>,
}

impl EntityCaches {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_load_missing_chain() {
        let cache: ChainKeyedCache<u64> = ChainKeyedCache::new();
        assert_eq!(cache.load(1, "100"), None);
        assert!(cache.chains().is_empty(), "load must not create chain maps");
    }

    #[test]
    fn test_store_then_overwrite() {
        let cache = ChainKeyedCache::new();
        cache.store(1, CompositeKey::from("100"), 1_700_000_000u64);
        assert_eq!(cache.load(1, "100"), Some(1_700_000_000));

        cache.store(1, CompositeKey::from("100"), 1_700_000_500);
        assert_eq!(cache.load(1, "100"), Some(1_700_000_500));
        assert_eq!(cache.len(1), 1);
    }

    #[test]
    fn test_store_if_absent_keeps_existing() {
        let cache = ChainKeyedCache::new();
        cache.store(1, CompositeKey::from("100"), 1_700_000_500u64);

        assert!(!cache.store_if_absent(1, CompositeKey::from("100"), 1_700_000_000));
        assert_eq!(cache.load(1, "100"), Some(1_700_000_500));

        assert!(cache.store_if_absent(1, CompositeKey::from("101"), 7));
        assert_eq!(cache.load(1, "101"), Some(7));
    }

    #[test]
    fn test_chain_isolation() {
        let cache = ChainKeyedCache::new();
        cache.store(1, CompositeKey::from("100"), 1u64);
        assert_eq!(cache.load(2, "100"), None);
        assert!(cache.contains(1, "100"));
        assert!(!cache.contains(2, "100"));
    }

    #[test]
    fn test_put_uses_entity_key() {
        let cache = ChainKeyedCache::new();
        cache.put(BlockTime::new(10, 42, 99));
        assert_eq!(cache.load(10, "42"), Some(BlockTime::new(10, 42, 99)));
        assert_eq!(cache.chains(), vec![10]);
    }

    #[test]
    fn test_concurrent_chain_creation() {
        let cache: Arc<ChainKeyedCache<usize>> = Arc::new(ChainKeyedCache::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for j in 0..100 {
                        cache.store(7, CompositeKey::from(format!("{}_{}", i, j)), j);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        assert_eq!(cache.chains(), vec![7]);
        assert_eq!(cache.len(7), 1600);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: after a sequence of stores on one key, load returns the last.
        #[test]
        fn prop_latest_store_wins(values in proptest::collection::vec(any::<u64>(), 1..20)) {
            let cache = ChainKeyedCache::new();
            for v in &values {
                cache.store(1, CompositeKey::from("k"), *v);
            }
            prop_assert_eq!(cache.load(1, "k"), values.last().copied());
        }

        /// Property: stores on chain A never show up on chain B.
        #[test]
        fn prop_cross_chain_isolation(a in any::<u64>(), b in any::<u64>(), key in "[0-9a-f]{1,16}") {
            prop_assume!(a != b);
            let cache = ChainKeyedCache::new();
            cache.store(a, CompositeKey::from(key.as_str()), 1u8);
            prop_assert_eq!(cache.load(b, &key), None);
            prop_assert_eq!(cache.load(a, &key), Some(1));
        }
    }
}
