use crate::dispatcher::{Args, Dispatcher, Flow, Output};
use moka::sync::Cache;
use std::hash::Hash;
use std::time::Duration;

/// Bounded cache with a time-to-live. Cloning shares the store.
#[derive(Clone)]
pub struct CacheManager<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<K, V>,
}

impl<K, V> CacheManager<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key)
    }

    pub fn set(&self, key: K, value: V) {
        self.cache.insert(key, value);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }

    pub fn remove(&self, key: &K) {
        self.cache.invalidate(key);
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

// Default configuration
pub fn default_cache<K, V>(max_capacity: u64) -> CacheManager<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    CacheManager::new(max_capacity, Duration::from_secs(300)) // 5 minutes default TTL
}

fn cache_key(args: &Args) -> Option<String> {
    serde_json::to_string(args).ok()
}

/// Memoizes the output of the dispatched `name`, keyed by its arguments.
///
/// A before-filter answers from the cache and skips the target; an
/// after-filter stores fresh outputs. On a hit, before-filters attached
/// after this call are skipped.
pub fn memoize<C: 'static>(
    dispatcher: &mut Dispatcher<C>,
    name: &str,
    max_capacity: u64,
    ttl: Duration,
) -> CacheManager<String, Output> {
    let cache = CacheManager::new(max_capacity, ttl);

    let lookup = cache.clone();
    let owner = name.to_string();
    dispatcher.before(name, move |_: &mut C, args: &mut Args, _: &mut Output| {
        match cache_key(args).and_then(|key| lookup.get(&key)) {
            Some(cached) => {
                tracing::trace!(name = %owner, "cache hit");
                Flow::Return(cached)
            }
            None => Flow::Next,
        }
    });

    let store = cache.clone();
    dispatcher.after(name, move |_: &mut C, args: &mut Args, output: &mut Output| {
        if let Some(key) = cache_key(args) {
            if !store.contains(&key) {
                store.set(key, output.clone());
            }
        }
    });

    cache
}
