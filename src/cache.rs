use moka::future::Cache;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on cached queries per cache.
pub const CACHE_MAX_ENTRIES: u64 = 10_000;

/// Which query path produced a cached entry.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum QueryMode {
    Full,
    Instant,
    Autocomplete,
}

/// Cache key: mode, normalized query, result size and rerank flag.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct QueryKey {
    pub mode: QueryMode,
    pub query: String,
    pub size: usize,
    pub rerank: bool,
}

impl QueryKey {
    pub fn new(mode: QueryMode, query: &str, size: usize, rerank: bool) -> Self {
        Self {
            mode,
            query: query.trim().to_lowercase(),
            size,
            rerank,
        }
    }
}

/// Short-lived cache of query results using Moka.
///
/// Every [`invalidate_all`](Self::invalidate_all) bumps a generation
/// counter. A reader takes the generation before querying the engine and
/// hands it back on insert, so results read before a write are not cached
/// after it.
#[derive(Clone)]
pub struct QueryCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<K, V>,
    generation: Arc<AtomicU64>,
}

impl<K, V> QueryCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key).await
    }

    /// Insert unless the cache was invalidated since `generation` was read.
    pub async fn insert_if_current(&self, key: K, value: V, generation: u64) {
        if self.generation() != generation {
            return;
        }
        self.cache.insert(key.clone(), value).await;
        if self.generation() != generation {
            self.cache.invalidate(&key).await;
        }
    }

    /// Drop every entry. Called after any write to the index.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
    }
}
