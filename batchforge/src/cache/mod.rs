//! Bounded LRU + TTL cache for expensive-to-reload resources.
//!
//! Values are stored as `Arc<V>` so evicting an entry never invalidates a
//! value a caller already holds. The cache lock is never held while a loader
//! runs; concurrent misses on the same key may load twice, and the first value
//! stored wins.

mod key;

pub use key::CacheKey;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached entries.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Maximum total weight of cached entries.
    #[serde(default = "default_max_weight")]
    pub max_weight: u64,
    /// Time-to-live of an entry, from insertion.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Interval of the background expiry sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_entries() -> usize {
    100
}

fn default_max_weight() -> u64 {
    1024 * 1024 * 1024
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_weight: default_max_weight(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub weight: u64,
    pub max_entries: usize,
    pub max_weight: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, in `0.0..=1.0`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Computes the weight an entry counts against `max_weight`.
pub type Weigher<V> = Arc<dyn Fn(&V) -> u64 + Send + Sync>;

struct CacheEntry<V> {
    value: Arc<V>,
    weight: u64,
    /// Position in the recency index.
    tick: u64,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct CacheState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    /// Access tick -> key, oldest first.
    recency: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    weight: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            weight: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Fresh value for `key`, marking it most recently used.
    fn touch(&mut self, key: &CacheKey, now: Instant) -> Option<Arc<V>> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.remove(key);
            self.expirations += 1;
            return None;
        }

        let tick = self.bump_tick();
        let entry = self.entries.get_mut(key)?;
        let old_tick = std::mem::replace(&mut entry.tick, tick);
        let value = entry.value.clone();

        self.recency.remove(&old_tick);
        self.recency.insert(tick, key.clone());
        Some(value)
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.weight -= entry.weight;
        Some(entry)
    }

    fn evict_oldest(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.weight -= entry.weight;
            self.evictions += 1;
            debug!(key = %key, "Evicted cache entry");
        }
        true
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }
}

/// Thread-safe weighted LRU cache with per-entry expiry.
pub struct ResourceCache<V> {
    max_entries: usize,
    max_weight: u64,
    ttl: Duration,
    weigher: Weigher<V>,
    state: Mutex<CacheState<V>>,
}

impl<V: Send + Sync + 'static> ResourceCache<V> {
    /// Create a cache where every entry weighs 1.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_weigher(config, Arc::new(|_: &V| 1))
    }

    /// Create a cache with a custom weigher.
    pub fn with_weigher(config: &CacheConfig, weigher: Weigher<V>) -> Self {
        Self {
            max_entries: config.max_entries,
            max_weight: config.max_weight,
            ttl: config.ttl(),
            weigher,
            state: Mutex::new(CacheState::new()),
        }
    }

    /// Override the entry time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Look up a fresh entry. Expired entries are dropped and count as misses.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        let mut state = self.state.lock();
        match state.touch(key, Instant::now()) {
            Some(value) => {
                state.hits += 1;
                Some(value)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Store a value, replacing any previous entry for `key`.
    pub fn insert(&self, key: CacheKey, value: V) -> Arc<V> {
        let weight = (self.weigher)(&value);
        let value = Arc::new(value);
        self.store(&mut self.state.lock(), key, value.clone(), weight);
        value
    }

    /// Return the cached value or load, store and return a new one.
    ///
    /// `loader` runs without the cache lock held. If another caller filled
    /// the key while it ran, the cached value is returned instead.
    pub fn get_or_load<F, E>(&self, key: CacheKey, loader: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let loaded = loader()?;
        let weight = (self.weigher)(&loaded);

        let mut state = self.state.lock();
        if let Some(existing) = state.touch(&key, Instant::now()) {
            return Ok(existing);
        }

        let value = Arc::new(loaded);
        self.store(&mut state, key, value.clone(), weight);
        Ok(value)
    }

    fn store(&self, state: &mut CacheState<V>, key: CacheKey, value: Arc<V>, weight: u64) {
        state.remove(&key);

        if weight > self.max_weight || self.max_entries == 0 {
            debug!(key = %key, weight, "Value exceeds cache capacity, not caching");
            return;
        }

        let now = Instant::now();
        state.purge_expired(now);
        while state.weight + weight > self.max_weight || state.entries.len() >= self.max_entries {
            if !state.evict_oldest() {
                break;
            }
        }

        let tick = state.bump_tick();
        state.recency.insert(tick, key.clone());
        state.weight += weight;
        state.entries.insert(
            key,
            CacheEntry {
                value,
                weight,
                tick,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop one entry.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Drop every fingerprint cached for `source`.
    pub fn invalidate_source(&self, source: &str) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<CacheKey> = state
            .entries
            .keys()
            .filter(|key| key.source() == source)
            .cloned()
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
        state.weight = 0;
    }

    /// Remove every expired entry.
    pub fn purge_expired(&self) -> usize {
        self.state.lock().purge_expired(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            entries: state.entries.len(),
            weight: state.weight,
            max_entries: self.max_entries,
            max_weight: self.max_weight,
        }
    }

    /// Periodically purge expired entries until `cancellation_token` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        sweep_interval: Duration,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!("Cache sweeper started (interval: {:?})", sweep_interval);

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Cache sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            debug!("Cache sweep removed {} expired entries", purged);
                        }
                    }
                }
            }
        })
    }
}
