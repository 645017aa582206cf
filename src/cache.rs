//! Bounded, TTL-expiring record of nonces that have already been accepted.
//!
//! The only mutation entry point is [`NonceCache::try_insert`] (and its boolean
//! form [`NonceCache::check_and_insert`]), which performs the "seen?" lookup and
//! the insert under a single lock acquisition. Nonces are spread across
//! independently locked shards; every call for a given nonce lands on the same
//! shard, so two racing calls with one nonce can never both succeed.

use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::convert::TryFrom;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::window::{ConfigError, DEFAULT_CACHE_TTL};

/// Default total number of live entries the cache may hold.
pub const DEFAULT_CACHE_CAPACITY: usize = 1 << 20;
/// Default number of independently locked shards.
pub const DEFAULT_CACHE_SHARDS: usize = 16;

// Expired entries reclaimed opportunistically on each insert, so that memory
// stays bounded without a background sweeper.
const LAZY_PURGE_PER_INSERT: usize = 2;

// Spare room per shard in `for_peak_rate`, since nonces never hash evenly.
const SHARD_HEADROOM: usize = 2;

/// Configuration for a [`NonceCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceCacheConfig {
    ttl: Duration,
    capacity: usize,
    shards: usize,
}

impl Default for NonceCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            capacity: DEFAULT_CACHE_CAPACITY,
            shards: DEFAULT_CACHE_SHARDS,
        }
    }
}

impl NonceCacheConfig {
    /// Creates a new cache configuration using the default values.
    pub fn new() -> Self {
        Self::default()
    }
    /// Sizes the cache for a steady state of `requests_per_second` accepted
    /// requests.
    ///
    /// An entry stays live for `ttl + 1` whole seconds, so that many seconds
    /// of traffic are held at once. Since the limit applies per shard, the
    /// total is then doubled to absorb uneven hashing across shards.
    pub fn for_peak_rate(ttl: Duration, requests_per_second: u64) -> Self {
        let live = ttl
            .as_secs()
            .saturating_add(1)
            .saturating_mul(requests_per_second);
        let live = usize::try_from(live).unwrap_or(usize::MAX).max(1);
        let shards = DEFAULT_CACHE_SHARDS;
        let capacity = if shards > 1 {
            live.saturating_mul(SHARD_HEADROOM)
        } else {
            live
        };
        Self {
            ttl,
            capacity,
            shards,
        }
    }
    /// Returns the entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
    /// Sets the entry lifetime. This must match the TTL of the timestamp window
    /// used alongside the cache.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
    /// Returns the maximum number of live entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    /// Sets the maximum number of live entries.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
    /// Returns the number of shards.
    pub fn shards(&self) -> usize {
        self.shards
    }
    /// Sets the number of shards.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }
}

/// Outcome of [`NonceCache::try_insert`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// The nonce had not been seen (or its entry had expired) and is now recorded.
    Inserted,
    /// The nonce is already present and live.
    Replayed,
    /// The nonce was not seen, but its shard is full of unexpired entries and
    /// it could not be recorded.
    Overloaded,
}

#[derive(Debug, Default)]
struct Shard {
    entries: HashMap<Vec<u8>, i64>,
    // (inserted_at, nonce), oldest first.
    by_age: BTreeSet<(i64, Vec<u8>)>,
}

fn is_expired(inserted_at: i64, now: i64, ttl: i64) -> bool {
    now.saturating_sub(inserted_at) > ttl
}

impl Shard {
    fn remove(&mut self, nonce: &[u8], inserted_at: i64) {
        self.entries.remove(nonce);
        self.by_age.remove(&(inserted_at, nonce.to_vec()));
    }

    /// Removes the oldest entry if it has expired. Since entries expire in
    /// insertion-time order, returns false once no expired entries remain.
    fn remove_oldest_expired(&mut self, now: i64, ttl: i64) -> bool {
        let expired = self
            .by_age
            .first()
            .map_or(false, |(inserted_at, _)| is_expired(*inserted_at, now, ttl));
        if !expired {
            return false;
        }
        if let Some((_, nonce)) = self.by_age.pop_first() {
            self.entries.remove(&nonce);
        }
        true
    }

    fn insert(&mut self, nonce: &[u8], now: i64, ttl: i64, capacity: usize) -> Insertion {
        if let Some(&inserted_at) = self.entries.get(nonce) {
            if !is_expired(inserted_at, now, ttl) {
                return Insertion::Replayed;
            }
            self.remove(nonce, inserted_at);
        }

        for _ in 0..LAZY_PURGE_PER_INSERT {
            if !self.remove_oldest_expired(now, ttl) {
                break;
            }
        }
        while self.entries.len() >= capacity {
            if !self.remove_oldest_expired(now, ttl) {
                return Insertion::Overloaded;
            }
        }

        self.entries.insert(nonce.to_vec(), now);
        self.by_age.insert((now, nonce.to_vec()));
        Insertion::Inserted
    }
}

/// Thread-safe nonce cache with TTL-based expiry and a hard capacity.
///
/// Construct one per independently configured verifier and share it (usually
/// behind an `Arc`) between all verifications that use it.
///
/// Unexpired entries are never evicted to make room. When a shard is full of
/// live entries, new nonces are refused ([`Insertion::Overloaded`]): requests
/// are rejected rather than the replay window reopened. Size the cache with
/// [`NonceCacheConfig::for_peak_rate`] so that nominal load never reaches it.
#[derive(Debug)]
pub struct NonceCache {
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
    ttl: i64,
    shard_capacity: usize,
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::build(&NonceCacheConfig::default())
    }
}

impl NonceCache {
    /// Create a new nonce cache.
    pub fn new(config: &NonceCacheConfig) -> Result<Self, ConfigError> {
        if config.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if config.shards == 0 {
            return Err(ConfigError::ZeroShards);
        }
        Ok(Self::build(config))
    }

    fn build(config: &NonceCacheConfig) -> Self {
        // Never more shards than entries, so each shard holds at least one.
        let shard_count = config.shards.min(config.capacity);
        let shard_capacity = (config.capacity + shard_count - 1) / shard_count;
        Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(Shard::default()))
                .collect(),
            hasher: RandomState::new(),
            ttl: i64::try_from(config.ttl.as_secs()).unwrap_or(i64::MAX),
            shard_capacity,
        }
    }

    fn shard(&self, nonce: &[u8]) -> MutexGuard<'_, Shard> {
        let mut hasher = self.hasher.build_hasher();
        nonce.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        lock(&self.shards[index])
    }

    /// Returns `true` if `nonce` was already present and live (a replay).
    /// Otherwise records `nonce` as seen at `now` and returns `false`.
    ///
    /// If the nonce cannot be recorded because the cache is full of live
    /// entries, this also returns `true`: callers treat the request as
    /// unverifiable.
    pub fn check_and_insert(&self, nonce: &[u8], now: i64) -> bool {
        self.try_insert(nonce, now) != Insertion::Inserted
    }

    /// Atomically checks whether `nonce` has been seen and, if not, records it
    /// with insertion time `now`.
    pub fn try_insert(&self, nonce: &[u8], now: i64) -> Insertion {
        let result = self
            .shard(nonce)
            .insert(nonce, now, self.ttl, self.shard_capacity);
        if result == Insertion::Overloaded {
            warn!(
                "Nonce cache shard full ({} live entries); refusing new nonce",
                self.shard_capacity
            );
        }
        result
    }

    /// Removes every entry that has expired as of `now`, returning how many
    /// were removed. The shard lock is released between removals so that
    /// concurrent verifications are never stalled behind a sweep.
    pub fn sweep_expired(&self, now: i64) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            while lock(shard).remove_oldest_expired(now, self.ttl) {
                removed += 1;
            }
        }
        removed
    }

    /// Get the current number of stored nonces (for monitoring).
    ///
    /// This may include expired entries which have not yet been reclaimed.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).entries.len()).sum()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl as u64)
    }

    /// Returns the effective capacity (rounded up to a whole number of
    /// entries per shard).
    pub fn capacity(&self) -> usize {
        self.shard_capacity * self.shards.len()
    }

    /// Start a background sweep task.
    ///
    /// This spawns a tokio task that periodically removes expired entries,
    /// using the system clock as the current time.
    #[cfg(feature = "tokio")]
    pub fn spawn_sweeper(
        self: &std::sync::Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let cache = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            loop {
                interval_timer.tick().await;
                let removed = cache.sweep_expired(chrono::Utc::now().timestamp());
                if removed > 0 {
                    debug!("Swept {} expired nonces", removed);
                }
            }
        })
    }
}

// Shard state is consistent between statements, so a panic while holding the
// lock cannot leave it half-updated.
fn lock(shard: &Mutex<Shard>) -> MutexGuard<'_, Shard> {
    shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
