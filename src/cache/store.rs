//! The cache store contract and its `moka` implementation.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use moka::{Expiry, sync::Cache};

use super::{CacheError, CacheKey, CachedResponse};

/// A concurrent, cost-bounded key → response store.
///
/// Implementations must be safe to share between tasks without extra
/// locking. Entries may disappear at any time (eviction or expiry) without
/// notice, so callers must treat a miss on a previously inserted key as normal.
pub trait CacheStore: Send + Sync {
    /// Looks up `key`.
    fn get(&self, key: &CacheKey) -> Option<Arc<CachedResponse>>;

    /// Stores `value` under `key` with an eviction `cost` and a lifetime.
    ///
    /// A zero `ttl` means the entry only leaves the store through eviction.
    /// Returns `false` when the store refuses the entry outright.
    fn set_with_ttl(
        &self,
        key: CacheKey,
        value: Arc<CachedResponse>,
        cost: u64,
        ttl: Duration,
    ) -> bool;
}

#[derive(Clone)]
struct Entry {
    response: Arc<CachedResponse>,
    cost: u32,
    ttl: Option<Duration>,
}

// Gives each entry the lifetime it was inserted with.
struct EntryTtl;

impl Expiry<CacheKey, Entry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// [`CacheStore`] backed by [`moka::sync::Cache`].
///
/// The total cost of resident entries is bounded by `max_cost`; when it is
/// exceeded moka evicts using its TinyLFU admission/eviction policy. Cloning
/// is cheap and clones share the same entries.
///
/// # Examples
///
/// ```
/// use std::{sync::Arc, time::Duration};
/// use respcache::cache::{CacheStore, CachedResponse, MokaStore, build_key};
/// use respcache::http::{Headers, StatusCode};
///
/// let store = MokaStore::new(1024 * 1024).unwrap();
/// let key = build_key("/items", "", b"");
/// let value = Arc::new(CachedResponse::new(StatusCode::Ok, Headers::new(), "[]"));
///
/// assert!(store.set_with_ttl(key.clone(), value, 48, Duration::from_secs(60)));
/// assert!(store.get(&key).is_some());
/// ```
#[derive(Clone)]
pub struct MokaStore {
    cache: Cache<CacheKey, Entry>,
    max_cost: u64,
}

impl MokaStore {
    /// Creates a store whose entries may cost at most `max_cost` in total.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidCapacity`] when `max_cost` is zero.
    pub fn new(max_cost: u64) -> Result<Self, CacheError> {
        if max_cost == 0 {
            return Err(CacheError::InvalidCapacity {
                reason: "maximum cost must be greater than zero".to_owned(),
            });
        }

        let cache = Cache::builder()
            .max_capacity(max_cost)
            .weigher(|_key: &CacheKey, entry: &Entry| entry.cost)
            .expire_after(EntryTtl)
            .build();

        Ok(Self { cache, max_cost })
    }

    pub fn max_cost(&self) -> u64 {
        self.max_cost
    }

    /// Approximate number of resident entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Approximate total cost of resident entries.
    pub fn total_cost(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// Applies pending evictions and expirations now instead of lazily.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

impl CacheStore for MokaStore {
    fn get(&self, key: &CacheKey) -> Option<Arc<CachedResponse>> {
        self.cache.get(key).map(|entry| entry.response)
    }

    fn set_with_ttl(
        &self,
        key: CacheKey,
        value: Arc<CachedResponse>,
        cost: u64,
        ttl: Duration,
    ) -> bool {
        if cost > self.max_cost {
            return false;
        }
        let Ok(cost) = u32::try_from(cost) else {
            return false;
        };

        let entry = Entry {
            response: value,
            cost,
            ttl: (!ttl.is_zero()).then_some(ttl),
        };
        self.cache.insert(key, entry);
        true
    }
}
