// src/cache/mod.rs
//! Generic expiring cache over a pluggable [`KvStore`].
//!
//! Each cache instance (board detection, company profiles, generated role
//! text, generated company text) has its own keyspace and TTL policy.
//! Entries are never mutated in place; a refresh replaces the whole entry.

pub mod store;

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub use store::{FileStore, KvStore, MemoryStore};

pub const PROVIDER_DETECTION_TTL_DAYS: i64 = 30;
pub const COMPANY_PROFILE_TTL_DAYS: i64 = 30;
pub const COMPANY_TEXT_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    Expires(Duration),
    Never,
}

impl TtlPolicy {
    pub fn days(days: i64) -> Self {
        TtlPolicy::Expires(Duration::days(days))
    }

    /// Valid iff `now - stored_at < ttl`. Age equal to the TTL is expired.
    pub fn is_valid(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            TtlPolicy::Never => true,
            TtlPolicy::Expires(ttl) => now - stored_at < *ttl,
        }
    }
}

/// Outcome of a single lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    Stale,
    Miss,
}

impl<T> Lookup<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            Lookup::Hit(v) => Some(v),
            _ => None,
        }
    }
}

/// Hit/miss tally handed back to the caller instead of living in a global.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

impl CacheStats {
    pub fn observe<T>(&mut self, lookup: &Lookup<T>) {
        match lookup {
            Lookup::Hit(_) => self.hits += 1,
            Lookup::Stale | Lookup::Miss => self.misses += 1,
        }
    }

    pub fn merge(&mut self, other: CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
    }
}

pub struct TtlCache<T> {
    name: &'static str,
    store: Arc<dyn KvStore>,
    policy: TtlPolicy,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TtlCache<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            store: Arc::clone(&self.store),
            policy: self.policy,
            _marker: PhantomData,
        }
    }
}

impl<T> TtlCache<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn new(name: &'static str, store: Arc<dyn KvStore>, policy: TtlPolicy) -> Self {
        Self {
            name,
            store,
            policy,
            _marker: PhantomData,
        }
    }

    pub fn in_memory(name: &'static str, policy: TtlPolicy) -> Self {
        Self::new(name, Arc::new(MemoryStore::new()), policy)
    }

    /// Open a file-backed cache at `dir/<file>`.
    pub async fn open_file(
        name: &'static str,
        dir: &Path,
        file: &str,
        policy: TtlPolicy,
    ) -> Self {
        let store = FileStore::open(dir.join(file)).await;
        Self::new(name, Arc::new(store), policy)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_valid(&self, entry: &CacheEntry<T>) -> bool {
        self.policy.is_valid(entry.stored_at, Utc::now())
    }

    pub async fn lookup(&self, key: &str) -> Lookup<T> {
        self.lookup_at(key, Utc::now()).await
    }

    pub async fn lookup_at(&self, key: &str, now: DateTime<Utc>) -> Lookup<T> {
        let Some(raw) = self.store.get(key).await else {
            return Lookup::Miss;
        };
        match serde_json::from_value::<CacheEntry<T>>(raw) {
            Ok(entry) if self.policy.is_valid(entry.stored_at, now) => Lookup::Hit(entry.value),
            Ok(_) => Lookup::Stale,
            Err(e) => {
                tracing::debug!(cache = self.name, key, error = %e, "unreadable cache entry");
                Lookup::Miss
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        self.lookup(key).await.hit()
    }

    pub async fn put(&self, key: &str, value: T) -> Result<()> {
        self.put_at(key, value, Utc::now()).await
    }

    pub async fn put_at(&self, key: &str, value: T, now: DateTime<Utc>) -> Result<()> {
        let entry = CacheEntry {
            value,
            stored_at: now,
        };
        self.store.put(key, serde_json::to_value(entry)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_equal_to_ttl_is_expired() {
        let policy = TtlPolicy::days(30);
        let stored = Utc::now();
        assert!(policy.is_valid(stored, stored + Duration::days(30) - Duration::seconds(1)));
        assert!(!policy.is_valid(stored, stored + Duration::days(30)));
        assert!(!policy.is_valid(stored, stored + Duration::days(31)));
    }

    #[test]
    fn never_policy_is_always_valid() {
        let stored = Utc::now() - Duration::days(10_000);
        assert!(TtlPolicy::Never.is_valid(stored, Utc::now()));
    }

    #[tokio::test]
    async fn lookup_distinguishes_hit_stale_and_miss() {
        let cache: TtlCache<String> = TtlCache::in_memory("test", TtlPolicy::days(1));
        let t0 = Utc::now();
        cache.put_at("k", "v".to_string(), t0).await.unwrap();

        assert_eq!(
            cache.lookup_at("k", t0 + Duration::hours(1)).await,
            Lookup::Hit("v".to_string())
        );
        assert_eq!(cache.lookup_at("k", t0 + Duration::days(1)).await, Lookup::Stale);
        assert_eq!(cache.lookup_at("other", t0).await, Lookup::Miss);
    }

    #[tokio::test]
    async fn refresh_replaces_whole_entry() {
        let cache: TtlCache<u32> = TtlCache::in_memory("test", TtlPolicy::days(1));
        let t0 = Utc::now() - Duration::days(2);
        cache.put_at("k", 1, t0).await.unwrap();
        assert!(cache.get("k").await.is_none());

        cache.put("k", 2).await.unwrap();
        assert_eq!(cache.get("k").await, Some(2));
    }

    #[tokio::test]
    async fn stats_count_stale_as_miss() {
        let cache: TtlCache<u32> = TtlCache::in_memory("test", TtlPolicy::days(1));
        let t0 = Utc::now();
        cache.put_at("fresh", 1, t0).await.unwrap();
        cache.put_at("old", 2, t0 - Duration::days(5)).await.unwrap();

        let mut stats = CacheStats::default();
        for key in ["fresh", "old", "absent"] {
            stats.observe(&cache.lookup_at(key, t0).await);
        }
        assert_eq!(stats, CacheStats { hits: 1, misses: 2 });
    }

    #[tokio::test]
    async fn independent_instances_share_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let a: TtlCache<String> =
            TtlCache::open_file("a", dir.path(), "a.json", TtlPolicy::Never).await;
        let b: TtlCache<String> =
            TtlCache::open_file("b", dir.path(), "b.json", TtlPolicy::days(1)).await;
        a.put("same-key", "from-a".into()).await.unwrap();
        assert!(b.get("same-key").await.is_none());
        assert_eq!(a.get("same-key").await.as_deref(), Some("from-a"));
    }
}
