//! Cache port implementations: an in-memory fake for tests and a Redis
//! adapter for production, both behind the `Cache` trait.
//!
//! The Redis adapter's connection-manager pattern is lifted directly from
//! the teacher's `pipeline::cache::CacheManager` (lazily establish a
//! `ConnectionManager`, reuse it across calls, reconnect transparently on
//! failure via the `redis` crate's own retry logic).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::Result;

use super::Cache;

/// Matches `text` against a `*`-wildcard glob (no other metacharacters),
/// the same grammar Redis `SCAN ... MATCH` and `KEYS` use. Classic
/// two-pointer backtracking match, iterative to avoid recursion depth
/// concerns on attacker-controlled patterns.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star, mut star_ti) = (None, 0usize);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '*') {
            star = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// In-process cache over a `DashMap`, used by tests and by deployments
/// without a Redis instance. Pattern-index sets are modeled as a second
/// map from set key to member-key set.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Vec<u8>>,
    pattern_indexes: DashMap<String, HashSet<String>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_multiple(&self, keys: &[String]) -> Result<()> {
        for k in keys {
            self.entries.remove(k);
        }
        Ok(())
    }

    async fn add_to_pattern_index(&self, set_key: &str, member: &str) -> Result<()> {
        self.pattern_indexes
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn get_pattern_index_keys(&self, set_key: &str) -> Result<Vec<String>> {
        Ok(self
            .pattern_indexes
            .get(set_key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_pattern_index(&self, set_key: &str) -> Result<()> {
        self.pattern_indexes.remove(set_key);
        Ok(())
    }

    async fn find_pattern_index_sets(&self, glob: &str) -> Result<Vec<String>> {
        Ok(self
            .pattern_indexes
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| glob_match(glob, k))
            .collect())
    }
}

/// Redis-backed cache. TTLs are passed through to `SET EX`; pattern-index
/// sets are Redis sets keyed by the pattern, mirroring `spec.md` §3.
pub struct RedisCache {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
}

impl RedisCache {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        {
            let guard = self.conn.lock();
            if let Some(c) = guard.as_ref() {
                return Ok(c.clone());
            }
        }
        let manager = ConnectionManager::new(self.client.clone()).await?;
        *self.conn.lock() = Some(manager.clone());
        debug!("established Redis connection manager");
        Ok(manager)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del(key).await?;
        Ok(())
    }

    async fn delete_multiple(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        conn.del(keys).await?;
        Ok(())
    }

    async fn add_to_pattern_index(&self, set_key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.sadd(set_key, member).await?;
        Ok(())
    }

    async fn get_pattern_index_keys(&self, set_key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn.smembers(set_key).await?;
        Ok(members)
    }

    async fn delete_pattern_index(&self, set_key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del(set_key).await?;
        Ok(())
    }

    async fn find_pattern_index_sets(&self, glob: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(glob)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_cache_round_trips_and_pattern_indexes() {
        let cache = InMemoryCache::new();
        cache.set("k1", b"hello".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k1").await.unwrap(), Some(b"hello".to_vec()));

        cache.add_to_pattern_index("pattern_index:p", "k1").await.unwrap();
        let members = cache.get_pattern_index_keys("pattern_index:p").await.unwrap();
        assert_eq!(members, vec!["k1".to_string()]);

        cache.delete("k1").await.unwrap();
        assert_eq!(cache.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_pattern_index_sets_resolves_glob_against_existing_sets() {
        let cache = InMemoryCache::new();
        cache.add_to_pattern_index("pattern_index:query_cache:logs:*", "k1").await.unwrap();
        cache.add_to_pattern_index("pattern_index:query_cache:metrics:*", "k2").await.unwrap();

        let hits = cache.find_pattern_index_sets("pattern_index:query_cache:*logs:*").await.unwrap();
        assert_eq!(hits, vec!["pattern_index:query_cache:logs:*".to_string()]);

        let none = cache.find_pattern_index_sets("pattern_index:query_cache:traces:*traces:*").await.unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn glob_match_handles_star_wildcards() {
        assert!(glob_match("pattern_index:query_cache:*logs:*", "pattern_index:query_cache:logs:*"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
        assert!(glob_match("*", ""));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
