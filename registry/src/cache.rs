//! Key-value cache seam with per-entry TTLs.
//!
//! The cache only ever holds derived data: relational rows are the source of
//! truth, entries are safe to lose and safe to race on. Key layout and TTLs
//! are shared between the gateway's read path and the promotion state
//! machine's invalidation, so both live here.

use async_trait::async_trait;
use moka::Expiry;
use moka::sync::Cache;
use std::time::{Duration, Instant};

use crate::model::Environment;

/// Sentinel stored for keys that were looked up and not found.
pub const NEGATIVE_SENTINEL: &str = "invalid";

/// Short, so an activated or corrected key recovers quickly.
pub const NEGATIVE_KEY_TTL: Duration = Duration::from_secs(300);
/// Long; positive entries are explicitly invalidated on state changes.
pub const POSITIVE_KEY_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);
pub const POINTER_TTL: Duration = Duration::from_secs(3600);
pub const PROJECT_CONTEXT_TTL: Duration = Duration::from_secs(1800);
pub const DEPLOYMENT_OWNER_TTL: Duration = Duration::from_secs(3600);
pub const DEPLOYMENT_INFO_TTL: Duration = Duration::from_secs(600);

pub mod keys {
    use super::Environment;

    pub fn api_key(key_hash: &str) -> String {
        format!("apikey:{key_hash}")
    }

    pub fn environment_pointer(project_id: &str, environment: Environment) -> String {
        format!("project:{project_id}:{}_deployment", environment.as_str())
    }

    pub fn project_context(project_id: &str) -> String {
        format!("project:{project_id}:exists")
    }

    pub fn deployment_owner(deployment_id: &str) -> String {
        format!("deployment:{deployment_id}:project")
    }

    pub fn deployment_info(deployment_id: &str) -> String {
        format!("deployment:{deployment_id}:info")
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

const SIZE: u64 = 100_000;

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

struct PerEntryExpiry;

impl Expiry<String, Entry> for PerEntryExpiry {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process cache. Entries carry their own TTL, mirroring the per-key
/// expiries a networked key-value backend would apply.
pub struct MokaCache {
    cache: Cache<String, Entry>,
}

impl MokaCache {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .max_capacity(SIZE)
            .expire_after(PerEntryExpiry)
            .build();

        MokaCache { cache }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueCache for MokaCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.cache.get(key).map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.cache.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key);
        Ok(())
    }
}

/// Cache whose backend is down; every call errors. Used to exercise the
/// degrade-to-store paths.
pub struct UnreachableCache;

#[async_trait]
impl KeyValueCache for UnreachableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("unreachable".into()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("unreachable".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("unreachable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let cache = MokaCache::new();
        cache
            .set("apikey:abc", "payload", POSITIVE_KEY_TTL)
            .await
            .unwrap();
        assert_eq!(
            cache.get("apikey:abc").await.unwrap(),
            Some("payload".to_string())
        );

        cache.delete("apikey:abc").await.unwrap();
        assert_eq!(cache.get("apikey:abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_honor_their_own_ttl() {
        let cache = MokaCache::new();
        cache
            .set("short", "v", Duration::from_millis(20))
            .await
            .unwrap();
        cache.set("long", "v", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long").await.unwrap(), Some("v".to_string()));
    }

    #[test]
    fn key_namespaces_are_disjoint() {
        assert_eq!(
            keys::environment_pointer("p1", Environment::Production),
            "project:p1:production_deployment"
        );
        assert_eq!(
            keys::environment_pointer("p1", Environment::Staging),
            "project:p1:staging_deployment"
        );
        assert_ne!(keys::deployment_owner("d1"), keys::deployment_info("d1"));
    }
}
