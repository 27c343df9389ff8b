//! Bearer API key validation.
//!
//! Keys are validated in three stages, cheapest first: textual shape, then
//! the auth cache, then the relational store. A key that fails the shape
//! check never touches the cache or the store. Cache entries are keyed by
//! the one-way hash of the raw key and hold either a resolved record (long
//! TTL, explicitly invalidated on key changes) or a negative sentinel
//! (short TTL, so a newly activated key recovers quickly). A cache backend
//! failure degrades to a direct store lookup instead of failing the request.

use crate::metrics_defs::{AUTH_CACHE_FALLBACK, AUTH_CACHE_HIT, AUTH_CACHE_MISS};
use registry::cache::{
    KeyValueCache, NEGATIVE_KEY_TTL, NEGATIVE_SENTINEL, POSITIVE_KEY_TTL, keys,
};
use registry::model::{ApiKey, KeyEnvironment, KeyType};
use registry::store::{RelationalStore, StoreError};
use registry::tasks::TaskSpawner;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::counter;
use std::sync::Arc;

/// Prefix carried by every key the platform has ever issued.
const KEY_PREFIX: &str = "portico_";

/// Minimum suffix length of the legacy fixed-prefix key form.
const LEGACY_SUFFIX_LEN: usize = 32;

/// Type and default environment encoded in a key's textual form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyShape {
    pub key_type: KeyType,
    pub environment: KeyEnvironment,
}

fn is_key_body(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Checks a raw key against the two accepted textual forms: the versioned
/// `portico_(sk|pk)_(live|test)_...` form and the legacy `portico_sk_...`
/// form (which always denoted a live secret key).
pub fn parse_key_shape(raw_key: &str) -> Option<KeyShape> {
    let rest = raw_key.strip_prefix(KEY_PREFIX)?;

    const VERSIONED: &[(&str, KeyType, KeyEnvironment)] = &[
        ("sk_live_", KeyType::Sk, KeyEnvironment::Live),
        ("sk_test_", KeyType::Sk, KeyEnvironment::Test),
        ("pk_live_", KeyType::Pk, KeyEnvironment::Live),
        ("pk_test_", KeyType::Pk, KeyEnvironment::Test),
    ];

    for (prefix, key_type, environment) in VERSIONED {
        if let Some(suffix) = rest.strip_prefix(prefix)
            && !suffix.is_empty()
            && is_key_body(suffix)
        {
            return Some(KeyShape {
                key_type: *key_type,
                environment: *environment,
            });
        }
    }

    if let Some(suffix) = rest.strip_prefix("sk_")
        && suffix.len() >= LEGACY_SUFFIX_LEN
        && is_key_body(suffix)
    {
        return Some(KeyShape {
            key_type: KeyType::Sk,
            environment: KeyEnvironment::Live,
        });
    }

    None
}

/// One-way, deterministic hash used for storage and cache keys. The raw
/// secret is never persisted.
pub fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// The fields of a key that outlive validation.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedKey {
    pub id: String,
    pub org_id: String,
    pub project_id: String,
    pub key_type: KeyType,
    pub environment: KeyEnvironment,
}

/// Cache representation of a resolved key.
#[derive(Serialize, Deserialize)]
struct CachedApiKey {
    id: String,
    org_id: String,
    project_id: String,
    is_active: bool,
    name: String,
    environment: KeyEnvironment,
    key_type: KeyType,
}

impl From<&ApiKey> for CachedApiKey {
    fn from(key: &ApiKey) -> Self {
        CachedApiKey {
            id: key.id.clone(),
            org_id: key.org_id.clone(),
            project_id: key.project_id.clone(),
            is_active: key.is_active,
            name: key.name.clone(),
            environment: key.environment,
            key_type: key.key_type,
        }
    }
}

impl From<CachedApiKey> for ValidatedKey {
    fn from(entry: CachedApiKey) -> Self {
        ValidatedKey {
            id: entry.id,
            org_id: entry.org_id,
            project_id: entry.project_id,
            key_type: entry.key_type,
            environment: entry.environment,
        }
    }
}

impl From<&ApiKey> for ValidatedKey {
    fn from(key: &ApiKey) -> Self {
        ValidatedKey {
            id: key.id.clone(),
            org_id: key.org_id.clone(),
            project_id: key.project_id.clone(),
            key_type: key.key_type,
            environment: key.environment,
        }
    }
}

pub struct ApiKeyValidator {
    store: Arc<dyn RelationalStore>,
    cache: Arc<dyn KeyValueCache>,
    spawner: Arc<dyn TaskSpawner>,
}

impl ApiKeyValidator {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        cache: Arc<dyn KeyValueCache>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        ApiKeyValidator {
            store,
            cache,
            spawner,
        }
    }

    /// Validates a raw bearer key, optionally scoped to one project.
    /// `Ok(None)` means the key is rejected; `Err` only surfaces store
    /// failures.
    pub async fn validate(
        &self,
        raw_key: &str,
        scope_project: Option<&str>,
    ) -> Result<Option<ValidatedKey>, StoreError> {
        if parse_key_shape(raw_key).is_none() {
            return Ok(None);
        }

        let key_hash = hash_api_key(raw_key);
        let cache_key = keys::api_key(&key_hash);

        match self.cache.get(&cache_key).await {
            Ok(Some(value)) if value == NEGATIVE_SENTINEL => {
                counter!(AUTH_CACHE_HIT).increment(1);
                Ok(None)
            }
            Ok(Some(value)) => {
                counter!(AUTH_CACHE_HIT).increment(1);
                match serde_json::from_str::<CachedApiKey>(&value) {
                    Ok(entry) => Ok(self.accept_cached(entry, scope_project)),
                    Err(err) => {
                        // Corrupt entry; treat as a miss and repopulate
                        tracing::warn!(error = %err, "discarding malformed auth cache entry");
                        self.lookup_and_cache(&key_hash, &cache_key, scope_project)
                            .await
                    }
                }
            }
            Ok(None) => {
                counter!(AUTH_CACHE_MISS).increment(1);
                self.lookup_and_cache(&key_hash, &cache_key, scope_project)
                    .await
            }
            Err(err) => {
                counter!(AUTH_CACHE_FALLBACK).increment(1);
                tracing::warn!(error = %err, "auth cache unavailable, falling back to store");
                self.lookup_direct(&key_hash, scope_project).await
            }
        }
    }

    fn accept_cached(
        &self,
        entry: CachedApiKey,
        scope_project: Option<&str>,
    ) -> Option<ValidatedKey> {
        if !entry.is_active {
            return None;
        }
        if let Some(project_id) = scope_project
            && entry.project_id != project_id
        {
            return None;
        }
        self.schedule_touch(&entry.id);
        Some(entry.into())
    }

    async fn lookup_and_cache(
        &self,
        key_hash: &str,
        cache_key: &str,
        scope_project: Option<&str>,
    ) -> Result<Option<ValidatedKey>, StoreError> {
        let record = self.store.api_key_by_hash(key_hash).await?;

        let key = match record {
            Some(key) if key.is_active => key,
            _ => {
                // Unknown and revoked keys share the short-lived sentinel
                if let Err(err) = self
                    .cache
                    .set(cache_key, NEGATIVE_SENTINEL, NEGATIVE_KEY_TTL)
                    .await
                {
                    tracing::warn!(error = %err, "failed to write negative auth cache entry");
                }
                return Ok(None);
            }
        };

        if let Some(project_id) = scope_project
            && key.project_id != project_id
        {
            // Valid key for a different project; not cacheable as invalid
            return Ok(None);
        }

        match serde_json::to_string(&CachedApiKey::from(&key)) {
            Ok(serialized) => {
                if let Err(err) = self.cache.set(cache_key, &serialized, POSITIVE_KEY_TTL).await {
                    tracing::warn!(error = %err, "failed to write positive auth cache entry");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize auth cache entry"),
        }

        self.schedule_touch(&key.id);
        Ok(Some(ValidatedKey::from(&key)))
    }

    async fn lookup_direct(
        &self,
        key_hash: &str,
        scope_project: Option<&str>,
    ) -> Result<Option<ValidatedKey>, StoreError> {
        let Some(key) = self.store.api_key_by_hash(key_hash).await? else {
            return Ok(None);
        };
        if !key.is_active {
            return Ok(None);
        }
        if let Some(project_id) = scope_project
            && key.project_id != project_id
        {
            return Ok(None);
        }
        self.schedule_touch(&key.id);
        Ok(Some(ValidatedKey::from(&key)))
    }

    fn schedule_touch(&self, key_id: &str) {
        let store = self.store.clone();
        let id = key_id.to_string();
        self.spawner.spawn(Box::pin(async move {
            if let Err(err) = store.touch_api_key(&id).await {
                tracing::warn!(key_id = %id, error = %err, "failed to update last_used_at");
            }
        }));
    }
}
