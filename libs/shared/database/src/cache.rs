//! Cache port for derived read models (open-slot listings and counts).
//!
//! Caching is best-effort: backend failures are logged and treated as misses.
//! Writers call the invalidation hooks after every mutation that changes what
//! a provider's read models would return.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[async_trait]
pub trait ReadModelCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    async fn put(&self, key: &str, value: Value, ttl: Duration);

    async fn invalidate(&self, key: &str);

    async fn invalidate_prefix(&self, prefix: &str);
}

/// Key prefix shared by every read model of one provider.
pub fn provider_prefix(provider_id: Uuid) -> String {
    format!("provider:{}:", provider_id)
}

pub fn open_slots_key(provider_id: Uuid, from: &str, to: &str) -> String {
    format!("{}open_slots:{}:{}", provider_prefix(provider_id), from, to)
}

pub fn open_slot_counts_key(provider_id: Uuid) -> String {
    format!("{}open_slot_counts", provider_prefix(provider_id))
}

/// Invalidation hook for everything derived from a provider's slots.
pub async fn invalidate_provider(cache: &dyn ReadModelCache, provider_id: Uuid) {
    debug!("Invalidating read models for provider {}", provider_id);
    cache.invalidate_prefix(&provider_prefix(provider_id)).await;
}

/// Marks the start of a cache-aside fill of `key`. The marker lives under the
/// same provider prefix, so an invalidation during the fill removes it.
pub async fn begin_fill(cache: &dyn ReadModelCache, key: &str, ttl: Duration) -> String {
    let token = Uuid::new_v4().to_string();
    cache.put(&fill_marker_key(key), Value::String(token.clone()), ttl).await;
    token
}

/// Stores `value` only if the fill started with `token` was not invalidated
/// or overtaken by another fill. Returns whether the value was cached.
pub async fn complete_fill(
    cache: &dyn ReadModelCache,
    key: &str,
    token: &str,
    value: Value,
    ttl: Duration,
) -> bool {
    match cache.get(&fill_marker_key(key)).await {
        Some(Value::String(current)) if current == token => {
            cache.put(key, value, ttl).await;
            true
        }
        _ => {
            debug!("Skipping stale read model fill for {}", key);
            false
        }
    }
}

fn fill_marker_key(key: &str) -> String {
    format!("{}:filling", key)
}

// ==============================================================================
// IN-MEMORY
// ==============================================================================

#[derive(Default)]
pub struct InMemoryReadModelCache {
    entries: RwLock<HashMap<String, (Value, Instant)>>,
}

impl InMemoryReadModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }
}

#[async_trait]
impl ReadModelCache for InMemoryReadModelCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            _ => None,
        }
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(key.to_string(), (value, now + ttl));
    }

    async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        self.entries.write().await.retain(|key, _| !key.starts_with(prefix));
    }
}

// ==============================================================================
// REDIS
// ==============================================================================

pub struct RedisReadModelCache {
    pool: Pool,
}

impl RedisReadModelCache {
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| anyhow::anyhow!("Failed to create Redis pool: {}", e))?;

        // Test connection
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis read-model cache initialized successfully");

        Ok(Self { pool })
    }
}

#[async_trait]
impl ReadModelCache for RedisReadModelCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Redis unavailable for cache read: {}", e);
                return None;
            }
        };
        let raw: Option<String> = match redis::cmd("GET").arg(key).query_async(&mut conn).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Redis GET {} failed: {}", key, e);
                return None;
            }
        };
        raw.and_then(|raw| serde_json::from_str(&raw).ok())
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) {
        let Ok(mut conn) = self.pool.get().await else {
            warn!("Redis unavailable for cache write");
            return;
        };
        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(key)
            .arg(value.to_string())
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!("Redis SET {} failed: {}", key, e);
        }
    }

    async fn invalidate(&self, key: &str) {
        let Ok(mut conn) = self.pool.get().await else {
            warn!("Redis unavailable for cache invalidation");
            return;
        };
        let result: redis::RedisResult<i64> = redis::cmd("DEL").arg(key).query_async(&mut conn).await;
        if let Err(e) = result {
            warn!("Redis DEL {} failed: {}", key, e);
        }
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        let Ok(mut conn) = self.pool.get().await else {
            warn!("Redis unavailable for cache invalidation");
            return;
        };

        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        loop {
            let scan: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await;
            let (next, keys) = match scan {
                Ok(page) => page,
                Err(e) => {
                    warn!("Redis SCAN {} failed: {}", pattern, e);
                    return;
                }
            };
            if !keys.is_empty() {
                let deleted: redis::RedisResult<i64> =
                    redis::cmd("DEL").arg(&keys).query_async(&mut conn).await;
                if let Err(e) = deleted {
                    warn!("Redis DEL for {} failed: {}", pattern, e);
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
    }
}
