//! Redis-backed response cache for paginated feed reads
//!
//! Cache-aside: `FeedService` consults the cache before touching any store
//! and fills it after a miss. Entries expire on their own; nothing invalidates
//! them on writes unless `FEED_CACHE_INVALIDATE_ON_MERGE` is enabled.
//!
//! Cache keys follow the pattern:
//! - feed:{user_id}:{page}:{limit} → JSON array of posts

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Key of one cached feed page.
pub fn feed_page_key(user_id: Uuid, page: u64, limit: u64) -> String {
    format!("feed:{}:{}:{}", user_id, page, limit)
}

/// Pattern matching every cached page of a user.
pub fn feed_user_pattern(user_id: Uuid) -> String {
    format!("feed:{}:*", user_id)
}

/// Ephemeral key/value store with per-entry TTL.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// `None` on miss.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete every cached page of a user.
    async fn invalidate_user(&self, user_id: Uuid) -> Result<()>;
}

/// Response cache on top of a Redis connection manager.
#[derive(Clone)]
pub struct RedisResponseCache {
    conn: ConnectionManager,
}

impl RedisResponseCache {
    /// Connect to Redis at `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Cache(format!("Failed to create Redis client: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Cache(format!("Failed to create Redis connection: {}", e)))?;

        Ok(Self { conn })
    }

    /// Ping Redis to check connection health
    pub async fn ping(&self) -> Result<()> {
        redis::cmd("PING")
            .query_async::<_, String>(&mut self.conn.clone())
            .await
            .map_err(|e| {
                warn!("Redis PING failed: {}", e);
                AppError::Cache(format!("Redis health check failed: {}", e))
            })?;
        Ok(())
    }
}

#[async_trait]
impl ResponseCache for RedisResponseCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| {
                warn!("Redis GET failed for {}: {}", key, e);
                AppError::Cache(format!("Redis error: {}", e))
            })?;

        if value.is_some() {
            debug!("Cache hit for {}", key);
        } else {
            debug!("Cache miss for {}", key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        // SETEX rejects a zero TTL
        let ttl_secs = ttl.as_secs().max(1);

        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<_, ()>(&mut self.conn.clone())
            .await
            .map_err(|e| {
                warn!("Redis SETEX failed for {}: {}", key, e);
                AppError::Cache(format!("Redis error: {}", e))
            })?;

        debug!("Cached {} with TTL={}s", key, ttl_secs);
        Ok(())
    }

    /// Uses SCAN instead of KEYS to avoid blocking Redis
    async fn invalidate_user(&self, user_id: Uuid) -> Result<()> {
        let pattern = feed_user_pattern(user_id);
        let mut cursor: u64 = 0;
        let mut total_deleted = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut self.conn.clone())
                .await
                .map_err(|e| {
                    warn!("Redis SCAN failed for {}: {}", pattern, e);
                    AppError::Cache(format!("Redis error: {}", e))
                })?;

            if !keys.is_empty() {
                redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<_, ()>(&mut self.conn.clone())
                    .await
                    .map_err(|e| {
                        warn!("Redis DEL failed: {}", e);
                        AppError::Cache(format!("Redis error: {}", e))
                    })?;
                total_deleted += keys.len();
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        if total_deleted > 0 {
            debug!(
                "Invalidated {} feed pages for user {}",
                total_deleted, user_id
            );
        }

        Ok(())
    }
}
