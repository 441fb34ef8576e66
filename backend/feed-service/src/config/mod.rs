use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::services::StalenessRule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Tunables for feed generation and the response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Lifetime of a cached feed page. Bounds how stale a served page can be.
    pub cache_ttl_secs: u64,
    pub default_page_limit: u32,
    /// Optional upper bound on `limit`. Unset accepts any positive page size.
    pub max_page_limit: Option<u32>,
    /// Budget for a single feed request across every store and cache call.
    pub request_timeout_ms: u64,
    /// How many times a fanout-merge retries after losing a version race.
    pub merge_max_retries: u32,
    pub staleness_rule: StalenessRule,
    /// Drop every cached page of a user after their feed was merged.
    pub invalidate_on_merge: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            default_page_limit: 10,
            max_page_limit: None,
            request_timeout_ms: 5_000,
            merge_max_retries: 3,
            staleness_rule: StalenessRule::default(),
            invalidate_on_merge: false,
        }
    }
}

impl FeedConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let feed_defaults = FeedConfig::default();

        let config = Config {
            app: AppConfig {
                env: lookup("APP_ENV").unwrap_or_else(|| "development".to_string()),
                host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "APP_PORT", 8080)?,
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
                connect_timeout_secs: parse_or(&lookup, "DATABASE_CONNECT_TIMEOUT_SECS", 10)?,
                run_migrations: parse_or(&lookup, "DATABASE_RUN_MIGRATIONS", true)?,
            },
            redis: RedisConfig {
                url: lookup("REDIS_URL").context("REDIS_URL must be set")?,
            },
            feed: FeedConfig {
                cache_ttl_secs: parse_or(
                    &lookup,
                    "FEED_CACHE_TTL_SECS",
                    feed_defaults.cache_ttl_secs,
                )?,
                default_page_limit: parse_or(
                    &lookup,
                    "FEED_DEFAULT_PAGE_LIMIT",
                    feed_defaults.default_page_limit,
                )?,
                max_page_limit: parse_opt(&lookup, "FEED_MAX_PAGE_LIMIT")?
                    .or(feed_defaults.max_page_limit),
                request_timeout_ms: parse_or(
                    &lookup,
                    "FEED_REQUEST_TIMEOUT_MS",
                    feed_defaults.request_timeout_ms,
                )?,
                merge_max_retries: parse_or(
                    &lookup,
                    "FEED_MERGE_MAX_RETRIES",
                    feed_defaults.merge_max_retries,
                )?,
                staleness_rule: parse_or(
                    &lookup,
                    "FEED_STALENESS_RULE",
                    feed_defaults.staleness_rule,
                )?,
                invalidate_on_merge: parse_or(
                    &lookup,
                    "FEED_CACHE_INVALIDATE_ON_MERGE",
                    feed_defaults.invalidate_on_merge,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let feed = &self.feed;
        if feed.cache_ttl_secs == 0 {
            return Err(anyhow!("FEED_CACHE_TTL_SECS must be positive"));
        }
        if feed.default_page_limit == 0 {
            return Err(anyhow!("FEED_DEFAULT_PAGE_LIMIT must be positive"));
        }
        if let Some(max) = feed.max_page_limit {
            if max == 0 {
                return Err(anyhow!("FEED_MAX_PAGE_LIMIT must be positive"));
            }
            if feed.default_page_limit > max {
                return Err(anyhow!(
                    "FEED_DEFAULT_PAGE_LIMIT must not exceed FEED_MAX_PAGE_LIMIT ({})",
                    max
                ));
            }
        }
        if feed.request_timeout_ms == 0 {
            return Err(anyhow!("FEED_REQUEST_TIMEOUT_MS must be positive"));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {}={:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

fn parse_opt<F, T>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid {}={:?}: {}", key, raw, e)),
        None => Ok(None),
    }
}

fn default_cache_ttl_secs() -> u64 {
    600 // 10 minutes
}
