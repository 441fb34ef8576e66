//! Durable stores behind the feed engine.
//!
//! Each store is a trait so `FeedService` and the HTTP handlers can be wired
//! against PostgreSQL in production and against in-memory doubles in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{Feed, Post, UpdatePostRequest, UpdateUserRequest, User};

pub mod feed_repo;
pub mod post_repo;
pub mod user_repo;

pub use feed_repo::PgFeedStore;
pub use post_repo::PgPostStore;
pub use user_repo::PgUserDirectory;

/// Fields required to register a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub bio: String,
    pub is_celebrity: bool,
}

/// User records and the follow graph.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User>;

    /// Load a user with its following/followers sets. `None` when absent.
    async fn get(&self, user_id: Uuid) -> Result<Option<User>>;

    async fn list(&self) -> Result<Vec<User>>;

    /// Partial update; `None` when the user does not exist.
    async fn update(&self, user_id: Uuid, changes: UpdateUserRequest) -> Result<Option<User>>;

    /// Returns true if a user was removed.
    async fn delete(&self, user_id: Uuid) -> Result<bool>;

    /// Add-to-set on both sides of the relation. Idempotent.
    async fn follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<()>;

    /// Remove from both sides of the relation. Idempotent.
    async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<()>;

    /// Returns true if the user exists.
    async fn set_celebrity(&self, user_id: Uuid, is_celebrity: bool) -> Result<bool>;

    /// Move the feed watermark of a user.
    async fn set_last_feed_update(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// Post records. Append-only apart from like counters and tags.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn create(&self, author_id: Uuid, content: String, tags: Vec<String>) -> Result<Post>;

    async fn get(&self, post_id: Uuid) -> Result<Option<Post>>;

    /// Every post, newest first.
    async fn list(&self) -> Result<Vec<Post>>;

    /// Posts of one author, newest first.
    async fn list_by_author(&self, author_id: Uuid) -> Result<Vec<Post>>;

    async fn update(&self, post_id: Uuid, changes: UpdatePostRequest) -> Result<Option<Post>>;

    async fn delete(&self, post_id: Uuid) -> Result<bool>;

    async fn like(&self, post_id: Uuid) -> Result<bool>;

    /// Decrement the like counter without going below zero.
    async fn unlike(&self, post_id: Uuid) -> Result<bool>;

    async fn add_tag(&self, post_id: Uuid, tag: &str) -> Result<bool>;

    async fn remove_tag(&self, post_id: Uuid, tag: &str) -> Result<bool>;

    /// Posts written by any of `author_ids` strictly after `since`, newest
    /// first. Unbounded.
    async fn find_by_authors_since(
        &self,
        author_ids: &[Uuid],
        since: DateTime<Utc>,
    ) -> Result<Vec<Post>>;

    /// Posts whose id is in `ids`, newest first, after skipping `skip` and
    /// keeping at most `limit`.
    async fn find_by_ids(&self, ids: &[Uuid], skip: u64, limit: u64) -> Result<Vec<Post>>;
}

/// One materialized feed per user.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Load the user's feed, creating an empty one stamped `now` if absent.
    async fn get_or_create(&self, user_id: Uuid) -> Result<Feed>;

    /// Replace the feed's post ids if its version still equals
    /// `expected_version`. Fails with `AppError::Conflict` otherwise.
    async fn update_posts(
        &self,
        user_id: Uuid,
        post_ids: &[Uuid],
        updated_at: DateTime<Utc>,
        expected_version: i64,
    ) -> Result<Feed>;
}

/// Create the PostgreSQL pool and verify it answers.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(
        max_connections = config.max_connections,
        "Database pool created and verified"
    );

    Ok(pool)
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| crate::error::AppError::Database(format!("migration failed: {}", e)))?;
    info!("Database migrations applied");
    Ok(())
}

/// Drop duplicates while keeping the first occurrence of every tag.
pub(crate) fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}
