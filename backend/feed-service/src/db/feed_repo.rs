use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error};
use uuid::Uuid;

use super::FeedStore;
use crate::error::{AppError, Result};
use crate::models::Feed;

/// PostgreSQL-backed feed store. One row per user, keyed by `user_id`.
#[derive(Clone)]
pub struct PgFeedStore {
    pool: PgPool,
}

impl PgFeedStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedStore for PgFeedStore {
    async fn get_or_create(&self, user_id: Uuid) -> Result<Feed> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO feeds (id, user_id, post_ids, updated_at, version)
            VALUES ($1, $2, '{}', $3, 0)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(user_id = %user_id, "Failed to create feed: {}", e);
            AppError::Database(e.to_string())
        })?
        .rows_affected();

        if inserted > 0 {
            debug!(user_id = %user_id, "Created empty feed");
        }

        let feed = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, user_id, post_ids, updated_at, version
            FROM feeds
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(feed)
    }

    async fn update_posts(
        &self,
        user_id: Uuid,
        post_ids: &[Uuid],
        updated_at: DateTime<Utc>,
        expected_version: i64,
    ) -> Result<Feed> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            UPDATE feeds
            SET post_ids = $2, updated_at = $3, version = version + 1
            WHERE user_id = $1 AND version = $4
            RETURNING id, user_id, post_ids, updated_at, version
            "#,
        )
        .bind(user_id)
        .bind(post_ids.to_vec())
        .bind(updated_at)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(user_id = %user_id, "Failed to update feed: {}", e);
            AppError::Database(e.to_string())
        })?;

        feed.ok_or_else(|| {
            AppError::Conflict(format!(
                "feed of user {} changed since version {}",
                user_id, expected_version
            ))
        })
    }
}
