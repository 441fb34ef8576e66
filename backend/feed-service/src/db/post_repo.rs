use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::{dedup_tags, PostStore};
use crate::error::{AppError, Result};
use crate::models::{Post, UpdatePostRequest};

/// PostgreSQL-backed post store.
#[derive(Clone)]
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn create(&self, author_id: Uuid, content: String, tags: Vec<String>) -> Result<Post> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (id, author_id, content, like_count, tags, created_at)
            VALUES ($1, $2, $3, 0, $4, $5)
            RETURNING id, author_id, content, like_count, tags, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(author_id)
        .bind(content)
        .bind(dedup_tags(tags))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(author_id = %author_id, "Failed to create post: {}", e);
            AppError::Database(e.to_string())
        })?;

        Ok(post)
    }

    async fn get(&self, post_id: Uuid) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, content, like_count, tags, created_at
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(post)
    }

    async fn list(&self) -> Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, content, like_count, tags, created_at
            FROM posts
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    async fn list_by_author(&self, author_id: Uuid) -> Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, content, like_count, tags, created_at
            FROM posts
            WHERE author_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    async fn update(&self, post_id: Uuid, changes: UpdatePostRequest) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            UPDATE posts
            SET content = COALESCE($2, content),
                tags = COALESCE($3, tags)
            WHERE id = $1
            RETURNING id, author_id, content, like_count, tags, created_at
            "#,
        )
        .bind(post_id)
        .bind(changes.content)
        .bind(changes.tags.map(dedup_tags))
        .fetch_optional(&self.pool)
        .await?;
        Ok(post)
    }

    async fn delete(&self, post_id: Uuid) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn like(&self, post_id: Uuid) -> Result<bool> {
        let affected = sqlx::query("UPDATE posts SET like_count = like_count + 1 WHERE id = $1")
            .bind(post_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn unlike(&self, post_id: Uuid) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE posts SET like_count = GREATEST(like_count - 1, 0) WHERE id = $1",
        )
        .bind(post_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn add_tag(&self, post_id: Uuid, tag: &str) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE posts
            SET tags = CASE WHEN $2 = ANY(tags) THEN tags ELSE array_append(tags, $2) END
            WHERE id = $1
            "#,
        )
        .bind(post_id)
        .bind(tag)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn remove_tag(&self, post_id: Uuid, tag: &str) -> Result<bool> {
        let affected = sqlx::query("UPDATE posts SET tags = array_remove(tags, $2) WHERE id = $1")
            .bind(post_id)
            .bind(tag)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn find_by_authors_since(
        &self,
        author_ids: &[Uuid],
        since: DateTime<Utc>,
    ) -> Result<Vec<Post>> {
        if author_ids.is_empty() {
            return Ok(Vec::new());
        }

        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, content, like_count, tags, created_at
            FROM posts
            WHERE author_id = ANY($1) AND created_at > $2
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(author_ids.to_vec())
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(authors = author_ids.len(), "Failed to query new posts: {}", e);
            AppError::Database(e.to_string())
        })?;

        Ok(posts)
    }

    async fn find_by_ids(&self, ids: &[Uuid], skip: u64, limit: u64) -> Result<Vec<Post>> {
        if ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, content, like_count, tags, created_at
            FROM posts
            WHERE id = ANY($1)
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#,
        )
        .bind(ids.to_vec())
        .bind(i64::try_from(skip).unwrap_or(i64::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(posts)
    }
}
