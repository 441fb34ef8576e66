use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::{NewUser, UserDirectory};
use crate::error::{AppError, Result};
use crate::models::{initial_watermark, UpdateUserRequest, User};

/// Columns of `User`, with the follow sets folded in from `follows`.
const USER_COLUMNS: &str = r#"
    u.id, u.username, u.bio, u.is_celebrity, u.created_at, u.last_feed_update,
    ARRAY(
        SELECT f.followee_id FROM follows f
        WHERE f.follower_id = u.id
        ORDER BY f.followee_id
    ) AS following,
    ARRAY(
        SELECT f.follower_id FROM follows f
        WHERE f.followee_id = u.id
        ORDER BY f.follower_id
    ) AS followers
"#;

/// PostgreSQL-backed user directory.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn create(&self, user: NewUser) -> Result<User> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO users (id, username, bio, is_celebrity, created_at, last_feed_update)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&user.username)
        .bind(&user.bio)
        .bind(user.is_celebrity)
        .bind(Utc::now())
        .bind(initial_watermark())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create user: {}", e);
            AppError::Database(e.to_string())
        })?;

        self.get(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("user {} vanished after insert", id)))
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users u WHERE u.id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn list(&self) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM users u ORDER BY u.created_at DESC",
            USER_COLUMNS
        );
        let users = sqlx::query_as::<_, User>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn update(&self, user_id: Uuid, changes: UpdateUserRequest) -> Result<Option<User>> {
        let affected = sqlx::query(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                bio = COALESCE($3, bio)
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(changes.username)
        .bind(changes.bio)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Ok(None);
        }
        self.get(user_id).await
    }

    async fn delete(&self, user_id: Uuid) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO follows (follower_id, followee_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (follower_id, followee_id) DO NOTHING
            "#,
        )
        .bind(follower_id)
        .bind(followee_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(
                follower = %follower_id,
                followee = %followee_id,
                "Failed to create follow: {}", e
            );
            AppError::Database(e.to_string())
        })?;
        Ok(())
    }

    async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND followee_id = $2")
            .bind(follower_id)
            .bind(followee_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_celebrity(&self, user_id: Uuid, is_celebrity: bool) -> Result<bool> {
        let affected = sqlx::query("UPDATE users SET is_celebrity = $2 WHERE id = $1")
            .bind(user_id)
            .bind(is_celebrity)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn set_last_feed_update(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_feed_update = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(user_id = %user_id, "Failed to move feed watermark: {}", e);
                AppError::Database(e.to_string())
            })?;
        Ok(())
    }
}
