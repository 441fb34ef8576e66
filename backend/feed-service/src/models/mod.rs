use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Watermark of a user whose feed has never been merged.
///
/// Every post is newer than this, so the first fanout picks up the whole
/// history of the user's ordinary followees.
pub fn initial_watermark() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub bio: String,
    /// Accounts this user follows. Set semantics, kept sorted by the store.
    #[serde(default)]
    pub following: Vec<Uuid>,
    #[serde(default)]
    pub followers: Vec<Uuid>,
    pub is_celebrity: bool,
    pub created_at: DateTime<Utc>,
    /// Point up to which the user's materialized feed reflects followee posts.
    pub last_feed_update: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    #[serde(rename = "user_id")]
    pub author_id: Uuid,
    pub content: String,
    pub like_count: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Materialized timeline of one user: post ids, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Feed {
    pub id: Uuid,
    pub user_id: Uuid,
    pub post_ids: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every successful update; guards concurrent merges.
    pub version: i64,
}

impl Feed {
    pub fn empty(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            post_ids: Vec::new(),
            updated_at: now,
            version: 0,
        }
    }
}

/// One page of a user's feed as returned by `GET /feeds/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub is_celebrity: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CelebrityStatusRequest {
    pub is_celebrity: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePostRequest {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagRequest {
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_author_serialized_as_user_id() {
        let post = Post {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            content: "hello".to_string(),
            like_count: 0,
            tags: vec!["rust".to_string()],
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["user_id"], serde_json::json!(post.author_id));
        assert!(json.get("author_id").is_none());
    }

    #[test]
    fn test_initial_watermark_precedes_now() {
        assert!(initial_watermark() < Utc::now());
    }

    #[test]
    fn test_empty_feed() {
        let now = Utc::now();
        let feed = Feed::empty(Uuid::new_v4(), now);
        assert!(feed.post_ids.is_empty());
        assert_eq!(feed.updated_at, now);
        assert_eq!(feed.version, 0);
    }
}
