//! In-memory doubles of the feed-service stores
//!
//! Every store call yields to the scheduler so concurrently polled requests
//! interleave the way they would against a remote store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use feed_service::cache::ResponseCache;
use feed_service::config::FeedConfig;
use feed_service::db::{FeedStore, NewUser, PostStore, UserDirectory};
use feed_service::error::{AppError, Result};
use feed_service::handlers::AppState;
use feed_service::models::{initial_watermark, Feed, Post, UpdatePostRequest, UpdateUserRequest, User};
use feed_service::services::FeedService;

fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

#[derive(Default)]
pub struct InMemoryUsers {
    users: Mutex<HashMap<Uuid, User>>,
    failing: Mutex<HashSet<Uuid>>,
    delay: Mutex<Option<Duration>>,
    pub watermark_writes: AtomicUsize,
}

impl InMemoryUsers {
    /// Make every `get` of `user_id` fail with a database error.
    pub fn fail_lookups_of(&self, user_id: Uuid) {
        self.failing.lock().unwrap().insert(user_id);
    }

    /// Make every call sleep for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn snapshot(&self, user_id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&user_id).cloned()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        match delay {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUsers {
    async fn create(&self, user: NewUser) -> Result<User> {
        self.pause().await;
        let user = User {
            id: Uuid::new_v4(),
            username: user.username,
            bio: user.bio,
            following: Vec::new(),
            followers: Vec::new(),
            is_celebrity: user.is_celebrity,
            created_at: Utc::now(),
            last_feed_update: initial_watermark(),
        };
        self.users.lock().unwrap().insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<User>> {
        self.pause().await;
        if self.failing.lock().unwrap().contains(&user_id) {
            return Err(AppError::Database(format!("lookup of {} failed", user_id)));
        }
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn list(&self) -> Result<Vec<User>> {
        self.pause().await;
        let mut users: Vec<User> = self.users.lock().unwrap().values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn update(&self, user_id: Uuid, changes: UpdateUserRequest) -> Result<Option<User>> {
        self.pause().await;
        let mut users = self.users.lock().unwrap();
        Ok(users.get_mut(&user_id).map(|user| {
            if let Some(username) = changes.username {
                user.username = username;
            }
            if let Some(bio) = changes.bio {
                user.bio = bio;
            }
            user.clone()
        }))
    }

    async fn delete(&self, user_id: Uuid) -> Result<bool> {
        self.pause().await;
        let mut users = self.users.lock().unwrap();
        let removed = users.remove(&user_id).is_some();
        for user in users.values_mut() {
            user.following.retain(|id| *id != user_id);
            user.followers.retain(|id| *id != user_id);
        }
        Ok(removed)
    }

    async fn follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<()> {
        self.pause().await;
        let mut users = self.users.lock().unwrap();
        if !users.contains_key(&follower_id) || !users.contains_key(&followee_id) {
            return Err(AppError::NotFound("user not found".to_string()));
        }
        if let Some(follower) = users.get_mut(&follower_id) {
            if !follower.following.contains(&followee_id) {
                follower.following.push(followee_id);
                follower.following.sort();
            }
        }
        if let Some(followee) = users.get_mut(&followee_id) {
            if !followee.followers.contains(&follower_id) {
                followee.followers.push(follower_id);
                followee.followers.sort();
            }
        }
        Ok(())
    }

    async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<()> {
        self.pause().await;
        let mut users = self.users.lock().unwrap();
        if let Some(follower) = users.get_mut(&follower_id) {
            follower.following.retain(|id| *id != followee_id);
        }
        if let Some(followee) = users.get_mut(&followee_id) {
            followee.followers.retain(|id| *id != follower_id);
        }
        Ok(())
    }

    async fn set_celebrity(&self, user_id: Uuid, is_celebrity: bool) -> Result<bool> {
        self.pause().await;
        let mut users = self.users.lock().unwrap();
        Ok(users
            .get_mut(&user_id)
            .map(|user| user.is_celebrity = is_celebrity)
            .is_some())
    }

    async fn set_last_feed_update(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.pause().await;
        self.watermark_writes.fetch_add(1, Ordering::SeqCst);
        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.last_feed_update = at;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPosts {
    posts: Mutex<HashMap<Uuid, Post>>,
    pub range_queries: AtomicUsize,
}

impl InMemoryPosts {
    /// Store a post with a chosen creation time.
    pub fn insert_at(&self, author_id: Uuid, content: &str, created_at: DateTime<Utc>) -> Post {
        let post = Post {
            id: Uuid::new_v4(),
            author_id,
            content: content.to_string(),
            like_count: 0,
            tags: Vec::new(),
            created_at,
        };
        self.posts.lock().unwrap().insert(post.id, post.clone());
        post
    }
}

#[async_trait]
impl PostStore for InMemoryPosts {
    async fn create(&self, author_id: Uuid, content: String, tags: Vec<String>) -> Result<Post> {
        tokio::task::yield_now().await;
        let post = Post {
            id: Uuid::new_v4(),
            author_id,
            content,
            like_count: 0,
            tags: clean_tags(tags),
            created_at: Utc::now(),
        };
        self.posts.lock().unwrap().insert(post.id, post.clone());
        Ok(post)
    }

    async fn get(&self, post_id: Uuid) -> Result<Option<Post>> {
        tokio::task::yield_now().await;
        Ok(self.posts.lock().unwrap().get(&post_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Post>> {
        tokio::task::yield_now().await;
        let mut posts: Vec<Post> = self.posts.lock().unwrap().values().cloned().collect();
        sort_newest_first(&mut posts);
        Ok(posts)
    }

    async fn list_by_author(&self, author_id: Uuid) -> Result<Vec<Post>> {
        tokio::task::yield_now().await;
        let mut posts: Vec<Post> = self
            .posts
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.author_id == author_id)
            .cloned()
            .collect();
        sort_newest_first(&mut posts);
        Ok(posts)
    }

    async fn update(&self, post_id: Uuid, changes: UpdatePostRequest) -> Result<Option<Post>> {
        tokio::task::yield_now().await;
        let mut posts = self.posts.lock().unwrap();
        Ok(posts.get_mut(&post_id).map(|post| {
            if let Some(content) = changes.content {
                post.content = content;
            }
            if let Some(tags) = changes.tags {
                post.tags = clean_tags(tags);
            }
            post.clone()
        }))
    }

    async fn delete(&self, post_id: Uuid) -> Result<bool> {
        tokio::task::yield_now().await;
        Ok(self.posts.lock().unwrap().remove(&post_id).is_some())
    }

    async fn like(&self, post_id: Uuid) -> Result<bool> {
        tokio::task::yield_now().await;
        let mut posts = self.posts.lock().unwrap();
        Ok(posts.get_mut(&post_id).map(|p| p.like_count += 1).is_some())
    }

    async fn unlike(&self, post_id: Uuid) -> Result<bool> {
        tokio::task::yield_now().await;
        let mut posts = self.posts.lock().unwrap();
        Ok(posts
            .get_mut(&post_id)
            .map(|p| p.like_count = (p.like_count - 1).max(0))
            .is_some())
    }

    async fn add_tag(&self, post_id: Uuid, tag: &str) -> Result<bool> {
        tokio::task::yield_now().await;
        let mut posts = self.posts.lock().unwrap();
        Ok(posts
            .get_mut(&post_id)
            .map(|p| {
                if !p.tags.iter().any(|t| t == tag) {
                    p.tags.push(tag.to_string());
                }
            })
            .is_some())
    }

    async fn remove_tag(&self, post_id: Uuid, tag: &str) -> Result<bool> {
        tokio::task::yield_now().await;
        let mut posts = self.posts.lock().unwrap();
        Ok(posts
            .get_mut(&post_id)
            .map(|p| p.tags.retain(|t| t != tag))
            .is_some())
    }

    async fn find_by_authors_since(
        &self,
        author_ids: &[Uuid],
        since: DateTime<Utc>,
    ) -> Result<Vec<Post>> {
        tokio::task::yield_now().await;
        self.range_queries.fetch_add(1, Ordering::SeqCst);
        let mut posts: Vec<Post> = self
            .posts
            .lock()
            .unwrap()
            .values()
            .filter(|p| author_ids.contains(&p.author_id) && p.created_at > since)
            .cloned()
            .collect();
        sort_newest_first(&mut posts);
        Ok(posts)
    }

    async fn find_by_ids(&self, ids: &[Uuid], skip: u64, limit: u64) -> Result<Vec<Post>> {
        tokio::task::yield_now().await;
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        let mut posts: Vec<Post> = self
            .posts
            .lock()
            .unwrap()
            .values()
            .filter(|p| wanted.contains(&p.id))
            .cloned()
            .collect();
        sort_newest_first(&mut posts);
        Ok(posts
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryFeeds {
    feeds: Mutex<HashMap<Uuid, Feed>>,
    forced_conflicts: AtomicUsize,
    pub updates: AtomicUsize,
    pub conflicts: AtomicUsize,
}

impl InMemoryFeeds {
    /// Make the next `count` updates lose their version race.
    pub fn force_conflicts(&self, count: usize) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn snapshot(&self, user_id: Uuid) -> Option<Feed> {
        self.feeds.lock().unwrap().get(&user_id).cloned()
    }
}

#[async_trait]
impl FeedStore for InMemoryFeeds {
    async fn get_or_create(&self, user_id: Uuid) -> Result<Feed> {
        tokio::task::yield_now().await;
        let mut feeds = self.feeds.lock().unwrap();
        Ok(feeds
            .entry(user_id)
            .or_insert_with(|| Feed::empty(user_id, Utc::now()))
            .clone())
    }

    async fn update_posts(
        &self,
        user_id: Uuid,
        post_ids: &[Uuid],
        updated_at: DateTime<Utc>,
        expected_version: i64,
    ) -> Result<Feed> {
        tokio::task::yield_now().await;
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(AppError::Conflict("forced conflict".to_string()));
        }

        let mut feeds = self.feeds.lock().unwrap();
        let feed = feeds
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("feed of {} not found", user_id)))?;
        if feed.version != expected_version {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(AppError::Conflict(format!(
                "expected version {}, found {}",
                expected_version, feed.version
            )));
        }

        feed.post_ids = post_ids.to_vec();
        feed.updated_at = updated_at;
        feed.version += 1;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(feed.clone())
    }
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
}

impl InMemoryCache {
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl ResponseCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        tokio::task::yield_now().await;
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Cache("connection refused".to_string()));
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<()> {
        tokio::task::yield_now().await;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn invalidate_user(&self, user_id: Uuid) -> Result<()> {
        tokio::task::yield_now().await;
        let prefix = format!("feed:{}:", user_id);
        self.entries
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}

/// Stores, cache and a `FeedService` wired together.
pub struct Harness {
    pub users: Arc<InMemoryUsers>,
    pub posts: Arc<InMemoryPosts>,
    pub feeds: Arc<InMemoryFeeds>,
    pub cache: Arc<InMemoryCache>,
    pub service: Arc<FeedService>,
    pub config: FeedConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(FeedConfig::default())
    }

    pub fn with_config(config: FeedConfig) -> Self {
        let users = Arc::new(InMemoryUsers::default());
        let posts = Arc::new(InMemoryPosts::default());
        let feeds = Arc::new(InMemoryFeeds::default());
        let cache = Arc::new(InMemoryCache::default());
        let service = Arc::new(FeedService::new(
            users.clone(),
            posts.clone(),
            feeds.clone(),
            cache.clone(),
            config.clone(),
        ));

        Self {
            users,
            posts,
            feeds,
            cache,
            service,
            config,
        }
    }

    /// Another service over the same stores, with its own merge locks.
    pub fn second_service(&self) -> FeedService {
        self.service_with_cache(self.cache.clone())
    }

    pub fn service_with_cache(&self, cache: Arc<dyn ResponseCache>) -> FeedService {
        FeedService::new(
            self.users.clone(),
            self.posts.clone(),
            self.feeds.clone(),
            cache,
            self.config.clone(),
        )
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            users: self.users.clone(),
            posts: self.posts.clone(),
            feed_service: self.service.clone(),
        }
    }

    pub async fn user(&self, username: &str, is_celebrity: bool) -> User {
        self.users
            .create(NewUser {
                username: username.to_string(),
                bio: String::new(),
                is_celebrity,
            })
            .await
            .unwrap()
    }

    pub async fn follow(&self, follower: &User, followee: &User) {
        self.users.follow(follower.id, followee.id).await.unwrap();
    }
}
