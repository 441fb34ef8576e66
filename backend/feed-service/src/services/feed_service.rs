//! Feed read path: response cache, staleness check, fanout-merge, page fetch

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::deadline::Deadline;
use super::fanout::fanout_merge;
use super::user_locks::UserLocks;
use crate::cache::{feed_page_key, ResponseCache};
use crate::config::FeedConfig;
use crate::db::{FeedStore, PostStore, UserDirectory};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{Feed, FeedPage, Post};

/// Validated `(page, limit)` pair. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
}

impl Pagination {
    /// Accepts any positive `page` and `limit`. `max_limit`, when set, caps
    /// the page size.
    pub fn new(page: i64, limit: i64, max_limit: Option<u32>) -> Result<Self> {
        let page = u64::try_from(page)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| {
                AppError::BadRequest(format!("page must be a positive integer, got {}", page))
            })?;
        let limit = u64::try_from(limit)
            .ok()
            .filter(|l| *l >= 1)
            .ok_or_else(|| {
                AppError::BadRequest(format!("limit must be a positive integer, got {}", limit))
            })?;

        if let Some(max) = max_limit {
            if limit > u64::from(max) {
                return Err(AppError::BadRequest(format!(
                    "limit must be between 1 and {}, got {}",
                    max, limit
                )));
            }
        }

        Ok(Self { page, limit })
    }

    /// Number of feed entries before this page. Saturates for pages far past
    /// the end of any feed.
    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

pub struct FeedService {
    users: Arc<dyn UserDirectory>,
    posts: Arc<dyn PostStore>,
    feeds: Arc<dyn FeedStore>,
    cache: Arc<dyn ResponseCache>,
    locks: UserLocks,
    config: FeedConfig,
}

impl FeedService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        posts: Arc<dyn PostStore>,
        feeds: Arc<dyn FeedStore>,
        cache: Arc<dyn ResponseCache>,
        config: FeedConfig,
    ) -> Self {
        Self {
            users,
            posts,
            feeds,
            cache,
            locks: UserLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Serve one page of `user_id`'s feed under the configured request timeout.
    pub async fn get_feed(&self, user_id: Uuid, page: i64, limit: i64) -> Result<FeedPage> {
        let deadline = Deadline::after(self.config.request_timeout());
        self.get_feed_with_deadline(user_id, page, limit, &deadline)
            .await
    }

    pub async fn get_feed_with_deadline(
        &self,
        user_id: Uuid,
        page: i64,
        limit: i64,
        deadline: &Deadline,
    ) -> Result<FeedPage> {
        let pagination = Pagination::new(page, limit, self.config.max_page_limit)?;
        let key = feed_page_key(user_id, pagination.page, pagination.limit);

        if let Some(posts) = self.cached_page(&key, deadline).await? {
            metrics::record_feed_request("cache");
            return Ok(FeedPage {
                posts,
                page: pagination.page,
                limit: pagination.limit,
            });
        }

        let user = deadline
            .run("load user", self.users.get(user_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {} not found", user_id)))?;

        let mut feed = deadline
            .run("load feed", self.feeds.get_or_create(user_id))
            .await?;

        if self
            .config
            .staleness_rule
            .is_stale(user.last_feed_update, feed.updated_at)
        {
            feed = self.refresh_feed(user_id, deadline).await?;
        }

        let posts = deadline
            .run(
                "fetch feed page",
                self.posts.find_by_ids(
                    &feed.post_ids,
                    pagination.skip(),
                    pagination.limit,
                ),
            )
            .await?;

        self.store_page(&key, &posts, deadline).await;
        metrics::record_feed_request("store");

        Ok(FeedPage {
            posts,
            page: pagination.page,
            limit: pagination.limit,
        })
    }

    /// Cached page for `key`. Read failures and undecodable entries count as a
    /// miss; only an aborted request is returned as an error.
    async fn cached_page(&self, key: &str, deadline: &Deadline) -> Result<Option<Vec<Post>>> {
        match deadline.run("cache get", self.cache.get(key)).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Post>>(&raw) {
                Ok(posts) => {
                    debug!(key = %key, "Feed cache hit");
                    metrics::record_cache_event("hit");
                    Ok(Some(posts))
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable cached feed page");
                    metrics::record_cache_event("error");
                    Ok(None)
                }
            },
            Ok(None) => {
                debug!(key = %key, "Feed cache miss");
                metrics::record_cache_event("miss");
                Ok(None)
            }
            Err(e @ AppError::Aborted(_)) => Err(e),
            Err(e) => {
                warn!(key = %key, error = %e, "Feed cache read failed, falling back to store");
                metrics::record_cache_event("error");
                Ok(None)
            }
        }
    }

    async fn store_page(&self, key: &str, posts: &[Post], deadline: &Deadline) {
        let payload = match serde_json::to_string(posts) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize feed page for cache");
                metrics::record_cache_write("error");
                return;
            }
        };

        match deadline
            .run(
                "cache set",
                self.cache.set(key, &payload, self.config.cache_ttl()),
            )
            .await
        {
            Ok(()) => metrics::record_cache_write("ok"),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to cache feed page");
                metrics::record_cache_write("error");
            }
        }
    }

    /// Run fanout-merge for `user_id` while holding the user's merge lock.
    ///
    /// Staleness is re-checked after the lock is taken, so callers queued
    /// behind a merge see its result instead of merging again. A version
    /// conflict from another writer reloads and retries.
    async fn refresh_feed(&self, user_id: Uuid, deadline: &Deadline) -> Result<Feed> {
        let _guard = deadline
            .run("acquire merge lock", async {
                Ok(self.locks.lock(user_id).await)
            })
            .await?;

        let mut attempt: u32 = 0;
        loop {
            let user = deadline
                .run("reload user", self.users.get(user_id))
                .await?
                .ok_or_else(|| AppError::NotFound(format!("user {} not found", user_id)))?;
            let feed = deadline
                .run("reload feed", self.feeds.get_or_create(user_id))
                .await?;

            if !self
                .config
                .staleness_rule
                .is_stale(user.last_feed_update, feed.updated_at)
            {
                debug!(user_id = %user_id, "Feed refreshed by a concurrent request");
                metrics::record_fanout("skipped");
                return Ok(feed);
            }

            let started = Instant::now();
            match fanout_merge(
                self.users.as_ref(),
                self.posts.as_ref(),
                self.feeds.as_ref(),
                &user,
                &feed,
                deadline,
            )
            .await
            {
                Ok(outcome) => {
                    metrics::record_fanout("merged");
                    metrics::record_fanout_new_posts(outcome.new_posts);
                    metrics::record_fanout_duration(started.elapsed());
                    info!(
                        user_id = %user_id,
                        new_posts = outcome.new_posts,
                        followees = outcome.followees_considered,
                        skipped_followees = outcome.followees_skipped,
                        feed_size = outcome.feed.post_ids.len(),
                        "Feed merged"
                    );

                    if self.config.invalidate_on_merge {
                        if let Err(e) = deadline
                            .run("invalidate cached pages", self.cache.invalidate_user(user_id))
                            .await
                        {
                            warn!(user_id = %user_id, error = %e, "Failed to invalidate cached feed pages");
                        }
                    }

                    return Ok(outcome.feed);
                }
                Err(AppError::Conflict(msg)) if attempt < self.config.merge_max_retries => {
                    attempt += 1;
                    metrics::record_fanout("conflict");
                    warn!(user_id = %user_id, attempt, "Feed merge conflict, retrying: {}", msg);
                }
                // Out of retries: report as a store failure
                Err(AppError::Conflict(msg)) => {
                    metrics::record_fanout("error");
                    error!(user_id = %user_id, attempts = attempt + 1, "Feed merge kept conflicting: {}", msg);
                    return Err(AppError::Database(format!(
                        "feed merge kept conflicting: {}",
                        msg
                    )));
                }
                Err(e) => {
                    metrics::record_fanout("error");
                    error!(user_id = %user_id, error = %e, "Feed merge failed");
                    return Err(e);
                }
            }
        }
    }
}
