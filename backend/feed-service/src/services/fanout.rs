//! Push fanout of ordinary followees' posts into a materialized feed
//!
//! Celebrity followees are skipped. Nothing pulls their posts in at read
//! time either, so they never reach a follower's feed.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use uuid::Uuid;

use super::deadline::Deadline;
use crate::db::{FeedStore, PostStore, UserDirectory};
use crate::error::{AppError, Result};
use crate::models::{Feed, User};

/// When a materialized feed counts as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessRule {
    /// Refresh when `user.last_feed_update < feed.updated_at`.
    #[default]
    WatermarkBeforeFeed,
    /// Refresh when `feed.updated_at < user.last_feed_update`.
    FeedBeforeWatermark,
}

impl StalenessRule {
    pub fn is_stale(&self, watermark: DateTime<Utc>, feed_updated_at: DateTime<Utc>) -> bool {
        match self {
            StalenessRule::WatermarkBeforeFeed => watermark < feed_updated_at,
            StalenessRule::FeedBeforeWatermark => feed_updated_at < watermark,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StalenessRule::WatermarkBeforeFeed => "watermark_before_feed",
            StalenessRule::FeedBeforeWatermark => "feed_before_watermark",
        }
    }
}

impl fmt::Display for StalenessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StalenessRule {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "watermark_before_feed" => Ok(StalenessRule::WatermarkBeforeFeed),
            "feed_before_watermark" => Ok(StalenessRule::FeedBeforeWatermark),
            other => Err(format!(
                "unknown staleness rule '{}' (expected watermark_before_feed or feed_before_watermark)",
                other
            )),
        }
    }
}

/// Prepend `new_ids` to `existing`, dropping ids already present.
///
/// Order of `new_ids` is kept (newest first) and `existing` is never
/// reordered or shortened.
pub fn merge_post_ids(new_ids: &[Uuid], existing: &[Uuid]) -> Vec<Uuid> {
    let mut seen: HashSet<Uuid> = existing.iter().copied().collect();
    let mut merged = Vec::with_capacity(new_ids.len() + existing.len());

    for id in new_ids {
        if seen.insert(*id) {
            merged.push(*id);
        }
    }
    merged.extend_from_slice(existing);
    merged
}

/// Result of one successful fanout-merge.
#[derive(Debug, Clone)]
pub struct FanoutOutcome {
    pub feed: Feed,
    /// Ids actually added to the feed.
    pub new_posts: usize,
    pub followees_considered: usize,
    /// Celebrities plus followees whose lookup failed.
    pub followees_skipped: usize,
}

/// Merge posts of `user`'s ordinary followees written after the user's
/// watermark into `feed`, then move the watermark to the same instant as the
/// feed's new `updated_at`.
///
/// The feed write is conditioned on `feed.version`; a concurrent writer makes
/// this return `AppError::Conflict` without touching the watermark.
pub async fn fanout_merge(
    users: &dyn UserDirectory,
    posts: &dyn PostStore,
    feeds: &dyn FeedStore,
    user: &User,
    feed: &Feed,
    deadline: &Deadline,
) -> Result<FanoutOutcome> {
    let lookups = user.following.iter().map(|followee_id| async move {
        let result = deadline.run("followee lookup", users.get(*followee_id)).await;
        (*followee_id, result)
    });

    let mut ordinary = Vec::with_capacity(user.following.len());
    let mut skipped = 0;
    for (followee_id, result) in join_all(lookups).await {
        match result {
            Ok(Some(followee)) if followee.is_celebrity => {
                debug!(user_id = %user.id, followee_id = %followee_id, "Skipping celebrity followee");
                skipped += 1;
            }
            Ok(Some(_)) => ordinary.push(followee_id),
            Ok(None) => {
                debug!(user_id = %user.id, followee_id = %followee_id, "Followee no longer exists");
                skipped += 1;
            }
            Err(e @ AppError::Aborted(_)) => return Err(e),
            Err(e) => {
                warn!(
                    user_id = %user.id,
                    followee_id = %followee_id,
                    error = %e,
                    "Followee lookup failed, omitting from merge"
                );
                skipped += 1;
            }
        }
    }

    let new_ids: Vec<Uuid> = if ordinary.is_empty() {
        Vec::new()
    } else {
        deadline
            .run(
                "find posts by authors",
                posts.find_by_authors_since(&ordinary, user.last_feed_update),
            )
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect()
    };

    let merged = merge_post_ids(&new_ids, &feed.post_ids);
    let added = merged.len() - feed.post_ids.len();
    let now = Utc::now();

    let updated = deadline
        .run(
            "update feed",
            feeds.update_posts(user.id, &merged, now, feed.version),
        )
        .await?;

    deadline
        .run(
            "set feed watermark",
            users.set_last_feed_update(user.id, now),
        )
        .await?;

    Ok(FanoutOutcome {
        feed: updated,
        new_posts: added,
        followees_considered: user.following.len(),
        followees_skipped: skipped,
    })
}
