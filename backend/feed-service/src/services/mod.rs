//! Service layer for feed-service
//!
//! - feed_service: cache-aside read path and merge orchestration
//! - fanout: staleness rule and push merge of followee posts
//! - user_locks: per-user merge exclusion
//! - deadline: request budget and cancellation for dependency calls

pub mod deadline;
pub mod fanout;
pub mod feed_service;
pub mod user_locks;

pub use deadline::{CancelHandle, Deadline};
pub use fanout::{fanout_merge, merge_post_ids, FanoutOutcome, StalenessRule};
pub use feed_service::{FeedService, Pagination};
pub use user_locks::{UserLockGuard, UserLocks};
