//! Integration Tests: response cache failures never fail a feed read

mod common;

use async_trait::async_trait;
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use common::Harness;
use feed_service::cache::ResponseCache;
use feed_service::db::PostStore;
use feed_service::error::{AppError, Result};

mock! {
    pub Cache {}

    #[async_trait]
    impl ResponseCache for Cache {
        async fn get(&self, key: &str) -> Result<Option<String>>;
        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
        async fn invalidate_user(&self, user_id: Uuid) -> Result<()>;
    }
}

#[tokio::test]
async fn test_cache_write_failure_still_returns_page() {
    let h = Harness::new();
    let alice = h.user("alice", false).await;
    let bob = h.user("bob", false).await;
    h.follow(&alice, &bob).await;
    let post = h.posts.create(bob.id, "hello".into(), vec![]).await.unwrap();

    let mut cache = MockCache::new();
    cache.expect_get().times(1).returning(|_| Ok(None));
    cache
        .expect_set()
        .times(1)
        .withf(|_, _, ttl| *ttl == Duration::from_secs(600))
        .returning(|_, _, _| Err(AppError::Cache("READONLY replica".to_string())));
    cache.expect_invalidate_user().never();

    let service = h.service_with_cache(Arc::new(cache));
    let page = service.get_feed(alice.id, 1, 10).await.unwrap();

    assert_eq!(page.posts.len(), 1);
    assert_eq!(page.posts[0].id, post.id);
}

#[tokio::test]
async fn test_unreachable_cache_serves_every_read_from_store() {
    let h = Harness::new();
    let alice = h.user("alice", false).await;
    let bob = h.user("bob", false).await;
    h.follow(&alice, &bob).await;
    h.posts.create(bob.id, "hello".into(), vec![]).await.unwrap();

    let mut cache = MockCache::new();
    cache
        .expect_get()
        .times(2)
        .returning(|_| Err(AppError::Cache("connection refused".to_string())));
    cache
        .expect_set()
        .times(2)
        .returning(|_, _, _| Err(AppError::Cache("connection refused".to_string())));

    let service = h.service_with_cache(Arc::new(cache));
    let first = service.get_feed(alice.id, 1, 10).await.unwrap();
    let second = service.get_feed(alice.id, 1, 10).await.unwrap();

    assert_eq!(first, second);
}
