pub mod feed;
pub mod health;
pub mod posts;
pub mod users;

use actix_web::web;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{PostStore, UserDirectory};
use crate::error::{AppError, Result};
use crate::services::FeedService;

pub use feed::get_feed;

/// Shared state of every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserDirectory>,
    pub posts: Arc<dyn PostStore>,
    pub feed_service: Arc<FeedService>,
}

/// Parse a path segment as an id; malformed ids are a client error.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("invalid {} id: {}", what, raw)))
}

/// Register every route of the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    health::configure(cfg);
    feed::configure(cfg);
    users::configure(cfg);
    posts::configure(cfg);
}
