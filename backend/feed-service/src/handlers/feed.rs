use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::{debug, error};

use super::{parse_id, AppState};
use crate::error::{AppError, Result};

/// Raw query of `GET /feeds/{id}`. Values stay strings so that non-numeric
/// input is reported as a 400 with a useful message.
#[derive(Debug, Default, Deserialize)]
pub struct FeedQueryParams {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl FeedQueryParams {
    fn page(&self) -> Result<i64> {
        parse_number(self.page.as_deref(), "page", 1)
    }

    fn limit(&self, default: u32) -> Result<i64> {
        parse_number(self.limit.as_deref(), "limit", i64::from(default))
    }
}

fn parse_number(raw: Option<&str>, name: &str, default: i64) -> Result<i64> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse::<i64>()
            .map_err(|_| AppError::BadRequest(format!("{} must be an integer, got '{}'", name, value))),
    }
}

/// GET /feeds/{id}?page=&limit=
pub async fn get_feed(
    path: web::Path<String>,
    query: web::Query<FeedQueryParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let user_id = parse_id(&path, "user")?;
    let page = query.page()?;
    let limit = query.limit(state.feed_service.config().default_page_limit)?;

    debug!(user_id = %user_id, page, limit, "Getting feed");

    let feed_page = state
        .feed_service
        .get_feed(user_id, page, limit)
        .await
        .map_err(|e| {
            if e.is_dependency_failure() {
                error!(user_id = %user_id, error = %e, "Feed request failed");
            }
            e
        })?;
    Ok(HttpResponse::Ok().json(feed_page))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/feeds/{id}", web::get().to(get_feed));
}
