use actix_web::{web, HttpResponse};
use tracing::info;

use super::{parse_id, AppState};
use crate::error::{AppError, Result};
use crate::models::{CreatePostRequest, MessageResponse, Post, TagRequest, UpdatePostRequest};

fn post_not_found(raw: &str) -> AppError {
    AppError::NotFound(format!("post {} not found", raw))
}

fn validate_tag(tag: &str) -> Result<&str> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(AppError::BadRequest("tag must not be empty".to_string()));
    }
    Ok(tag)
}

/// POST /users/{id}/posts
pub async fn create_post(
    path: web::Path<String>,
    state: web::Data<AppState>,
    req: web::Json<CreatePostRequest>,
) -> Result<HttpResponse> {
    let author_id = parse_id(&path, "user")?;
    if state.users.get(author_id).await?.is_none() {
        return Err(AppError::NotFound(format!("user {} not found", path.as_str())));
    }

    let req = req.into_inner();
    let post = state.posts.create(author_id, req.content, req.tags).await?;

    info!(post_id = %post.id, author_id = %author_id, "Post created");
    Ok(HttpResponse::Created().json(post))
}

/// GET /users/{id}/posts
pub async fn list_user_posts(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let author_id = parse_id(&path, "user")?;
    let posts = state.posts.list_by_author(author_id).await?;
    Ok(HttpResponse::Ok().json(posts))
}

/// GET /posts
pub async fn list_posts(state: web::Data<AppState>) -> Result<HttpResponse> {
    let posts = state.posts.list().await?;
    Ok(HttpResponse::Ok().json(posts))
}

/// GET /posts/{id}
pub async fn get_post(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let post_id = parse_id(&path, "post")?;
    let post = state
        .posts
        .get(post_id)
        .await?
        .ok_or_else(|| post_not_found(&path))?;
    Ok(HttpResponse::Ok().json(post))
}

/// PUT /posts/{id}
pub async fn update_post(
    path: web::Path<String>,
    state: web::Data<AppState>,
    req: web::Json<UpdatePostRequest>,
) -> Result<HttpResponse> {
    let post_id = parse_id(&path, "post")?;
    let post = state
        .posts
        .update(post_id, req.into_inner())
        .await?
        .ok_or_else(|| post_not_found(&path))?;
    Ok(HttpResponse::Ok().json(post))
}

/// DELETE /posts/{id}
pub async fn delete_post(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let post_id = parse_id(&path, "post")?;
    if !state.posts.delete(post_id).await? {
        return Err(post_not_found(&path));
    }

    info!(post_id = %post_id, "Post deleted");
    Ok(HttpResponse::Ok().json(MessageResponse::new("Post deleted successfully")))
}

/// Reload a post after a counter or tag change.
async fn reloaded(state: &AppState, post_id: uuid::Uuid, raw: &str) -> Result<Post> {
    state
        .posts
        .get(post_id)
        .await?
        .ok_or_else(|| post_not_found(raw))
}

/// POST /posts/{id}/like
pub async fn like_post(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let post_id = parse_id(&path, "post")?;
    if !state.posts.like(post_id).await? {
        return Err(post_not_found(&path));
    }
    Ok(HttpResponse::Ok().json(reloaded(&state, post_id, &path).await?))
}

/// POST /posts/{id}/unlike
pub async fn unlike_post(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let post_id = parse_id(&path, "post")?;
    if !state.posts.unlike(post_id).await? {
        return Err(post_not_found(&path));
    }
    Ok(HttpResponse::Ok().json(reloaded(&state, post_id, &path).await?))
}

/// POST /posts/{id}/tags
pub async fn add_tag(
    path: web::Path<String>,
    state: web::Data<AppState>,
    req: web::Json<TagRequest>,
) -> Result<HttpResponse> {
    let post_id = parse_id(&path, "post")?;
    let tag = validate_tag(&req.tag)?;
    if !state.posts.add_tag(post_id, tag).await? {
        return Err(post_not_found(&path));
    }
    Ok(HttpResponse::Ok().json(reloaded(&state, post_id, &path).await?))
}

/// DELETE /posts/{id}/tags
pub async fn remove_tag(
    path: web::Path<String>,
    state: web::Data<AppState>,
    req: web::Json<TagRequest>,
) -> Result<HttpResponse> {
    let post_id = parse_id(&path, "post")?;
    let tag = validate_tag(&req.tag)?;
    if !state.posts.remove_tag(post_id, tag).await? {
        return Err(post_not_found(&path));
    }
    Ok(HttpResponse::Ok().json(reloaded(&state, post_id, &path).await?))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/posts")
            .route("", web::get().to(list_posts))
            .route("/{id}", web::get().to(get_post))
            .route("/{id}", web::put().to(update_post))
            .route("/{id}", web::delete().to(delete_post))
            .route("/{id}/like", web::post().to(like_post))
            .route("/{id}/unlike", web::post().to(unlike_post))
            .route("/{id}/tags", web::post().to(add_tag))
            .route("/{id}/tags", web::delete().to(remove_tag)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tag_trims() {
        assert_eq!(validate_tag("  rust ").unwrap(), "rust");
        assert!(matches!(validate_tag("   "), Err(AppError::BadRequest(_))));
    }
}
