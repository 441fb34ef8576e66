use actix_web::{web, HttpResponse};
use tracing::info;

use super::{parse_id, AppState};
use crate::db::NewUser;
use crate::error::{AppError, Result};
use crate::models::{CelebrityStatusRequest, CreateUserRequest, MessageResponse, UpdateUserRequest};

fn user_not_found(raw: &str) -> AppError {
    AppError::NotFound(format!("user {} not found", raw))
}

fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(AppError::BadRequest("username must not be empty".to_string()));
    }
    Ok(())
}

/// POST /users
pub async fn create_user(
    state: web::Data<AppState>,
    req: web::Json<CreateUserRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    validate_username(&req.username)?;

    let user = state
        .users
        .create(NewUser {
            username: req.username.trim().to_string(),
            bio: req.bio,
            is_celebrity: req.is_celebrity,
        })
        .await?;

    info!(user_id = %user.id, "User created");
    Ok(HttpResponse::Created().json(user))
}

/// GET /users
pub async fn list_users(state: web::Data<AppState>) -> Result<HttpResponse> {
    let users = state.users.list().await?;
    Ok(HttpResponse::Ok().json(users))
}

/// GET /users/{id}
pub async fn get_user(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let user_id = parse_id(&path, "user")?;
    let user = state
        .users
        .get(user_id)
        .await?
        .ok_or_else(|| user_not_found(&path))?;
    Ok(HttpResponse::Ok().json(user))
}

/// PUT /users/{id}
pub async fn update_user(
    path: web::Path<String>,
    state: web::Data<AppState>,
    req: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse> {
    let user_id = parse_id(&path, "user")?;
    let mut changes = req.into_inner();
    if let Some(username) = changes.username.take() {
        validate_username(&username)?;
        changes.username = Some(username.trim().to_string());
    }

    let user = state
        .users
        .update(user_id, changes)
        .await?
        .ok_or_else(|| user_not_found(&path))?;
    Ok(HttpResponse::Ok().json(user))
}

/// DELETE /users/{id}
///
/// The user's feed and follow edges go with it; posts stay.
pub async fn delete_user(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let user_id = parse_id(&path, "user")?;
    if !state.users.delete(user_id).await? {
        return Err(user_not_found(&path));
    }

    info!(user_id = %user_id, "User deleted");
    Ok(HttpResponse::Ok().json(MessageResponse::new("User deleted successfully")))
}

/// POST /users/{id}/follow/{followee_id}
pub async fn follow_user(
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (raw_follower, raw_followee) = path.into_inner();
    let follower_id = parse_id(&raw_follower, "user")?;
    let followee_id = parse_id(&raw_followee, "followee")?;

    if follower_id == followee_id {
        return Err(AppError::BadRequest("a user cannot follow themselves".to_string()));
    }
    if state.users.get(follower_id).await?.is_none() {
        return Err(user_not_found(&raw_follower));
    }
    if state.users.get(followee_id).await?.is_none() {
        return Err(user_not_found(&raw_followee));
    }

    state.users.follow(follower_id, followee_id).await?;
    info!(follower_id = %follower_id, followee_id = %followee_id, "Follow added");
    Ok(HttpResponse::Ok().json(MessageResponse::new("Followed successfully")))
}

/// POST /users/{id}/unfollow/{followee_id}
pub async fn unfollow_user(
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (raw_follower, raw_followee) = path.into_inner();
    let follower_id = parse_id(&raw_follower, "user")?;
    let followee_id = parse_id(&raw_followee, "followee")?;

    if state.users.get(follower_id).await?.is_none() {
        return Err(user_not_found(&raw_follower));
    }

    state.users.unfollow(follower_id, followee_id).await?;
    info!(follower_id = %follower_id, followee_id = %followee_id, "Follow removed");
    Ok(HttpResponse::Ok().json(MessageResponse::new("Unfollowed successfully")))
}

/// PUT /users/{id}/celebrity-status
pub async fn set_celebrity_status(
    path: web::Path<String>,
    state: web::Data<AppState>,
    req: web::Json<CelebrityStatusRequest>,
) -> Result<HttpResponse> {
    let user_id = parse_id(&path, "user")?;
    if !state.users.set_celebrity(user_id, req.is_celebrity).await? {
        return Err(user_not_found(&path));
    }

    info!(user_id = %user_id, is_celebrity = req.is_celebrity, "Celebrity status changed");
    Ok(HttpResponse::Ok().json(MessageResponse::new("Celebrity status updated")))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/users")
            .route("", web::post().to(create_user))
            .route("", web::get().to(list_users))
            .route("/{id}", web::get().to(get_user))
            .route("/{id}", web::put().to(update_user))
            .route("/{id}", web::delete().to(delete_user))
            .route("/{id}/follow/{followee_id}", web::post().to(follow_user))
            .route("/{id}/unfollow/{followee_id}", web::post().to(unfollow_user))
            .route("/{id}/celebrity-status", web::put().to(set_celebrity_status))
            .route("/{id}/posts", web::post().to(super::posts::create_post))
            .route("/{id}/posts", web::get().to(super::posts::list_user_posts)),
    );
}
