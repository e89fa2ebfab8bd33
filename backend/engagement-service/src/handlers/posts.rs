/// Post handlers - feed, post creation and engagement mutations
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use super::{caller, AppState};
use crate::domain::{ApplicationResult, NewPost, PostId, UserId};
use crate::error::ServiceResult;
use crate::services::feed::{project, project_post};
use crate::services::posts::DEFAULT_FEED_LIMIT;

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub text: String,
}

/// List the feed, newest first, projected for the caller
pub async fn list_feed(
    req: HttpRequest,
    state: web::Data<AppState>,
    params: web::Query<FeedParams>,
) -> ServiceResult<HttpResponse> {
    let viewer = caller(&req)?;
    let posts = state
        .posts
        .fetch_feed(
            params.limit.unwrap_or(DEFAULT_FEED_LIMIT),
            params.offset.unwrap_or(0),
        )
        .await?;

    Ok(HttpResponse::Ok().json(project(&posts, viewer.as_ref())))
}

pub async fn create_post(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<NewPost>,
) -> ServiceResult<HttpResponse> {
    let owner = caller(&req)?;
    let id = state
        .posts
        .create_post(owner.as_ref(), payload.into_inner())
        .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

pub async fn get_post(
    req: HttpRequest,
    state: web::Data<AppState>,
    post_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let viewer = caller(&req)?;
    let post = state.posts.get_post(&PostId::new(post_id.into_inner())).await?;

    Ok(HttpResponse::Ok().json(project_post(&post, viewer.as_ref())))
}

pub async fn posts_by_owner(
    req: HttpRequest,
    state: web::Data<AppState>,
    owner_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let viewer = caller(&req)?;
    let posts = state
        .posts
        .posts_by_owner(&UserId::new(owner_id.into_inner()))
        .await?;

    Ok(HttpResponse::Ok().json(project(&posts, viewer.as_ref())))
}

pub async fn toggle_like(
    req: HttpRequest,
    state: web::Data<AppState>,
    post_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let viewer = caller(&req)?;
    let like = state
        .engine
        .toggle_like(viewer.as_ref(), &PostId::new(post_id.into_inner()))
        .await?;

    Ok(HttpResponse::Ok().json(like))
}

pub async fn add_comment(
    req: HttpRequest,
    state: web::Data<AppState>,
    post_id: web::Path<String>,
    payload: web::Json<CommentRequest>,
) -> ServiceResult<HttpResponse> {
    let author = caller(&req)?;
    let comment = state
        .engine
        .add_comment(
            author.as_ref(),
            &PostId::new(post_id.into_inner()),
            &payload.text,
        )
        .await?;

    Ok(HttpResponse::Created().json(comment))
}

/// Apply to a post. 201 for a new application, 200 if one already existed.
pub async fn apply(
    req: HttpRequest,
    state: web::Data<AppState>,
    post_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let applicant = caller(&req)?;
    let result = state
        .engine
        .apply_to_post(applicant.as_ref(), &PostId::new(post_id.into_inner()))
        .await?;

    Ok(match result {
        ApplicationResult::Applied(_) => HttpResponse::Created().json(result),
        ApplicationResult::AlreadyApplied(_) => HttpResponse::Ok().json(result),
    })
}
