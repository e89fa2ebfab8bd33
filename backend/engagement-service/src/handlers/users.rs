/// Profile handlers and the employer application inbox
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use super::{caller, AppState};
use crate::domain::{ProfileUpdate, RegisterProfile, UserId};
use crate::error::{NotEligibleReason, ServiceError, ServiceResult};
use crate::services::ApplicationOrdering;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Username prefix
    pub prefix: Option<String>,
    /// Exact username; takes precedence over `prefix`
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationsParams {
    #[serde(default)]
    pub ordering: ApplicationOrdering,
}

/// Register the caller's own profile
pub async fn create_profile(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<RegisterProfile>,
) -> ServiceResult<HttpResponse> {
    let identity = caller(&req)?.ok_or(ServiceError::Unauthenticated)?;
    let form = payload.into_inner();
    if form.user_type != identity.role {
        return Err(ServiceError::ValidationFailed(format!(
            "registered role {} does not match session role {}",
            form.user_type, identity.role
        )));
    }

    let profile = state.profiles.create_profile(&identity.id, form).await?;
    Ok(HttpResponse::Created().json(profile))
}

/// Edit the caller's own profile
pub async fn update_profile(
    req: HttpRequest,
    state: web::Data<AppState>,
    user_id: web::Path<String>,
    payload: web::Json<ProfileUpdate>,
) -> ServiceResult<HttpResponse> {
    let identity = caller(&req)?.ok_or(ServiceError::Unauthenticated)?;
    if identity.id.as_str() != user_id.as_str() {
        return Err(ServiceError::NotEligible(NotEligibleReason::NotProfileOwner));
    }

    let profile = state
        .profiles
        .update_profile(Some(&identity), payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(profile))
}

pub async fn get_profile(
    state: web::Data<AppState>,
    user_id: web::Path<String>,
) -> ServiceResult<HttpResponse> {
    let user_id = UserId::new(user_id.into_inner());
    let profile = state
        .profiles
        .get_profile(&user_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("users/{}", user_id)))?;

    Ok(HttpResponse::Ok().json(profile))
}

pub async fn search_users(
    state: web::Data<AppState>,
    params: web::Query<SearchParams>,
) -> ServiceResult<HttpResponse> {
    let profiles = match (&params.username, &params.prefix) {
        (Some(username), _) => state.profiles.find_by_exact_username(username).await?,
        (None, Some(prefix)) => state.profiles.search_by_username_prefix(prefix).await?,
        (None, None) => Vec::new(),
    };

    Ok(HttpResponse::Ok().json(profiles))
}

pub async fn employer_applications(
    state: web::Data<AppState>,
    employer_id: web::Path<String>,
    params: web::Query<ApplicationsParams>,
) -> ServiceResult<HttpResponse> {
    let views = state
        .applications
        .applications_for(&UserId::new(employer_id.into_inner()), params.ordering)
        .await?;

    Ok(HttpResponse::Ok().json(views))
}
