/// HTTP handlers for engagement-service
///
/// Identity is resolved by the upstream gateway and forwarded in headers;
/// handlers turn it into an explicit `Identity` argument for every call.
use actix_web::{web, HttpRequest};
use resilience::RetryConfig;
use std::sync::Arc;

use crate::domain::{Identity, Role};
use crate::error::{ServiceError, ServiceResult};
use crate::services::{
    ApplicationAggregator, EngagementEngine, PostService, ProfileService,
};
use crate::store::AggregateStore;

pub mod health;
pub mod posts;
pub mod users;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AggregateStore>,
    pub engine: EngagementEngine,
    pub posts: PostService,
    pub profiles: ProfileService,
    pub applications: ApplicationAggregator,
}

impl AppState {
    pub fn new(store: Arc<dyn AggregateStore>, retry: RetryConfig) -> Self {
        let posts = PostService::new(store.clone());
        Self {
            engine: EngagementEngine::new(store.clone(), retry),
            profiles: ProfileService::new(store.clone()),
            applications: ApplicationAggregator::new(posts.clone()),
            posts,
            store,
        }
    }
}

/// Register all routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health))
        .route("/ready", web::get().to(health::ready))
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/posts")
                        .route("", web::get().to(posts::list_feed))
                        .route("", web::post().to(posts::create_post))
                        .route("/{id}", web::get().to(posts::get_post))
                        .route("/{id}/like", web::post().to(posts::toggle_like))
                        .route("/{id}/comments", web::post().to(posts::add_comment))
                        .route("/{id}/applications", web::post().to(posts::apply)),
                )
                .service(
                    web::scope("/users")
                        .route("", web::get().to(users::search_users))
                        .route("", web::post().to(users::create_profile))
                        .route("/{id}", web::get().to(users::get_profile))
                        .route("/{id}", web::patch().to(users::update_profile))
                        .route("/{id}/posts", web::get().to(posts::posts_by_owner)),
                )
                .route(
                    "/employers/{id}/applications",
                    web::get().to(users::employer_applications),
                ),
        );
}

/// Caller identity from gateway headers. No `x-user-id` means anonymous;
/// a present but malformed identity is rejected.
pub fn caller(req: &HttpRequest) -> ServiceResult<Option<Identity>> {
    let Some(id) = header(req, USER_ID_HEADER)? else {
        return Ok(None);
    };
    if id.is_empty() {
        return Err(ServiceError::Unauthenticated);
    }

    let role = header(req, USER_ROLE_HEADER)?
        .ok_or(ServiceError::Unauthenticated)?
        .parse::<Role>()
        .map_err(|_| ServiceError::Unauthenticated)?;
    let display_name = header(req, USER_NAME_HEADER)?
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| id.clone());

    Ok(Some(Identity::new(id, display_name, role)))
}

fn header(req: &HttpRequest, name: &str) -> ServiceResult<Option<String>> {
    req.headers()
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(|s| s.trim().to_string())
                .map_err(|_| ServiceError::Unauthenticated)
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_missing_headers_mean_anonymous() {
        let req = TestRequest::default().to_http_request();
        assert!(caller(&req).unwrap().is_none());
    }

    #[test]
    fn test_identity_from_headers() {
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, "alice"))
            .insert_header((USER_NAME_HEADER, "Alice"))
            .insert_header((USER_ROLE_HEADER, "seeker"))
            .to_http_request();

        let identity = caller(&req).unwrap().unwrap();
        assert_eq!(identity.id.as_str(), "alice");
        assert_eq!(identity.display_name, "Alice");
        assert_eq!(identity.role, Role::Seeker);
    }

    #[test]
    fn test_name_defaults_to_id() {
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, "acme"))
            .insert_header((USER_ROLE_HEADER, "employer"))
            .to_http_request();

        assert_eq!(caller(&req).unwrap().unwrap().display_name, "acme");
    }

    #[test]
    fn test_bad_role_is_rejected() {
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, "alice"))
            .insert_header((USER_ROLE_HEADER, "admin"))
            .to_http_request();
        assert!(matches!(caller(&req), Err(ServiceError::Unauthenticated)));

        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, "alice"))
            .to_http_request();
        assert!(matches!(caller(&req), Err(ServiceError::Unauthenticated)));
    }
}
