use serde::{Deserialize, Serialize};
use tracing::debug;

use super::posts::PostService;
use crate::domain::{ApplicationView, UserId};
use crate::error::ServiceResult;

/// Order of the flattened application list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationOrdering {
    /// Posts newest first as the store returns them, applications in append
    /// order within each post
    #[default]
    StoreOrder,
    /// Oldest application first across all posts; ties keep store order
    Chronological,
}

/// Employer-side view of incoming applications
#[derive(Clone)]
pub struct ApplicationAggregator {
    posts: PostService,
}

impl ApplicationAggregator {
    pub fn new(posts: PostService) -> Self {
        Self { posts }
    }

    pub async fn applications_for(
        &self,
        employer_id: &UserId,
        ordering: ApplicationOrdering,
    ) -> ServiceResult<Vec<ApplicationView>> {
        let posts = self.posts.posts_by_owner(employer_id).await?;

        let mut views: Vec<ApplicationView> = posts
            .iter()
            .flat_map(|post| {
                post.applications.iter().map(move |app| ApplicationView {
                    applicant_id: app.user_id.clone(),
                    applicant_name: app.username.clone(),
                    applied_at: app.applied_at,
                    post_id: post.id.clone(),
                    post_caption: post.caption.clone(),
                })
            })
            .collect();

        if ordering == ApplicationOrdering::Chronological {
            // sort_by_key is stable
            views.sort_by_key(|view| view.applied_at);
        }

        debug!(
            employer = %employer_id,
            posts = posts.len(),
            applications = views.len(),
            ?ordering,
            "Aggregated applications"
        );
        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::POSTS_COLLECTION;
    use crate::store::{AggregateStore, InMemoryStore};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn job(caption: &str, created_at: &str, applications: Value) -> serde_json::Map<String, Value> {
        json!({
            "userId": "acme", "username": "Acme", "userType": "employer",
            "caption": caption, "createdAt": created_at, "applicable": true,
            "applications": applications
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn app(user: &str, at: &str) -> Value {
        json!({"userId": user, "username": user.to_uppercase(), "appliedAt": at})
    }

    async fn seeded() -> ApplicationAggregator {
        let store = Arc::new(InMemoryStore::new());
        store
            .create(
                POSTS_COLLECTION,
                job("first job", "2024-01-01T00:00:00Z", json!([app("bob", "2024-01-05T00:00:00Z")])),
            )
            .await
            .unwrap();
        store
            .create(
                POSTS_COLLECTION,
                job(
                    "second job",
                    "2024-02-01T00:00:00Z",
                    json!([
                        app("carol", "2024-02-03T00:00:00Z"),
                        app("dave", "2024-01-02T00:00:00Z")
                    ]),
                ),
            )
            .await
            .unwrap();
        ApplicationAggregator::new(PostService::new(store))
    }

    #[tokio::test]
    async fn test_store_order_flattens_every_application() {
        let aggregator = seeded().await;

        let views = aggregator
            .applications_for(&UserId::from("acme"), ApplicationOrdering::StoreOrder)
            .await
            .unwrap();

        let applicants: Vec<&str> = views.iter().map(|v| v.applicant_id.as_str()).collect();
        assert_eq!(applicants, vec!["carol", "dave", "bob"]);
        assert_eq!(views[0].post_caption, "second job");
        assert_eq!(views[2].post_caption, "first job");
        assert_eq!(views[2].applicant_name, "BOB");
    }

    #[tokio::test]
    async fn test_chronological_ordering() {
        let aggregator = seeded().await;

        let views = aggregator
            .applications_for(&UserId::from("acme"), ApplicationOrdering::Chronological)
            .await
            .unwrap();

        let applicants: Vec<&str> = views.iter().map(|v| v.applicant_id.as_str()).collect();
        assert_eq!(applicants, vec!["dave", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_employer_without_posts_gets_empty_list() {
        let aggregator = seeded().await;

        let views = aggregator
            .applications_for(&UserId::from("globex"), ApplicationOrdering::default())
            .await
            .unwrap();
        assert!(views.is_empty());
    }

    #[test]
    fn test_ordering_parses_from_query_value() {
        let ordering: ApplicationOrdering = serde_json::from_str("\"chronological\"").unwrap();
        assert_eq!(ordering, ApplicationOrdering::Chronological);
        let ordering: ApplicationOrdering = serde_json::from_str("\"store_order\"").unwrap();
        assert_eq!(ordering, ApplicationOrdering::StoreOrder);
    }
}
