use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::models::{MAX_CAPTION_CHARS, POSTS_COLLECTION};
use crate::domain::normalize::normalize_post;
use crate::domain::{Identity, NewPost, Post, PostId, Role, UserId};
use crate::error::{NotEligibleReason, ServiceError, ServiceResult};
use crate::store::{AggregateStore, Direction, Document, DocumentData, Filter, Query, SortKind};

pub const DEFAULT_FEED_LIMIT: usize = 20;
pub const MAX_FEED_LIMIT: usize = 100;

/// Post lifecycle outside the engagement engine: creation and the read paths
/// backing the feed, profile grids and the notification aggregator.
#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn AggregateStore>,
}

impl PostService {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Create a post owned by the caller and return its store key.
    ///
    /// Only employers may open a post for applications.
    #[instrument(skip(self, caller, new_post))]
    pub async fn create_post(
        &self,
        caller: Option<&Identity>,
        new_post: NewPost,
    ) -> ServiceResult<PostId> {
        let owner = caller.ok_or(ServiceError::Unauthenticated)?;

        let caption = new_post.caption.trim().to_string();
        let image_url = new_post
            .image_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        if caption.chars().count() > MAX_CAPTION_CHARS {
            return Err(ServiceError::ValidationFailed(format!(
                "caption exceeds {} characters",
                MAX_CAPTION_CHARS
            )));
        }
        if caption.is_empty() && image_url.is_none() {
            return Err(ServiceError::ValidationFailed(
                "a post needs a caption or an image".to_string(),
            ));
        }
        if new_post.applicable && owner.role != Role::Employer {
            return Err(ServiceError::NotEligible(
                NotEligibleReason::OwnerNotEmployer,
            ));
        }

        let mut data = DocumentData::new();
        data.insert("userId".into(), Value::String(owner.id.to_string()));
        data.insert("username".into(), Value::String(owner.display_name.clone()));
        data.insert("userType".into(), Value::String(owner.role.to_string()));
        if let Some(url) = image_url {
            data.insert("imageUrl".into(), Value::String(url));
        }
        data.insert("caption".into(), Value::String(caption));
        data.insert("createdAt".into(), Value::String(Utc::now().to_rfc3339()));
        data.insert("likes".into(), Value::Array(Vec::new()));
        data.insert("comments".into(), Value::Array(Vec::new()));
        data.insert("applicable".into(), Value::Bool(new_post.applicable));
        data.insert("applications".into(), Value::Array(Vec::new()));

        let id = self.store.create(POSTS_COLLECTION, data).await?;

        info!(post_id = %id, owner = %owner.id, applicable = new_post.applicable, "Post created");
        Ok(PostId::new(id))
    }

    /// Newest posts first; ties keep store insertion order.
    pub async fn fetch_feed(&self, limit: usize, offset: usize) -> ServiceResult<Vec<Post>> {
        if limit == 0 || limit > MAX_FEED_LIMIT {
            return Err(ServiceError::ValidationFailed(format!(
                "limit must be between 1 and {}",
                MAX_FEED_LIMIT
            )));
        }

        let query = newest_first().limit(limit).offset(offset);
        let docs = self.store.query(POSTS_COLLECTION, &query).await?;
        Ok(normalize_all(&docs))
    }

    pub async fn posts_by_owner(&self, owner_id: &UserId) -> ServiceResult<Vec<Post>> {
        let query = newest_first().filter(Filter::equals("userId", owner_id.as_str()));
        let docs = self.store.query(POSTS_COLLECTION, &query).await?;
        Ok(normalize_all(&docs))
    }

    pub async fn get_post(&self, post_id: &PostId) -> ServiceResult<Post> {
        let doc = self
            .store
            .get(POSTS_COLLECTION, post_id.as_str())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("{}/{}", POSTS_COLLECTION, post_id)))?;

        Ok(normalize_post(&doc)?)
    }
}

fn newest_first() -> Query {
    Query::new().order_by("createdAt", SortKind::Timestamp, Direction::Desc)
}

// One unreadable post must not take the whole listing down.
fn normalize_all(docs: &[Document]) -> Vec<Post> {
    docs.iter()
        .filter_map(|doc| match normalize_post(doc) {
            Ok(post) => Some(post),
            Err(e) => {
                warn!(post_id = %doc.id, error = %e, "Skipping unreadable post");
                None
            }
        })
        .collect()
}
