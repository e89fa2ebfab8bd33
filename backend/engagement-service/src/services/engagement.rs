use chrono::Utc;
use resilience::{with_retry_if, RetryConfig, RetryError};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::models::{MAX_COMMENT_CHARS, POSTS_COLLECTION};
use crate::domain::normalize::normalize_post;
use crate::domain::{Application, ApplicationResult, Comment, Identity, LikeState, Post, PostId, Role};
use crate::error::{NotEligibleReason, ServiceError, ServiceResult};
use crate::store::{AggregateStore, Document, MergeUpdate, StoreError};

/// Engagement engine: like toggle, comment append, job application
///
/// Write strategy, chosen per call from the store's capabilities:
/// 1. `array_ops`: decide from a fresh read, then apply an atomic
///    `ArrayUnion` / `ArrayRemove`. Concurrent writers on other elements are
///    never lost. An application union is additionally guarded by the read
///    version, so a racing duplicate re-reads and sees `AlreadyApplied`.
/// 2. `conditional_writes`: read, compute the whole array, write it back
///    guarded by the read version; on conflict re-read and retry, bounded by
///    the retry policy. Exhaustion surfaces as `Contention`.
/// 3. neither: read, compute, replace. Two concurrent writers on the same
///    post can lose one update (last writer wins). Sequential calls from one
///    client are still exact.
///
/// Store failures are never retried here; each call makes at most one
/// attempt per store operation unless it lost a version race.
#[derive(Clone)]
pub struct EngagementEngine {
    store: Arc<dyn AggregateStore>,
    retry: RetryConfig,
}

impl EngagementEngine {
    pub fn new(store: Arc<dyn AggregateStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Toggle the caller's like on a post and return the new state.
    #[instrument(skip(self, caller, post_id), fields(post_id = %post_id))]
    pub async fn toggle_like(
        &self,
        caller: Option<&Identity>,
        post_id: &PostId,
    ) -> ServiceResult<LikeState> {
        let viewer = require_identity(caller)?;
        let viewer_value = Value::String(viewer.id.to_string());

        let state = self
            .write_with_strategy(|_| {
                let viewer_value = viewer_value.clone();
                async move {
                    let (doc, post) = self.read_post(post_id).await?;
                    let liked = !post.is_liked_by(&viewer.id);

                    let update = if self.store.capabilities().array_ops {
                        if liked {
                            MergeUpdate::new().array_union("likes", vec![viewer_value])
                        } else {
                            MergeUpdate::new().array_remove("likes", vec![viewer_value])
                        }
                    } else {
                        let mut likes = raw_array(&doc, "likes");
                        if liked {
                            likes.push(viewer_value);
                        } else {
                            likes.retain(|v| v != &viewer_value);
                        }
                        self.guarded(MergeUpdate::new().set("likes", Value::Array(likes)), &doc)
                    };

                    self.store
                        .merge_update(POSTS_COLLECTION, post_id.as_str(), &update)
                        .await?;
                    Ok::<_, ServiceError>(LikeState { liked })
                }
            })
            .await?;

        debug!(viewer = %viewer.id, liked = state.liked, "Like toggled");
        Ok(state)
    }

    /// Append a comment authored by the caller.
    #[instrument(skip(self, caller, post_id, text), fields(post_id = %post_id))]
    pub async fn add_comment(
        &self,
        caller: Option<&Identity>,
        post_id: &PostId,
        text: &str,
    ) -> ServiceResult<Comment> {
        let author = require_identity(caller)?;
        let text = validate_comment_text(text)?;

        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            user_id: author.id.clone(),
            username: author.display_name.clone(),
            text,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&comment)
            .map_err(|e| ServiceError::Internal(format!("Failed to encode comment: {}", e)))?;

        self.write_with_strategy(|_| {
            let value = value.clone();
            async move {
                let update = if self.store.capabilities().array_ops {
                    // Union with a fresh id is an append; a missing post fails in the store.
                    MergeUpdate::new().array_union("comments", vec![value])
                } else {
                    let (doc, _) = self.read_post(post_id).await?;
                    let mut comments = raw_array(&doc, "comments");
                    comments.push(value);
                    self.guarded(
                        MergeUpdate::new().set("comments", Value::Array(comments)),
                        &doc,
                    )
                };

                self.store
                    .merge_update(POSTS_COLLECTION, post_id.as_str(), &update)
                    .await?;
                Ok::<_, ServiceError>(())
            }
        })
        .await?;

        debug!(comment_id = %comment.id, author = %author.id, "Comment appended");
        Ok(comment)
    }

    /// Apply to a post as the caller. Re-applying is a successful no-op.
    #[instrument(skip(self, caller, post_id), fields(post_id = %post_id))]
    pub async fn apply_to_post(
        &self,
        caller: Option<&Identity>,
        post_id: &PostId,
    ) -> ServiceResult<ApplicationResult> {
        let applicant = require_identity(caller)?;
        if !applicant.is_seeker() {
            return Err(ServiceError::NotEligible(NotEligibleReason::NotSeeker));
        }

        let result = self
            .write_with_strategy(|_| async move {
                let (doc, post) = self.read_post(post_id).await?;
                check_accepts_applications(&post)?;

                if let Some(existing) = post.application_of(&applicant.id) {
                    return Ok(ApplicationResult::AlreadyApplied(existing.clone()));
                }

                let application = Application {
                    user_id: applicant.id.clone(),
                    username: applicant.display_name.clone(),
                    applied_at: Utc::now(),
                };
                let value = serde_json::to_value(&application).map_err(|e| {
                    ServiceError::Internal(format!("Failed to encode application: {}", e))
                })?;

                // The uniqueness check came from `doc`, so the write is guarded by its version.
                let update = if self.store.capabilities().array_ops {
                    MergeUpdate::new().array_union("applications", vec![value])
                } else {
                    let mut applications = raw_array(&doc, "applications");
                    applications.push(value);
                    MergeUpdate::new().set("applications", Value::Array(applications))
                };
                let update = self.guarded(update, &doc);

                self.store
                    .merge_update(POSTS_COLLECTION, post_id.as_str(), &update)
                    .await?;
                Ok::<_, ServiceError>(ApplicationResult::Applied(application))
            })
            .await?;

        if result.is_new() {
            info!(applicant = %applicant.id, "Application recorded");
        } else {
            debug!(applicant = %applicant.id, "Already applied, nothing written");
        }
        Ok(result)
    }

    async fn read_post(&self, post_id: &PostId) -> Result<(Document, Post), StoreError> {
        let doc = self
            .store
            .get(POSTS_COLLECTION, post_id.as_str())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: POSTS_COLLECTION.to_string(),
                id: post_id.to_string(),
            })?;
        let post = normalize_post(&doc)?;
        Ok((doc, post))
    }

    /// Guard a write decided from `doc` with the version it was read at, when
    /// the store supports it.
    fn guarded(&self, update: MergeUpdate, doc: &Document) -> MergeUpdate {
        if self.store.capabilities().conditional_writes {
            update.if_version(doc.version)
        } else {
            debug!(
                document = %doc.id,
                "Store has no conditional writes; write is last-writer-wins"
            );
            update
        }
    }

    async fn write_with_strategy<T, F, Fut>(&self, attempt: F) -> ServiceResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let policy = if self.store.capabilities().conditional_writes {
            self.retry.clone()
        } else {
            RetryConfig::no_retry()
        };

        with_retry_if(&policy, attempt, |e| {
            matches!(e, ServiceError::Contention { .. })
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, .. } => ServiceError::Contention { attempts },
            RetryError::Permanent(e) => e,
        })
    }
}

fn require_identity(caller: Option<&Identity>) -> ServiceResult<&Identity> {
    caller.ok_or(ServiceError::Unauthenticated)
}

fn check_accepts_applications(post: &Post) -> ServiceResult<()> {
    if post.user_type != Role::Employer {
        return Err(ServiceError::NotEligible(
            NotEligibleReason::OwnerNotEmployer,
        ));
    }
    if !post.applicable {
        return Err(ServiceError::NotEligible(NotEligibleReason::NotApplicable));
    }
    Ok(())
}

fn validate_comment_text(text: &str) -> ServiceResult<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ValidationFailed(
            "comment text must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_COMMENT_CHARS {
        return Err(ServiceError::ValidationFailed(format!(
            "comment text exceeds {} characters",
            MAX_COMMENT_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

// Raw array from the stored document, so a whole-array rewrite never drops
// entries the normalizer would skip.
fn raw_array(doc: &Document, field: &str) -> Vec<Value> {
    doc.data
        .get(field)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockAggregateStore, StoreCapabilities};
    use serde_json::json;
    use std::time::Duration;

    fn seeker() -> Identity {
        Identity::new("alice", "Alice", Role::Seeker)
    }

    fn employer_post_doc(applicable: bool) -> Document {
        Document {
            id: "job-1".to_string(),
            version: 4,
            seq: 1,
            data: json!({
                "userId": "acme", "username": "Acme", "userType": "employer",
                "caption": "Hiring", "createdAt": "2024-01-01T00:00:00Z",
                "likes": [], "comments": [], "applications": [],
                "applicable": applicable
            })
            .as_object()
            .cloned()
            .unwrap(),
        }
    }

    fn engine(mock: MockAggregateStore) -> EngagementEngine {
        EngagementEngine::new(
            Arc::new(mock),
            RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                jitter: false,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_unauthenticated_mutations_never_touch_store() {
        // No expectations: any store call would panic
        let engine = engine(MockAggregateStore::new());
        let post_id = PostId::from("job-1");

        assert!(matches!(
            engine.toggle_like(None, &post_id).await,
            Err(ServiceError::Unauthenticated)
        ));
        assert!(matches!(
            engine.add_comment(None, &post_id, "hi").await,
            Err(ServiceError::Unauthenticated)
        ));
        assert!(matches!(
            engine.apply_to_post(None, &post_id).await,
            Err(ServiceError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_blank_comment_rejected_before_store_call() {
        let engine = engine(MockAggregateStore::new());
        let result = engine
            .add_comment(Some(&seeker()), &PostId::from("job-1"), "   \n ")
            .await;
        assert!(matches!(result, Err(ServiceError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn test_employer_apply_rejected_before_store_call() {
        let engine = engine(MockAggregateStore::new());
        let acme = Identity::new("acme", "Acme", Role::Employer);
        let result = engine.apply_to_post(Some(&acme), &PostId::from("job-1")).await;
        assert!(matches!(
            result,
            Err(ServiceError::NotEligible(NotEligibleReason::NotSeeker))
        ));
    }

    #[tokio::test]
    async fn test_store_outage_is_propagated_after_one_attempt() {
        let mut mock = MockAggregateStore::new();
        mock.expect_capabilities()
            .return_const(StoreCapabilities::FULL);
        mock.expect_get()
            .times(1)
            .returning(|_, _| Err(StoreError::Unavailable("connection reset".into())));

        let result = engine(mock)
            .toggle_like(Some(&seeker()), &PostId::from("job-1"))
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::StoreUnavailable(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_apply_on_closed_post_does_not_write() {
        let mut mock = MockAggregateStore::new();
        mock.expect_capabilities()
            .return_const(StoreCapabilities::FULL);
        mock.expect_get()
            .times(1)
            .returning(|_, _| Ok(Some(employer_post_doc(false))));
        mock.expect_merge_update().never();

        let result = engine(mock)
            .apply_to_post(Some(&seeker()), &PostId::from("job-1"))
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::NotEligible(NotEligibleReason::NotApplicable))
        ));
    }

    #[tokio::test]
    async fn test_like_uses_atomic_union_when_available() {
        let mut mock = MockAggregateStore::new();
        mock.expect_capabilities()
            .return_const(StoreCapabilities::FULL);
        mock.expect_get()
            .times(1)
            .returning(|_, _| Ok(Some(employer_post_doc(true))));
        mock.expect_merge_update()
            .times(1)
            .withf(|collection, id, update| {
                collection.to_string() == POSTS_COLLECTION
                    && id.to_string() == "job-1"
                    && update.expected_version.is_none()
                    && update.fields
                        == vec![(
                            "likes".to_string(),
                            crate::store::FieldUpdate::ArrayUnion(vec![json!("alice")]),
                        )]
            })
            .returning(|_, _, _| Ok(5));

        let state = engine(mock)
            .toggle_like(Some(&seeker()), &PostId::from("job-1"))
            .await
            .unwrap();
        assert!(state.liked);
    }

    #[tokio::test]
    async fn test_apply_union_is_guarded_by_read_version() {
        let mut mock = MockAggregateStore::new();
        mock.expect_capabilities()
            .return_const(StoreCapabilities::FULL);
        mock.expect_get()
            .times(1)
            .returning(|_, _| Ok(Some(employer_post_doc(true))));
        mock.expect_merge_update()
            .times(1)
            .withf(|_, _, update| {
                update.expected_version == Some(4)
                    && matches!(
                        update.fields.as_slice(),
                        [(field, crate::store::FieldUpdate::ArrayUnion(values))]
                            if field == "applications" && values.len() == 1
                    )
            })
            .returning(|_, _, _| Ok(5));

        let result = engine(mock)
            .apply_to_post(Some(&seeker()), &PostId::from("job-1"))
            .await
            .unwrap();
        assert!(result.is_new());
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_into_contention() {
        let mut mock = MockAggregateStore::new();
        mock.expect_capabilities().return_const(StoreCapabilities {
            array_ops: false,
            conditional_writes: true,
        });
        mock.expect_get()
            .times(3)
            .returning(|_, _| Ok(Some(employer_post_doc(true))));
        mock.expect_merge_update()
            .times(3)
            .withf(|_, _, update| update.expected_version == Some(4))
            .returning(|_, _, _| Err(StoreError::Conflict { expected: 4, actual: 5 }));

        let result = engine(mock)
            .toggle_like(Some(&seeker()), &PostId::from("job-1"))
            .await;

        assert!(matches!(result, Err(ServiceError::Contention { attempts: 3 })));
    }

    #[tokio::test]
    async fn test_missing_post_is_not_found() {
        let mut mock = MockAggregateStore::new();
        mock.expect_capabilities()
            .return_const(StoreCapabilities::FULL);
        mock.expect_get().returning(|_, _| Ok(None));

        let result = engine(mock)
            .apply_to_post(Some(&seeker()), &PostId::from("nope"))
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn test_comment_text_is_trimmed_and_bounded() {
        assert_eq!(validate_comment_text("  hello ").unwrap(), "hello");
        let long = "x".repeat(MAX_COMMENT_CHARS + 1);
        assert!(matches!(
            validate_comment_text(&long),
            Err(ServiceError::ValidationFailed(_))
        ));
    }
}
