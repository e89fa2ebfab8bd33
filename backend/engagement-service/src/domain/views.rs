use chrono::{DateTime, Utc};
use serde::Serialize;

use super::models::{Comment, PostId, Role, UserId};

/// Number of most recent comments shown inline under a post
pub const INLINE_COMMENT_COUNT: usize = 2;

/// Viewer-specific projection of a post
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPost {
    pub id: PostId,
    pub user_id: UserId,
    pub username: String,
    pub user_type: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub caption: String,
    pub created_at: DateTime<Utc>,
    pub like_count: usize,
    pub comment_count: usize,
    pub application_count: usize,
    /// Whether the current viewer has liked this post
    pub liked_by_viewer: bool,
    pub applied_by_viewer: bool,
    pub can_apply: bool,
    pub is_own_post: bool,
    pub applicable: bool,
    /// Last comments in append order
    pub recent_comments: Vec<Comment>,
    /// More comments exist than are shown inline
    pub has_more_comments: bool,
}

/// One application, annotated with the post it was made on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationView {
    pub applicant_id: UserId,
    pub applicant_name: String,
    pub applied_at: DateTime<Utc>,
    pub post_id: PostId,
    pub post_caption: String,
}
