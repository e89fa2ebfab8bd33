//! Feed projection: canonical posts to viewer-specific view records.
//!
//! Pure functions. Input order is preserved; ordering is the store's job.

use crate::domain::views::INLINE_COMMENT_COUNT;
use crate::domain::{Identity, Post, Role, ViewPost};

pub fn project(posts: &[Post], viewer: Option<&Identity>) -> Vec<ViewPost> {
    posts.iter().map(|post| project_post(post, viewer)).collect()
}

pub fn project_post(post: &Post, viewer: Option<&Identity>) -> ViewPost {
    let liked_by_viewer = viewer.map_or(false, |v| post.is_liked_by(&v.id));
    let applied_by_viewer = viewer.map_or(false, |v| post.has_applied(&v.id));
    let can_apply = viewer.map_or(false, |v| {
        v.role == Role::Seeker && post.accepts_applications() && !applied_by_viewer
    });

    let inline_from = post.comments.len().saturating_sub(INLINE_COMMENT_COUNT);

    ViewPost {
        id: post.id.clone(),
        user_id: post.user_id.clone(),
        username: post.username.clone(),
        user_type: post.user_type,
        image_url: post.image_url.clone(),
        caption: post.caption.clone(),
        created_at: post.created_at,
        like_count: post.likes.len(),
        comment_count: post.comments.len(),
        application_count: post.applications.len(),
        liked_by_viewer,
        applied_by_viewer,
        can_apply,
        is_own_post: viewer.map_or(false, |v| post.is_owned_by(&v.id)),
        applicable: post.applicable,
        recent_comments: post.comments[inline_from..].to_vec(),
        has_more_comments: post.comments.len() > INLINE_COMMENT_COUNT,
    }
}
