//! Single normalization step from raw store documents to canonical aggregates.
//!
//! Every read path goes through these functions; no call site defaults
//! optional fields on its own.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

use super::models::{Application, Comment, Post, PostId, Role, UserId};
use super::profile::{Education, Experience, SocialLinks, UserProfile};
use crate::store::{Document, DocumentData, StoreError};

/// Turn a raw post document into the canonical `Post`.
///
/// Owner fields are required; everything else is defaulted:
/// - missing arrays become empty, missing `applicable` becomes false
/// - missing or unparseable `createdAt` becomes the Unix epoch
/// - duplicate likes collapse to the first occurrence
/// - duplicate applications per applicant collapse to the first entry
/// - applications on posts that do not accept them are dropped
/// - malformed comment / application entries are skipped
pub fn normalize_post(doc: &Document) -> Result<Post, StoreError> {
    let data = &doc.data;

    let user_id = required_str(data, "userId", &doc.id)?;
    let username = required_str(data, "username", &doc.id)?;
    let user_type = data
        .get("userType")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Role>().ok())
        .ok_or_else(|| corrupt(&doc.id, "userType"))?;

    let mut seen = HashSet::new();
    let likes = array(data, "likes")
        .iter()
        .filter_map(Value::as_str)
        .filter(|id| seen.insert(id.to_string()))
        .map(UserId::from)
        .collect();

    let comments: Vec<Comment> = entries(data, "comments", &doc.id);

    let mut post = Post {
        id: PostId::new(doc.id.clone()),
        user_id: UserId::new(user_id),
        username,
        user_type,
        image_url: data
            .get("imageUrl")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        caption: data
            .get("caption")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        created_at: timestamp(data, "createdAt"),
        likes,
        comments,
        applicable: data
            .get("applicable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        applications: Vec::new(),
    };

    let mut applicants = HashSet::new();
    let applications: Vec<Application> = entries::<Application>(data, "applications", &doc.id)
        .into_iter()
        .filter(|app| applicants.insert(app.user_id.clone()))
        .collect();

    if !applications.is_empty() && !post.accepts_applications() {
        warn!(
            post_id = %doc.id,
            count = applications.len(),
            "Dropping applications on a post that does not accept them"
        );
    } else {
        post.applications = applications;
    }

    Ok(post)
}

/// Turn a raw user document into the canonical `UserProfile`.
pub fn normalize_profile(doc: &Document) -> Result<UserProfile, StoreError> {
    let data = &doc.data;

    let user_type = data
        .get("userType")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Role>().ok())
        .ok_or_else(|| corrupt(&doc.id, "userType"))?;

    let social_links = data
        .get("socialLinks")
        .cloned()
        .and_then(|v| serde_json::from_value::<SocialLinks>(v).ok())
        .unwrap_or_default();

    Ok(UserProfile {
        uid: UserId::new(doc.id.clone()),
        email: optional_str(data, "email").unwrap_or_default(),
        username: required_str(data, "username", &doc.id)?,
        first_name: optional_str(data, "firstName").unwrap_or_default(),
        last_name: optional_str(data, "lastName").unwrap_or_default(),
        user_type,
        profile_image_url: optional_str(data, "profileImageUrl"),
        bio: optional_str(data, "bio"),
        location: optional_str(data, "location"),
        phone_number: optional_str(data, "phoneNumber"),
        website: optional_str(data, "website"),
        social_links,
        skills: strings(data, "skills"),
        experience: entries::<Experience>(data, "experience", &doc.id),
        education: entries::<Education>(data, "education", &doc.id),
        followers: strings(data, "followers").into_iter().map(UserId::from).collect(),
        following: strings(data, "following").into_iter().map(UserId::from).collect(),
        created_at: timestamp(data, "createdAt"),
        updated_at: timestamp(data, "updatedAt"),
    })
}

fn corrupt(id: &str, field: &str) -> StoreError {
    StoreError::Corrupt(format!("document {} has no valid '{}'", id, field))
}

fn required_str(data: &DocumentData, field: &str, id: &str) -> Result<String, StoreError> {
    data.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| corrupt(id, field))
}

fn optional_str(data: &DocumentData, field: &str) -> Option<String> {
    data.get(field).and_then(Value::as_str).map(str::to_string)
}

fn array<'a>(data: &'a DocumentData, field: &str) -> &'a [Value] {
    data.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn strings(data: &DocumentData, field: &str) -> Vec<String> {
    array(data, field)
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn entries<T: DeserializeOwned>(data: &DocumentData, field: &str, id: &str) -> Vec<T> {
    array(data, field)
        .iter()
        .filter_map(|entry| match serde_json::from_value::<T>(entry.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(document = %id, field, error = %e, "Skipping malformed entry");
                None
            }
        })
        .collect()
}

fn timestamp(data: &DocumentData, field: &str) -> DateTime<Utc> {
    data.get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}
