use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::models::USERS_COLLECTION;
use crate::domain::normalize::normalize_profile;
use crate::domain::{Identity, ProfileUpdate, RegisterProfile, UserId, UserProfile};
use crate::error::{ServiceError, ServiceResult};
use crate::store::{
    AggregateStore, Direction, Document, DocumentData, Filter, MergeUpdate, Query, SortKind,
    StoreError,
};

/// Upper bound on username search results
pub const MAX_SEARCH_RESULTS: usize = 50;
const MAX_USERNAME_CHARS: usize = 30;

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn AggregateStore>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Write the profile document for a freshly registered user.
    #[instrument(skip(self, user_id, form), fields(user_id = %user_id))]
    pub async fn create_profile(
        &self,
        user_id: &UserId,
        form: RegisterProfile,
    ) -> ServiceResult<UserProfile> {
        let form = validate_registration(form)?;

        let now = Value::String(Utc::now().to_rfc3339());
        let social_links = encode("social links", &form.social_links)?;

        let mut data = DocumentData::new();
        data.insert("email".into(), Value::String(form.email));
        data.insert("username".into(), Value::String(form.username));
        data.insert("firstName".into(), Value::String(form.first_name));
        data.insert("lastName".into(), Value::String(form.last_name));
        data.insert("userType".into(), Value::String(form.user_type.to_string()));
        for (field, value) in [
            ("bio", form.bio),
            ("location", form.location),
            ("phoneNumber", form.phone_number),
            ("website", form.website),
        ] {
            if let Some(value) = value {
                data.insert(field.into(), Value::String(value));
            }
        }
        data.insert("socialLinks".into(), social_links);
        data.insert(
            "skills".into(),
            Value::Array(form.skills.into_iter().map(Value::String).collect()),
        );
        data.insert("followers".into(), Value::Array(Vec::new()));
        data.insert("following".into(), Value::Array(Vec::new()));
        data.insert("createdAt".into(), now.clone());
        data.insert("updatedAt".into(), now);

        self.store
            .create_with_id(USERS_COLLECTION, user_id.as_str(), data.clone())
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists { .. } => ServiceError::ValidationFailed(format!(
                    "profile for {} already exists",
                    user_id
                )),
                other => other.into(),
            })?;

        let profile = normalize_profile(&Document {
            id: user_id.to_string(),
            version: 1,
            seq: 0,
            data,
        })?;

        info!(username = %profile.username, role = %profile.user_type, "Profile created");
        Ok(profile)
    }

    /// Merge a partial edit into the caller's own profile and stamp
    /// `updatedAt`. Fields absent from `update` keep their stored values.
    #[instrument(skip(self, caller, update))]
    pub async fn update_profile(
        &self,
        caller: Option<&Identity>,
        update: ProfileUpdate,
    ) -> ServiceResult<UserProfile> {
        let owner = caller.ok_or(ServiceError::Unauthenticated)?;
        let merge = profile_merge(update)?;

        self.store
            .merge_update(USERS_COLLECTION, owner.id.as_str(), &merge)
            .await?;
        info!(user_id = %owner.id, fields = merge.fields.len(), "Profile updated");

        self.get_profile(&owner.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("{}/{}", USERS_COLLECTION, owner.id)))
    }

    pub async fn get_profile(&self, user_id: &UserId) -> ServiceResult<Option<UserProfile>> {
        match self.store.get(USERS_COLLECTION, user_id.as_str()).await? {
            Some(doc) => Ok(Some(normalize_profile(&doc)?)),
            None => Ok(None),
        }
    }

    /// Profiles whose username starts with `prefix`, alphabetically.
    pub async fn search_by_username_prefix(&self, prefix: &str) -> ServiceResult<Vec<UserProfile>> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::new()
            .filter(Filter::prefix("username", prefix))
            .order_by("username", SortKind::Text, Direction::Asc)
            .limit(MAX_SEARCH_RESULTS);
        let docs = self.store.query(USERS_COLLECTION, &query).await?;
        Ok(normalize_all(&docs))
    }

    pub async fn find_by_exact_username(&self, username: &str) -> ServiceResult<Vec<UserProfile>> {
        let query = Query::new().filter(Filter::equals("username", username.trim()));
        let docs = self.store.query(USERS_COLLECTION, &query).await?;
        Ok(normalize_all(&docs))
    }
}

fn validate_registration(mut form: RegisterProfile) -> ServiceResult<RegisterProfile> {
    form.email = form.email.trim().to_string();
    form.username = form.username.trim().to_string();
    form.first_name = form.first_name.trim().to_string();
    form.last_name = form.last_name.trim().to_string();

    if !is_valid_email(&form.email) {
        return Err(ServiceError::ValidationFailed(format!(
            "'{}' is not a valid email address",
            form.email
        )));
    }
    if form.username.is_empty() || form.username.chars().any(char::is_whitespace) {
        return Err(ServiceError::ValidationFailed(
            "username must be a single non-empty word".to_string(),
        ));
    }
    if form.username.chars().count() > MAX_USERNAME_CHARS {
        return Err(ServiceError::ValidationFailed(format!(
            "username exceeds {} characters",
            MAX_USERNAME_CHARS
        )));
    }
    if form.first_name.is_empty() || form.last_name.is_empty() {
        return Err(ServiceError::ValidationFailed(
            "first and last name are required".to_string(),
        ));
    }
    Ok(form)
}

fn profile_merge(update: ProfileUpdate) -> ServiceResult<MergeUpdate> {
    let mut merge = MergeUpdate::new();

    for (field, value) in [("firstName", update.first_name), ("lastName", update.last_name)] {
        if let Some(value) = value {
            let value = value.trim();
            if value.is_empty() {
                return Err(ServiceError::ValidationFailed(format!(
                    "{} must not be empty",
                    field
                )));
            }
            merge = merge.set(field, Value::String(value.to_string()));
        }
    }

    for (field, value) in [
        ("profileImageUrl", update.profile_image_url),
        ("bio", update.bio),
        ("location", update.location),
        ("phoneNumber", update.phone_number),
        ("website", update.website),
    ] {
        if let Some(value) = value {
            let value = value.trim();
            let stored = if value.is_empty() {
                Value::Null
            } else {
                Value::String(value.to_string())
            };
            merge = merge.set(field, stored);
        }
    }

    if let Some(links) = update.social_links {
        merge = merge.set("socialLinks", encode("social links", &links)?);
    }
    if let Some(skills) = update.skills {
        let skills = skills
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect();
        merge = merge.set("skills", Value::Array(skills));
    }
    if let Some(experience) = update.experience {
        merge = merge.set("experience", encode("experience", &experience)?);
    }
    if let Some(education) = update.education {
        merge = merge.set("education", encode("education", &education)?);
    }

    Ok(merge.set("updatedAt", Value::String(Utc::now().to_rfc3339())))
}

fn encode<T: Serialize>(what: &str, value: &T) -> ServiceResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::Internal(format!("Failed to encode {}: {}", what, e)))
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .map_or(false, |(host, tld)| !host.is_empty() && !tld.is_empty())
}

fn normalize_all(docs: &[Document]) -> Vec<UserProfile> {
    docs.iter()
        .filter_map(|doc| match normalize_profile(doc) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(user_id = %doc.id, error = %e, "Skipping unreadable profile");
                None
            }
        })
        .collect()
}
