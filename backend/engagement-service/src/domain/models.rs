use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Collection holding post aggregates
pub const POSTS_COLLECTION: &str = "posts";
/// Collection holding user profiles
pub const USERS_COLLECTION: &str = "users";

pub const MAX_CAPTION_CHARS: usize = 256;
pub const MAX_COMMENT_CHARS: usize = 1000;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Opaque user identity issued by the identity provider
    UserId
);
string_id!(
    /// Store key of a post document
    PostId
);

/// Account role. Only employers can open posts for applications,
/// only seekers can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Seeker,
    Employer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Seeker => "seeker",
            Role::Employer => "employer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "seeker" => Ok(Role::Seeker),
            "employer" => Ok(Role::Employer),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Authenticated caller, passed explicitly into every mutating operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
        }
    }

    pub fn is_seeker(&self) -> bool {
        self.role == Role::Seeker
    }
}

/// Comment entity - immutable once appended to a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: UserId,
    pub username: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Application entity - a seeker applying to an employer's post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub user_id: UserId,
    pub username: String,
    pub applied_at: DateTime<Utc>,
}

/// Post aggregate in canonical form (output of normalization)
///
/// `id` is the store key and is never written as a document field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(skip_serializing)]
    pub id: PostId,
    pub user_id: UserId,
    pub username: String,
    pub user_type: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub caption: String,
    pub created_at: DateTime<Utc>,
    pub likes: Vec<UserId>,
    pub comments: Vec<Comment>,
    pub applicable: bool,
    pub applications: Vec<Application>,
}

impl Post {
    pub fn is_liked_by(&self, user_id: &UserId) -> bool {
        self.likes.contains(user_id)
    }

    /// Applications are only meaningful on applicable posts owned by an employer.
    pub fn accepts_applications(&self) -> bool {
        self.applicable && self.user_type == Role::Employer
    }

    pub fn application_of(&self, user_id: &UserId) -> Option<&Application> {
        self.applications.iter().find(|a| &a.user_id == user_id)
    }

    pub fn has_applied(&self, user_id: &UserId) -> bool {
        self.application_of(user_id).is_some()
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }
}

/// Input for creating a post
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub caption: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub applicable: bool,
}

/// Outcome of `toggle_like`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub liked: bool,
}

/// Outcome of `apply_to_post`; both variants are successes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "application", rename_all = "snake_case")]
pub enum ApplicationResult {
    Applied(Application),
    AlreadyApplied(Application),
}

impl ApplicationResult {
    pub fn application(&self) -> &Application {
        match self {
            ApplicationResult::Applied(app) | ApplicationResult::AlreadyApplied(app) => app,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, ApplicationResult::Applied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("seeker".parse::<Role>().unwrap(), Role::Seeker);
        assert_eq!(" Employer ".parse::<Role>().unwrap(), Role::Employer);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Employer).unwrap(), "\"employer\"");
    }

    #[test]
    fn test_comment_uses_document_field_names() {
        let comment = Comment {
            id: "c1".to_string(),
            user_id: UserId::from("u1"),
            username: "bob".to_string(),
            text: "hi".to_string(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&comment).unwrap();
        let obj = value.as_object().unwrap();
        for field in ["id", "userId", "username", "text", "createdAt"] {
            assert!(obj.contains_key(field), "missing {}", field);
        }
    }

    #[test]
    fn test_application_result_accessors() {
        let app = Application {
            user_id: UserId::from("alice"),
            username: "Alice".to_string(),
            applied_at: Utc::now(),
        };
        let applied = ApplicationResult::Applied(app.clone());
        let again = ApplicationResult::AlreadyApplied(app.clone());
        assert!(applied.is_new());
        assert!(!again.is_new());
        assert_eq!(again.application(), &app);
    }
}
