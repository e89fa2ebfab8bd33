/// Error types for engagement-service
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Why a caller is not allowed to perform an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotEligibleReason {
    /// Only seekers can apply
    NotSeeker,
    /// The post is not open for applications
    NotApplicable,
    /// Only employers can open a post for applications
    OwnerNotEmployer,
    /// A profile can only be edited by its owner
    NotProfileOwner,
}

impl fmt::Display for NotEligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            NotEligibleReason::NotSeeker => "only seekers can apply to posts",
            NotEligibleReason::NotApplicable => "post is not accepting applications",
            NotEligibleReason::OwnerNotEmployer => "only employers can accept applications",
            NotEligibleReason::NotProfileOwner => "profiles can only be edited by their owner",
        };
        f.write_str(msg)
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Not eligible: {0}")]
    NotEligible(NotEligibleReason),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(StoreError),

    #[error("Concurrent writers kept winning after {attempts} attempts")]
    Contention { attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unauthenticated => "UNAUTHENTICATED",
            ServiceError::ValidationFailed(_) => "VALIDATION_FAILED",
            ServiceError::NotEligible(_) => "NOT_ELIGIBLE",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ServiceError::Contention { .. } => "CONTENTION",
            ServiceError::Config(_) => "CONFIG_ERROR",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Store failures are propagated as-is; corrupt documents and adapter
/// misuse are internal errors rather than availability problems.
impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                ServiceError::StoreUnavailable(err)
            }
            StoreError::NotFound { collection, id } => {
                ServiceError::NotFound(format!("{}/{}", collection, id))
            }
            StoreError::AlreadyExists { collection, id } => {
                ServiceError::ValidationFailed(format!("{}/{} already exists", collection, id))
            }
            StoreError::Conflict { .. } => ServiceError::Contention { attempts: 1 },
            StoreError::Unsupported(_) | StoreError::Corrupt(_) => {
                ServiceError::Internal(err.to_string())
            }
        }
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// JSON error body returned by the HTTP surface
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NotEligibleReason>,
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServiceError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotEligible(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Contention { .. } => StatusCode::CONFLICT,
            ServiceError::Config(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let reason = match self {
            ServiceError::NotEligible(reason) => Some(*reason),
            _ => None,
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code(),
            message: self.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unavailable_and_timeout_map_to_store_unavailable() {
        let err: ServiceError = StoreError::Unavailable("down".into()).into();
        assert!(matches!(
            err,
            ServiceError::StoreUnavailable(StoreError::Unavailable(_))
        ));

        let err: ServiceError = StoreError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn test_corrupt_document_is_internal() {
        let err: ServiceError = StoreError::Corrupt("bad".into()).into();
        assert!(matches!(err, ServiceError::Internal(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServiceError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::NotEligible(NotEligibleReason::NotApplicable).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::StoreUnavailable(StoreError::Unavailable("down".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::Contention { attempts: 4 }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::Config("bad".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_eligible_message_names_reason() {
        let err = ServiceError::NotEligible(NotEligibleReason::NotSeeker);
        assert_eq!(err.to_string(), "Not eligible: only seekers can apply to posts");
    }
}
