//! Error taxonomy of the catalog service and its HTTP mapping.
//!
//! Every expected failure of the relationship layer has its own variant so the
//! router boundary can map it onto a status code. Anything else travels as
//! [`ApiError::Unexpected`], which is logged in full and reported to the caller
//! as an opaque failure with a reference id.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

use crate::model::EntityId;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// One problem found while validating a payload against a derived shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Dotted path of the offending field, e.g. `distributions[0].content_url`.
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Identities referenced by one relationship field that do not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingRelated {
    pub field: String,
    pub kinds: Vec<String>,
    /// Sorted ascending, without duplicates.
    pub identifiers: Vec<EntityId>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid payload: {}", .0.iter().map(|e| format!("{}: {}", e.field, e.message)).join("; "))]
    Validation(Vec<FieldError>),

    #[error("empty natural key for {vocabulary} at {field}")]
    InvalidKey { vocabulary: String, field: String },

    #[error("related resources not found: {}", format_missing(.0))]
    RelatedNotFound(Vec<MissingRelated>),

    #[error("{kind} with platform '{platform}' and platform_identifier '{platform_identifier}' already exists{}", .existing.map(|id| format!(" with identifier {id}")).unwrap_or_default())]
    Conflict {
        kind: String,
        platform: String,
        platform_identifier: String,
        existing: Option<EntityId>,
    },

    #[error("{kind} '{identifier}' not found{}", .platform.as_ref().map(|p| format!(" on platform '{p}'")).unwrap_or_default())]
    NotFound {
        kind: String,
        identifier: String,
        platform: Option<String>,
    },

    #[error("{kind} {identifier} cannot be deleted: {reason}")]
    DependentExists {
        kind: String,
        identifier: EntityId,
        reason: String,
    },

    #[error("unsupported schema '{requested}', expected one of: {}", .supported.join(", "))]
    UnsupportedSchema {
        requested: String,
        supported: Vec<String>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<crate::store::StoreError> for ApiError {
    fn from(e: crate::store::StoreError) -> Self {
        ApiError::Unexpected(e.into())
    }
}

fn format_missing(missing: &[MissingRelated]) -> String {
    missing
        .iter()
        .map(|m| format!("{} ({}): {:?}", m.field, m.kinds.join("|"), m.identifiers))
        .join("; ")
}

impl ApiError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn not_found(kind: &str, identifier: impl ToString, platform: Option<&str>) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            identifier: identifier.to_string(),
            platform: platform.map(str::to_string),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidKey { .. } => StatusCode::BAD_REQUEST,
            ApiError::RelatedNotFound(_) | ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::DependentExists { .. } | ApiError::UnsupportedSchema { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Configuration(_) | ApiError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Structured details attached to the response body next to the message.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Validation(errors) => Some(serde_json::json!({ "errors": errors })),
            ApiError::RelatedNotFound(missing) => Some(serde_json::json!({ "missing": missing })),
            ApiError::Conflict { existing, .. } => Some(serde_json::json!({ "identifier": existing })),
            ApiError::UnsupportedSchema { supported, .. } => {
                Some(serde_json::json!({ "supported": supported }))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ApiError::Unexpected(_) | ApiError::Configuration(_) => {
                let reference = uuid::Uuid::new_v4();
                log::error!("unexpected failure [{}]: {:?}", reference, self);
                ErrorResponse {
                    error: "Unexpected error while processing the request".to_string(),
                    details: Some(serde_json::json!({ "reference": reference.to_string() })),
                }
            }
            other => ErrorResponse {
                error: other.to_string(),
                details: other.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_related_not_found_lists_every_identifier() {
        let err = ApiError::RelatedNotFound(vec![MissingRelated {
            field: "citations".to_string(),
            kinds: vec!["publication".to_string()],
            identifiers: vec![102, 103],
        }]);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        let msg = err.to_string();
        assert!(msg.contains("citations"));
        assert!(msg.contains("[102, 103]"));
    }

    #[test]
    fn test_not_found_names_platform() {
        let err = ApiError::not_found("dataset", "42", Some("openml"));
        assert_eq!(err.to_string(), "dataset '42' not found on platform 'openml'");
        let err = ApiError::not_found("dataset", 7, None);
        assert_eq!(err.to_string(), "dataset '7' not found");
    }

    #[test]
    fn test_conflict_names_existing_identity() {
        let err = ApiError::Conflict {
            kind: "dataset".to_string(),
            platform: "openml".to_string(),
            platform_identifier: "42".to_string(),
            existing: Some(1),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.to_string().ends_with("with identifier 1"));
    }

    #[test]
    fn test_unexpected_does_not_leak_detail() {
        let response =
            ApiError::Unexpected(anyhow::anyhow!("password=hunter2 in connection")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
