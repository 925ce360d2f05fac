use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Caller of a write request, taken from the authentication proxy headers.
///
/// - `X-User-Id`: required user identifier
/// - `X-User-Roles`: optional comma-separated role list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Forbidden unless `role` is unset or held by the caller.
    pub fn require_role(&self, role: Option<&str>) -> Result<(), ApiError> {
        match role {
            Some(role) if !self.has_role(role) => Err(ApiError::Forbidden(format!(
                "user '{}' lacks role '{}'",
                self.user_id, role
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let user_id = extract_header_value(headers, "x-user-id")
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::Unauthorized("missing X-User-Id header".to_string()))?;
        let roles = extract_header_value(headers, "x-user-roles")
            .map(|raw| parse_roles(&raw))
            .unwrap_or_default();
        Ok(Principal::new(user_id, roles))
    }
}

fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
}

fn parse_roles(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}
