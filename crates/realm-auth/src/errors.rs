//! Realm auth error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Messages returned to clients for key and infrastructure failures are
//! intentionally generic to avoid leaking identity provider internals. A
//! permission denial, by contrast, enumerates the requested permissions so the
//! caller can render an explicit access-denied response.

use crate::authz::permission::PermissionSet;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Realm auth error type.
///
/// Maps to appropriate HTTP status codes:
/// - KeyNotFound, InvalidPrincipal: 401 Unauthorized
/// - PermissionDenied: 403 Forbidden
/// - LoadFailure: 503 Service Unavailable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No signing key in the current key set matches the token's key id.
    #[error("No signing key matches key id {0}")]
    KeyNotFound(String),

    /// No authenticated identity could be established where one was required.
    #[error("No authenticated principal")]
    InvalidPrincipal,

    /// The authorization check denied the requested permissions.
    #[error("Permission denied: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    PermissionDenied(PermissionSet),

    /// The key set could not be fetched or parsed.
    #[error("Key set unavailable: {0}")]
    LoadFailure(String),
}

impl AuthError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::KeyNotFound(_) | AuthError::InvalidPrincipal => 401,
            AuthError::PermissionDenied(_) => 403,
            AuthError::LoadFailure(_) => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    permissions: Vec<String>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message, permissions) = match &self {
            AuthError::KeyNotFound(kid) => {
                tracing::debug!(target: "realm_auth.errors", kid = %kid, "Unknown signing key");
                (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_TOKEN",
                    "The access token is invalid or expired".to_string(),
                    Vec::new(),
                )
            }
            AuthError::InvalidPrincipal => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "The access token is invalid or expired".to_string(),
                Vec::new(),
            ),
            AuthError::PermissionDenied(denied) => (
                StatusCode::FORBIDDEN,
                "PERMISSION_DENIED",
                "The request requires permissions the caller does not hold".to_string(),
                denied.iter().map(ToString::to_string).collect(),
            ),
            AuthError::LoadFailure(reason) => {
                // Log actual reason server-side
                tracing::warn!(target: "realm_auth.errors", reason = %reason, "Key set unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                    Vec::new(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                permissions,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer error=\"invalid_token\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::authz::permission::Permission;
    use axum::body::Body;
    use http_body_util::BodyExt;

    // Helper function to read the response body as JSON
    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn denied() -> PermissionSet {
        PermissionSet::from([
            Permission::new("grant-call", "edit"),
            Permission::new("institution", "view"),
        ])
    }

    #[test]
    fn test_display_key_not_found() {
        let error = AuthError::KeyNotFound("kid-2".to_string());
        assert_eq!(format!("{}", error), "No signing key matches key id kid-2");
    }

    #[test]
    fn test_display_invalid_principal() {
        assert_eq!(
            format!("{}", AuthError::InvalidPrincipal),
            "No authenticated principal"
        );
    }

    #[test]
    fn test_display_permission_denied_lists_permissions() {
        let error = AuthError::PermissionDenied(denied());
        assert_eq!(
            format!("{}", error),
            "Permission denied: grant-call#edit, institution#view"
        );
    }

    #[test]
    fn test_display_load_failure() {
        let error = AuthError::LoadFailure("connection refused".to_string());
        assert_eq!(format!("{}", error), "Key set unavailable: connection refused");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::KeyNotFound("k".to_string()).status_code(), 401);
        assert_eq!(AuthError::InvalidPrincipal.status_code(), 401);
        assert_eq!(AuthError::PermissionDenied(denied()).status_code(), 403);
        assert_eq!(AuthError::LoadFailure("x".to_string()).status_code(), 503);
    }

    #[tokio::test]
    async fn test_into_response_invalid_principal() {
        let response = AuthError::InvalidPrincipal.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let www_auth = response.headers().get("WWW-Authenticate").unwrap();
        assert!(www_auth.to_str().unwrap().contains("invalid_token"));

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INVALID_TOKEN");
        assert!(body_json["error"].get("permissions").is_none());
    }

    #[tokio::test]
    async fn test_into_response_key_not_found_hides_kid() {
        let response = AuthError::KeyNotFound("kid-secret".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INVALID_TOKEN");
        assert!(!body_json.to_string().contains("kid-secret"));
    }

    #[tokio::test]
    async fn test_into_response_permission_denied_enumerates_permissions() {
        let response = AuthError::PermissionDenied(denied()).into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get("WWW-Authenticate").is_none());

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "PERMISSION_DENIED");
        assert_eq!(
            body_json["error"]["permissions"],
            serde_json::json!(["grant-call#edit", "institution#view"])
        );
    }

    #[tokio::test]
    async fn test_into_response_load_failure_is_generic() {
        let response = AuthError::LoadFailure("dns lookup failed for idp".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "SERVICE_UNAVAILABLE");
        assert_eq!(
            body_json["error"]["message"],
            "Service temporarily unavailable"
        );
    }
}
