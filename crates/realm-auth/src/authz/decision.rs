//! Authorization decisions delegated to the identity provider.
//!
//! The provider evaluates permissions through its token endpoint using the
//! UMA grant in `decision` mode, which answers allow/deny without issuing a
//! new token.

use crate::authz::permission::PermissionSet;
use crate::realm::RealmEndpoints;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

/// Grant type for UMA permission evaluation.
pub const UMA_TICKET_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// Errors from the decision endpoint. A definite deny is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    #[error("Decision request failed: {0}")]
    Http(String),

    #[error("Decision endpoint returned status {0}")]
    Status(u16),

    #[error("Invalid decision payload: {0}")]
    Parse(String),
}

/// Collaborator that decides whether a token holds a set of permissions.
#[async_trait]
pub trait AuthorizationDecider: Send + Sync {
    /// Ask whether `token` is granted every permission in `permissions`.
    async fn decide(&self, token: &str, permissions: &PermissionSet)
        -> Result<bool, DecisionError>;
}

#[derive(Debug, Deserialize)]
struct DecisionResponse {
    result: bool,
}

/// Asks the realm's token endpoint for an UMA decision.
pub struct UmaDecisionClient {
    token_url: String,

    /// Resource server the permissions belong to (`audience`).
    client_id: String,

    http_client: reqwest::Client,
}

impl UmaDecisionClient {
    pub fn new(endpoints: &RealmEndpoints, client_id: String, http_client: reqwest::Client) -> Self {
        Self {
            token_url: endpoints.token_url(),
            client_id,
            http_client,
        }
    }

    fn form(&self, permissions: &PermissionSet) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("grant_type", UMA_TICKET_GRANT_TYPE.to_string()),
            ("audience", self.client_id.clone()),
            ("response_mode", "decision".to_string()),
        ];
        form.extend(
            permissions
                .iter()
                .map(|permission| ("permission", permission.to_string())),
        );
        form
    }
}

#[async_trait]
impl AuthorizationDecider for UmaDecisionClient {
    #[instrument(skip_all, fields(permission_count = permissions.len()))]
    async fn decide(
        &self,
        token: &str,
        permissions: &PermissionSet,
    ) -> Result<bool, DecisionError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .bearer_auth(token)
            .form(&self.form(permissions))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(target: "realm_auth.authz", error = %e, "Decision request failed");
                DecisionError::Http(e.to_string())
            })?;

        match response.status() {
            StatusCode::OK => {}
            // The provider answers a deny (or an unusable token) with 401/403
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::debug!(
                    target: "realm_auth.authz",
                    status = %response.status(),
                    "Decision endpoint denied"
                );
                return Ok(false);
            }
            status => {
                tracing::warn!(target: "realm_auth.authz", status = %status, "Decision endpoint returned error");
                return Err(DecisionError::Status(status.as_u16()));
            }
        }

        let decision: DecisionResponse = response.json().await.map_err(|e| {
            tracing::warn!(target: "realm_auth.authz", error = %e, "Failed to parse decision response");
            DecisionError::Parse(e.to_string())
        })?;

        Ok(decision.result)
    }
}
