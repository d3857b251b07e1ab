//! Authorization gate.
//!
//! Every check is a live call to the decision collaborator: there is no
//! local caching and no retry.

use crate::authz::decision::AuthorizationDecider;
use crate::authz::permission::PermissionSet;
use crate::errors::AuthError;
use std::sync::Arc;
use tracing::instrument;

/// Decides whether a token carries a required permission set.
#[derive(Clone)]
pub struct AuthorizationGate {
    decider: Arc<dyn AuthorizationDecider>,
}

impl AuthorizationGate {
    pub fn new(decider: Arc<dyn AuthorizationDecider>) -> Self {
        Self { decider }
    }

    /// Whether `token` is granted `permissions`.
    ///
    /// Returns the collaborator's decision unchanged. If no decision can be
    /// obtained the answer is `false`.
    #[instrument(skip_all, fields(permission_count = permissions.len()))]
    pub async fn is_granted(&self, token: &str, permissions: &PermissionSet) -> bool {
        match self.decider.decide(token, permissions).await {
            Ok(granted) => {
                tracing::debug!(target: "realm_auth.authz", granted, "Authorization decided");
                granted
            }
            Err(e) => {
                tracing::warn!(target: "realm_auth.authz", error = %e, "No authorization decision, denying");
                false
            }
        }
    }

    /// Like [`is_granted`](Self::is_granted), but a denial is an error.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::PermissionDenied` carrying the full requested set.
    pub async fn require_granted(
        &self,
        token: &str,
        permissions: &PermissionSet,
    ) -> Result<(), AuthError> {
        if self.is_granted(token, permissions).await {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied(permissions.clone()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::authz::decision::DecisionError;
    use crate::authz::permission::Permission;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers with a fixed outcome and records every request.
    struct ScriptedDecider {
        outcome: Result<bool, DecisionError>,
        calls: AtomicUsize,
        seen: Mutex<Vec<PermissionSet>>,
    }

    impl ScriptedDecider {
        fn new(outcome: Result<bool, DecisionError>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AuthorizationDecider for ScriptedDecider {
        async fn decide(
            &self,
            _token: &str,
            permissions: &PermissionSet,
        ) -> Result<bool, DecisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(permissions.clone());
            self.outcome.clone()
        }
    }

    fn permissions() -> PermissionSet {
        PermissionSet::from([
            Permission::new("grant-call", "edit"),
            Permission::new("grant-call", "view"),
        ])
    }

    #[tokio::test]
    async fn test_is_granted_returns_decision() {
        let allow = AuthorizationGate::new(ScriptedDecider::new(Ok(true)));
        let deny = AuthorizationGate::new(ScriptedDecider::new(Ok(false)));

        assert!(allow.is_granted("token", &permissions()).await);
        assert!(!deny.is_granted("token", &permissions()).await);
    }

    #[tokio::test]
    async fn test_is_granted_fails_closed_on_error() {
        let gate = AuthorizationGate::new(ScriptedDecider::new(Err(DecisionError::Status(502))));

        assert!(!gate.is_granted("token", &permissions()).await);
    }

    #[tokio::test]
    async fn test_every_call_is_live() {
        let decider = ScriptedDecider::new(Ok(true));
        let gate = AuthorizationGate::new(decider.clone());

        gate.is_granted("token", &permissions()).await;
        gate.is_granted("token", &permissions()).await;

        assert_eq!(decider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_set_is_passed_through() {
        let decider = ScriptedDecider::new(Ok(true));
        let gate = AuthorizationGate::new(decider.clone());

        assert!(gate.is_granted("token", &PermissionSet::new()).await);
        assert!(decider.seen.lock().unwrap()[0].is_empty());
    }

    #[tokio::test]
    async fn test_require_granted_carries_full_set() {
        let gate = AuthorizationGate::new(ScriptedDecider::new(Ok(false)));

        let err = gate.require_granted("token", &permissions()).await.unwrap_err();

        assert_eq!(err, AuthError::PermissionDenied(permissions()));
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_require_granted_ok() {
        let gate = AuthorizationGate::new(ScriptedDecider::new(Ok(true)));

        assert!(gate.require_granted("token", &permissions()).await.is_ok());
    }
}
