//! Authentication middleware for protected routes.
//!
//! Extracts the Bearer token from the Authorization header, verifies it,
//! resolves the principal and injects both into request extensions.

use crate::auth::claims::AccessClaims;
use crate::errors::AuthError;
use crate::principal::PrincipalResolver;
use crate::service::RealmAuth;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
pub struct AuthState<R> {
    pub realm_auth: Arc<RealmAuth>,
    pub resolver: Arc<R>,
}

impl<R> Clone for AuthState<R> {
    fn clone(&self) -> Self {
        Self {
            realm_auth: Arc::clone(&self.realm_auth),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

/// The verified token of the request, kept for later permission checks.
#[derive(Clone)]
pub struct BearerToken(pub String);

/// Authentication middleware that verifies realm access tokens.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - Returns 401 Unauthorized with WWW-Authenticate header if the token is
///   missing or invalid, or if it does not resolve to a principal
/// - Otherwise continues with the principal, the claims and the token in
///   request extensions
#[instrument(skip_all, name = "realm_auth.middleware.auth")]
pub async fn require_auth<R>(
    State(state): State<Arc<AuthState<R>>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthError>
where
    R: PrincipalResolver + 'static,
{
    let token = bearer_token(&req)?.to_string();

    let claims = state.realm_auth.authenticate(&token).await.ok_or_else(|| {
        tracing::debug!(target: "realm_auth.middleware", "Token verification failed");
        AuthError::InvalidPrincipal
    })?;

    let principal = state.resolver.resolve(&claims).await?;

    req.extensions_mut().insert(principal);
    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(BearerToken(token));

    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Result<&str, AuthError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "realm_auth.middleware", "Missing Authorization header");
            AuthError::InvalidPrincipal
        })?;

    auth_header
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            tracing::debug!(target: "realm_auth.middleware", "Invalid Authorization header format");
            AuthError::InvalidPrincipal
        })
}

/// Access to what [`require_auth`] stored on the request.
pub trait PrincipalExt {
    /// The resolved principal. `None` if the middleware was not applied.
    fn principal<P: Clone + Send + Sync + 'static>(&self) -> Option<&P>;

    fn access_claims(&self) -> Option<&AccessClaims>;

    fn bearer_token(&self) -> Option<&str>;
}

impl<B> PrincipalExt for axum::extract::Request<B> {
    fn principal<P: Clone + Send + Sync + 'static>(&self) -> Option<&P> {
        self.extensions().get::<P>()
    }

    fn access_claims(&self) -> Option<&AccessClaims> {
        self.extensions().get::<AccessClaims>()
    }

    fn bearer_token(&self) -> Option<&str> {
        self.extensions()
            .get::<BearerToken>()
            .map(|token| token.0.as_str())
    }
}
