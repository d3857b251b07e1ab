//! Realm auth token check
//!
//! Operator tool: verifies an access token against the configured realm and
//! optionally asks the identity provider whether it holds a set of
//! permissions.
//!
//! ```text
//! realm-auth-check <token> [resource#scope ...]
//! ```
//!
//! Configuration comes from the same environment variables services use.
//! Exits 0 when the token is valid (and granted, if permissions were given).

use realm_auth::authz::{Permission, PermissionSet};
use realm_auth::config::Config;
use realm_auth::service::RealmAuth;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: realm-auth-check <token> [resource#scope ...]";

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize tracing; logs go to stderr so stdout carries only the verdict
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realm_auth=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(token) = args.next() else {
        eprintln!("{USAGE}");
        return Ok(ExitCode::from(2));
    };

    let permissions = args
        .map(|arg| arg.parse::<Permission>())
        .collect::<Result<PermissionSet, _>>()
        .map_err(|e| {
            error!("{}", e);
            e
        })?;

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        realm = %config.realm,
        jwt_clock_skew_seconds = config.jwt_clock_skew.as_secs(),
        "Configuration loaded successfully"
    );

    let realm_auth = RealmAuth::from_config(&config)?;

    let claims = realm_auth.authenticate(&token).await;
    let valid = claims.is_some();

    let granted = if valid && !permissions.is_empty() {
        Some(realm_auth.is_granted(&token, &permissions).await)
    } else {
        None
    };

    let verdict = serde_json::json!({
        "valid": valid,
        "subject": claims.as_ref().map(|c| c.subject().to_string()),
        "username": claims.as_ref().and_then(|c| c.preferred_username.clone()),
        "permissions": permissions.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "granted": granted,
    });
    println!("{}", serde_json::to_string_pretty(&verdict)?);

    if valid && granted.unwrap_or(true) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
