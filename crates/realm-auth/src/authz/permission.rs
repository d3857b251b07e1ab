//! Permissions requested in an authorization check.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A (resource, scope) pair, rendered as `resource#scope`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission {
    pub resource: String,
    pub scope: String,
}

/// Request-scoped set of permissions. Ordered so denials render deterministically.
pub type PermissionSet = BTreeSet<Permission>;

impl Permission {
    pub fn new(resource: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.scope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid permission '{0}', expected resource#scope")]
pub struct ParsePermissionError(String);

impl FromStr for Permission {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('#') {
            Some((resource, scope)) if !resource.is_empty() && !scope.is_empty() => {
                Ok(Self::new(resource, scope))
            }
            _ => Err(ParsePermissionError(s.to_string())),
        }
    }
}
