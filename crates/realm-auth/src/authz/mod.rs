//! Permission checks.
//!
//! # Components
//!
//! - `permission` - Permissions and permission sets
//! - `decision` - Decision collaborator and the identity provider client
//! - `gate` - Authorization gate used by request handlers

pub mod decision;
pub mod gate;
pub mod permission;

pub use decision::{AuthorizationDecider, DecisionError, UmaDecisionClient};
pub use gate::AuthorizationGate;
pub use permission::{Permission, PermissionSet};
