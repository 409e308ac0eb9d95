//! `atrium-auth` — pure authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: the decision
//! state machine operates on facts the caller has already gathered, and the
//! token layer validates claims without knowing how tokens travel.

pub mod claims;
pub mod decision;
pub mod membership;
pub mod permissions;
pub mod roles;
pub mod token;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use decision::{
    AccessFacts, AccessRequirement, AllowReason, Decision, DenyReason, decide,
};
pub use membership::{MembershipScope, WorkspaceMembership};
pub use permissions::{Action, PermissionName};
pub use roles::RoleCode;
pub use token::{Hs256TokenCodec, TokenError, TokenValidator};
