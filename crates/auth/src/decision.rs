//! Access Decision Point: the single policy reduction every protected
//! operation runs before proceeding.
//!
//! The decision is an explicit state machine so the precedence of the owner
//! bypass and the company restriction is visible and testable:
//!
//! ```text
//! OwnerBypass → RoleOrPermissionCheck → CompanyRestrictionCheck → Allow/Deny
//! ```
//!
//! - Ownership of the workspace satisfies any requirement outright.
//! - The company restriction is AND-ed on top of the role/permission result;
//!   it never substitutes for it.
//! - A caller with no membership in the workspace is denied before anything
//!   else is evaluated.
//!
//! This function is pure: no IO, no panics, no business logic. Callers gather
//! the facts (membership, held roles, granted permission names) from storage
//! and pass them in.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use atrium_core::{CompanyId, Scope};

use crate::{MembershipScope, PermissionName, RoleCode, WorkspaceMembership};

/// What a protected operation requires from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequirement {
    /// The caller must hold this permission in the requested scope.
    Permission(PermissionName),
    /// The caller must hold at least one of these roles in the requested scope.
    AnyRole(Vec<RoleCode>),
}

/// Facts gathered for one decision, all scoped to the same (user, scope) pair.
#[derive(Debug, Clone)]
pub struct AccessFacts<'a> {
    /// The caller's membership in the scope's workspace, if any.
    pub membership: Option<&'a WorkspaceMembership>,
    /// The scope the operation targets.
    pub scope: &'a Scope,
    /// Role codes the caller holds via active assignments in the scope.
    pub held_roles: &'a [RoleCode],
    /// Effective permission names for the caller in the scope.
    pub granted_permissions: &'a HashSet<String>,
}

/// Why a decision allowed the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    /// Workspace ownership supersedes granular checks.
    OwnerBypass,
    PermissionGranted,
    RoleHeld,
}

/// Why a decision denied the operation.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    #[error("caller is not a member of the workspace")]
    NotMember,

    #[error("missing permission '{permission}'")]
    MissingPermission { permission: String },

    #[error("none of the required roles are held")]
    MissingRole { required: Vec<String> },

    #[error("membership is restricted to another company")]
    CompanyRestricted {
        restricted_to: CompanyId,
        requested: Option<CompanyId>,
    },
}

/// Outcome of the decision state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Run the decision state machine over gathered facts.
pub fn decide(facts: &AccessFacts<'_>, requirement: &AccessRequirement) -> Decision {
    // State 0: an unresolved membership short-circuits everything.
    let Some(membership) = facts.membership else {
        return Decision::Deny(DenyReason::NotMember);
    };

    // State 1: OwnerBypass. Ownership is supreme authority for reads and
    // grants; protected system/core entities are guarded in the mutation
    // path, not here.
    if membership.is_owner {
        return Decision::Allow(AllowReason::OwnerBypass);
    }

    // State 2: RoleOrPermissionCheck.
    let allow = match requirement {
        AccessRequirement::Permission(name) => {
            if facts.granted_permissions.contains(name.as_str()) {
                AllowReason::PermissionGranted
            } else {
                return Decision::Deny(DenyReason::MissingPermission {
                    permission: name.as_str().to_string(),
                });
            }
        }
        AccessRequirement::AnyRole(required) => {
            if required.iter().any(|r| facts.held_roles.contains(r)) {
                AllowReason::RoleHeld
            } else {
                return Decision::Deny(DenyReason::MissingRole {
                    required: required.iter().map(|r| r.as_str().to_string()).collect(),
                });
            }
        }
    };

    // State 3: CompanyRestrictionCheck, AND-ed on top of the check above.
    if let MembershipScope::RestrictedToCompany { company_id } = membership.scope {
        if !membership.scope.permits(facts.scope) {
            return Decision::Deny(DenyReason::CompanyRestricted {
                restricted_to: company_id,
                requested: facts.scope.company_id,
            });
        }
    }

    Decision::Allow(allow)
}
