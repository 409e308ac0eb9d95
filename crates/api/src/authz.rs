//! Request-level authorization: run the decision state machine and turn a
//! deny into a 403 response.

use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;

use atrium_auth::{AccessRequirement, Decision, PermissionName};
use atrium_core::{CompanyId, WorkspaceId};

use crate::app::{errors, services::AppServices};
use crate::context::PrincipalContext;

/// Permission guarding the administrative surfaces (grant mutation, catalog
/// mutation, listing other users' grants).
pub const MANAGE_ACCESS: &str = "system.access.manage";

pub fn manage_requirement() -> AccessRequirement {
    AccessRequirement::Permission(PermissionName::new(MANAGE_ACCESS))
}

/// Check `requirement` for the caller in the given scope; `Err` carries the
/// ready-to-return response (403 on deny, 404/500 on resolution failures).
pub async fn require(
    services: &AppServices,
    principal: &PrincipalContext,
    workspace_id: WorkspaceId,
    company_id: Option<CompanyId>,
    requirement: &AccessRequirement,
) -> Result<(), Response> {
    match services
        .access
        .check_access(principal.user_id(), workspace_id, company_id, requirement)
        .await
    {
        Ok(Decision::Allow(_)) => Ok(()),
        Ok(Decision::Deny(reason)) => Err(errors::json_error_with_details(
            StatusCode::FORBIDDEN,
            "forbidden",
            reason.to_string(),
            json!({ "deny": reason }),
        )),
        Err(e) => Err(errors::access_error_to_response(e)),
    }
}
