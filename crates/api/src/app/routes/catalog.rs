//! Catalog administration: roles, modules, resources, permissions.
//!
//! All of these require `system.access.manage` in the scope the mutation
//! targets. System-role and core-module protections are enforced in the
//! service and apply to owners too.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post},
};
use serde::Deserialize;

use atrium_core::{CompanyId, ModuleId, RoleId, WorkspaceId};
use atrium_infra::service::{NewPermission, NewResource, NewRole};
use atrium_infra::store::{CatalogStore, DirectoryStore, RoleRecord};

use crate::app::{errors, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/roles", post(create_role))
        .route("/roles/:id/deactivate", post(deactivate_role))
        .route("/roles/:id", delete(delete_role))
        .route("/modules/:id/deactivate", post(deactivate_module))
        .route("/resources", post(create_resource))
        .route("/permissions", post(create_permission))
        .route("/permissions/normalize", post(normalize_permissions))
}

/// Authorization scope for catalog mutations that are not tied to a role's
/// own scope (modules, resources, permissions, normalize).
#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
}

async fn guard(
    services: &AppServices,
    principal: &PrincipalContext,
    workspace_id: WorkspaceId,
    company_id: Option<CompanyId>,
) -> Result<(), axum::response::Response> {
    authz::require(
        services,
        principal,
        workspace_id,
        company_id,
        &authz::manage_requirement(),
    )
    .await
}

/// Derive the authorization scope from a role's own scoping. A
/// company-scoped role is guarded within its company's workspace.
async fn role_scope(
    services: &AppServices,
    workspace_id: Option<WorkspaceId>,
    company_id: Option<CompanyId>,
) -> Result<(WorkspaceId, Option<CompanyId>), axum::response::Response> {
    match (workspace_id, company_id) {
        (Some(workspace_id), None) => Ok((workspace_id, None)),
        (None, Some(company_id)) => {
            let company = services
                .access
                .store()
                .company(company_id)
                .await
                .map_err(|e| errors::access_error_to_response(e.into()))?
                .ok_or_else(|| {
                    errors::json_error(StatusCode::NOT_FOUND, "not_found", "company not found")
                })?;
            Ok((company.workspace_id, Some(company_id)))
        }
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "a role must be scoped to exactly one of workspace_id or company_id",
        )),
    }
}

async fn load_role(
    services: &AppServices,
    role_id: RoleId,
) -> Result<RoleRecord, axum::response::Response> {
    services
        .access
        .store()
        .role(role_id)
        .await
        .map_err(|e| errors::access_error_to_response(e.into()))?
        .ok_or_else(|| errors::json_error(StatusCode::NOT_FOUND, "not_found", "role not found"))
}

/// POST /system/roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewRole>,
) -> axum::response::Response {
    let (workspace_id, company_id) =
        match role_scope(&services, body.workspace_id, body.company_id).await {
            Ok(scope) => scope,
            Err(resp) => return resp,
        };
    if let Err(resp) = guard(&services, &principal, workspace_id, company_id).await {
        return resp;
    }

    match services.access.create_role(body).await {
        Ok(role) => (StatusCode::CREATED, Json(serde_json::json!({ "role": role })))
            .into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// POST /system/roles/:id/deactivate
pub async fn deactivate_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(role_id): Path<RoleId>,
) -> axum::response::Response {
    let role = match load_role(&services, role_id).await {
        Ok(role) => role,
        Err(resp) => return resp,
    };
    let (workspace_id, company_id) =
        match role_scope(&services, role.workspace_id, role.company_id).await {
            Ok(scope) => scope,
            Err(resp) => return resp,
        };
    if let Err(resp) = guard(&services, &principal, workspace_id, company_id).await {
        return resp;
    }

    match services.access.deactivate_role(role_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// DELETE /system/roles/:id (soft delete)
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(role_id): Path<RoleId>,
) -> axum::response::Response {
    let role = match load_role(&services, role_id).await {
        Ok(role) => role,
        Err(resp) => return resp,
    };
    let (workspace_id, company_id) =
        match role_scope(&services, role.workspace_id, role.company_id).await {
            Ok(scope) => scope,
            Err(resp) => return resp,
        };
    if let Err(resp) = guard(&services, &principal, workspace_id, company_id).await {
        return resp;
    }

    match services.access.delete_role(role_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// POST /system/modules/:id/deactivate
pub async fn deactivate_module(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(module_id): Path<ModuleId>,
    Query(scope): Query<ScopeQuery>,
) -> axum::response::Response {
    if let Err(resp) = guard(&services, &principal, scope.workspace_id, scope.company_id).await {
        return resp;
    }

    match services.access.deactivate_module(module_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// POST /system/resources
pub async fn create_resource(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(scope): Query<ScopeQuery>,
    Json(body): Json<NewResource>,
) -> axum::response::Response {
    if let Err(resp) = guard(&services, &principal, scope.workspace_id, scope.company_id).await {
        return resp;
    }

    match services.access.create_resource(body).await {
        Ok(resource) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "resource": resource })),
        )
            .into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// POST /system/permissions
pub async fn create_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(scope): Query<ScopeQuery>,
    Json(body): Json<NewPermission>,
) -> axum::response::Response {
    if let Err(resp) = guard(&services, &principal, scope.workspace_id, scope.company_id).await {
        return resp;
    }

    match services.access.create_permission(body).await {
        Ok(permission) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "permission": permission })),
        )
            .into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// POST /system/permissions/normalize - deactivate permissions whose action
/// is off the operational allow-list.
pub async fn normalize_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(scope): Query<ScopeQuery>,
) -> axum::response::Response {
    if let Err(resp) = guard(&services, &principal, scope.workspace_id, scope.company_id).await {
        return resp;
    }

    match services.access.normalize_permission_actions().await {
        Ok(deactivated) => (
            StatusCode::OK,
            Json(serde_json::json!({ "deactivated": deactivated })),
        )
            .into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}
