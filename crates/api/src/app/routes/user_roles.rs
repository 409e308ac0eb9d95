//! Per-user role assignment surfaces, nested under `/users/:user_id`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde::Deserialize;

use atrium_core::{CompanyId, RoleId, UserId, WorkspaceId};

use crate::app::{errors, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/roles", post(assign).delete(revoke))
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub role_id: RoleId,
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeQuery {
    pub role_id: RoleId,
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
}

/// POST /users/:user_id/roles - assign (or reactivate) a role in a scope.
pub async fn assign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<UserId>,
    Json(body): Json<AssignBody>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(
        &services,
        &principal,
        body.workspace_id,
        body.company_id,
        &authz::manage_requirement(),
    )
    .await
    {
        return resp;
    }

    match services
        .access
        .assign_role(
            user_id,
            body.role_id,
            body.workspace_id,
            body.company_id,
            Some(principal.user_id()),
        )
        .await
    {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// DELETE /users/:user_id/roles - flip the assignment inactive.
pub async fn revoke(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<UserId>,
    Query(query): Query<RevokeQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(
        &services,
        &principal,
        query.workspace_id,
        query.company_id,
        &authz::manage_requirement(),
    )
    .await
    {
        return resp;
    }

    match services
        .access
        .revoke_role(user_id, query.role_id, query.workspace_id, query.company_id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}
