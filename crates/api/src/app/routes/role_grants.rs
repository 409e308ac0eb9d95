//! Role grant surfaces: `/system/role-permissions`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use atrium_core::{CompanyId, RoleId, WorkspaceId};
use atrium_infra::store::GrantChange;

use crate::app::{errors, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/role-permissions", get(list).post(upsert))
}

#[derive(Debug, Deserialize)]
pub struct RoleGrantQuery {
    pub role_id: RoleId,
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
}

#[derive(Debug, Deserialize)]
pub struct RoleGrantBody {
    pub role_id: RoleId,
    pub permission_id: atrium_core::PermissionId,
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
    #[serde(default = "default_true")]
    pub is_granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub conditions: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// GET /system/role-permissions - stored grant rows for one role, revoked and
/// expired included.
pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<RoleGrantQuery>,
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
        .list_role_grants(query.role_id, query.workspace_id, query.company_id)
        .await
    {
        Ok(grants) => {
            (StatusCode::OK, Json(serde_json::json!({ "grants": grants }))).into_response()
        }
        Err(e) => errors::access_error_to_response(e),
    }
}

/// POST /system/role-permissions - upsert on the full scope key.
pub async fn upsert(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<RoleGrantBody>,
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

    let change = GrantChange {
        permission_id: body.permission_id,
        is_granted: body.is_granted,
        expires_at: body.expires_at,
        conditions: body.conditions,
        granted_by: Some(principal.user_id()),
    };
    match services
        .access
        .upsert_role_grant(body.role_id, body.workspace_id, body.company_id, change)
        .await
    {
        Ok(grant) => (StatusCode::OK, Json(serde_json::json!({ "grant": grant }))).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}
