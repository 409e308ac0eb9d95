//! Per-user direct grant surfaces, nested under `/users/:user_id`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use atrium_core::{CompanyId, PermissionId, ScopeMode, UserId, WorkspaceId};
use atrium_infra::store::GrantChange;
use atrium_infra::to_permission_map;

use crate::app::{errors, services::AppServices};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route(
            "/permissions",
            get(list).post(upsert).delete(remove),
        )
        .route("/permissions/bulk", patch(bulk))
        .route("/permissions/effective", get(effective))
}

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
}

#[derive(Debug, Deserialize)]
pub struct GrantBody {
    pub permission_id: PermissionId,
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
    #[serde(default = "default_true")]
    pub is_granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub conditions: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub permission_id: PermissionId,
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
}

#[derive(Debug, Deserialize)]
pub struct BulkEntry {
    pub permission_id: PermissionId,
    #[serde(default = "default_true")]
    pub is_granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub conditions: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct BulkBody {
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
    pub grants: Vec<BulkEntry>,
}

#[derive(Debug, Copy, Clone, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    #[default]
    Flat,
    Map,
}

#[derive(Debug, Deserialize)]
pub struct EffectiveQuery {
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
    #[serde(default)]
    pub shape: Shape,
    #[serde(default)]
    pub mode: ScopeMode,
}

fn default_true() -> bool {
    true
}

/// GET /users/:user_id/permissions - stored direct-grant rows, revoked and
/// expired included.
pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<UserId>,
    Query(query): Query<ScopeQuery>,
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
        .list_direct_grants(user_id, query.workspace_id, query.company_id)
        .await
    {
        Ok(grants) => {
            (StatusCode::OK, Json(serde_json::json!({ "grants": grants }))).into_response()
        }
        Err(e) => errors::access_error_to_response(e),
    }
}

/// POST /users/:user_id/permissions - single upsert on the scope key.
pub async fn upsert(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<UserId>,
    Json(body): Json<GrantBody>,
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
        .upsert_direct_grant(user_id, body.workspace_id, body.company_id, change)
        .await
    {
        Ok(grant) => (StatusCode::OK, Json(serde_json::json!({ "grant": grant }))).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// DELETE /users/:user_id/permissions - remove a stored row outright
/// (administrative cleanup; revocation goes through the upsert paths with
/// `is_granted = false`).
pub async fn remove(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<UserId>,
    Query(query): Query<DeleteQuery>,
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
        .delete_direct_grant(
            user_id,
            query.permission_id,
            query.workspace_id,
            query.company_id,
        )
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// PATCH /users/:user_id/permissions/bulk - transactional batch upsert.
pub async fn bulk(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<UserId>,
    Json(body): Json<BulkBody>,
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

    let changes: Vec<GrantChange> = body
        .grants
        .into_iter()
        .map(|entry| GrantChange {
            permission_id: entry.permission_id,
            is_granted: entry.is_granted,
            expires_at: entry.expires_at,
            conditions: entry.conditions,
            granted_by: Some(principal.user_id()),
        })
        .collect();
    let applied = changes.len();

    match services
        .access
        .bulk_direct_grants(user_id, body.workspace_id, body.company_id, changes)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "applied": applied })),
        )
            .into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// GET /users/:user_id/permissions/effective - the aggregated effective set.
/// Self-inspection is always allowed; inspecting another user requires the
/// manage permission.
pub async fn effective(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<UserId>,
    Query(query): Query<EffectiveQuery>,
) -> axum::response::Response {
    if principal.user_id() != user_id {
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
    }

    match services
        .access
        .effective_permissions(user_id, query.workspace_id, query.company_id, query.mode)
        .await
    {
        Ok(entries) => match query.shape {
            Shape::Flat => (
                StatusCode::OK,
                Json(serde_json::json!({ "permissions": entries })),
            )
                .into_response(),
            Shape::Map => (
                StatusCode::OK,
                Json(serde_json::json!({ "permissions": to_permission_map(&entries) })),
            )
                .into_response(),
        },
        Err(e) => errors::access_error_to_response(e),
    }
}
