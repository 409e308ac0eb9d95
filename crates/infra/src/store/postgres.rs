//! Postgres-backed access store.
//!
//! Scope filtering is compiled into each query as a single predicate over
//! `(workspace_id, company_id)` with the inclusive flag bound as a parameter,
//! so exact and inclusive reads share one prepared statement.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate catalog code/name or grant key |
//! | Database (check constraint violation) | `23514` | `Conflict` | Role scope XOR check tripped |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / RowNotFound / Other | N/A | `Backend` | Connectivity, pool shutdown |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use async_trait::async_trait;

use atrium_auth::Action;
use atrium_core::{
    CompanyId, ModuleId, PermissionId, ResourceId, RoleId, Scope, ScopeMode, UserId, WorkspaceId,
};

use super::{
    AssignmentRecord, CatalogStore, CompanyRecord, DirectGrantRecord, DirectoryStore, GrantChange,
    GrantDetail, GrantStore, MemberRecord, ModuleRecord, PermissionRecord, ResourceKind,
    ResourceRecord, RoleGrantRecord, RoleRecord, StoreError, WorkspaceRecord,
};

/// Relational implementation of the access store traits.
///
/// Thread-safe: the pool is `Send + Sync` and every method runs its own
/// statement or transaction.
#[derive(Debug, Clone)]
pub struct PostgresAccessStore {
    pool: Arc<PgPool>,
}

impl PostgresAccessStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error and row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23514") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn decode_err(column: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Backend(format!("failed to decode column {column}: {err}"))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(|e| decode_err(column, e))
}

fn workspace_from_row(row: &PgRow) -> Result<WorkspaceRecord, StoreError> {
    Ok(WorkspaceRecord {
        id: WorkspaceId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        owner_user_id: UserId::from_uuid(get(row, "owner_user_id")?),
    })
}

fn company_from_row(row: &PgRow) -> Result<CompanyRecord, StoreError> {
    Ok(CompanyRecord {
        id: CompanyId::from_uuid(get(row, "id")?),
        workspace_id: WorkspaceId::from_uuid(get(row, "workspace_id")?),
        name: get(row, "name")?,
    })
}

fn member_from_row(row: &PgRow) -> Result<MemberRecord, StoreError> {
    let restricted: Option<Uuid> = get(row, "restricted_to_company_id")?;
    Ok(MemberRecord {
        workspace_id: WorkspaceId::from_uuid(get(row, "workspace_id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        restricted_to_company_id: restricted.map(CompanyId::from_uuid),
    })
}

fn module_from_row(row: &PgRow) -> Result<ModuleRecord, StoreError> {
    Ok(ModuleRecord {
        id: ModuleId::from_uuid(get(row, "id")?),
        code: get(row, "code")?,
        name: get(row, "name")?,
        is_core: get(row, "is_core")?,
        is_active: get(row, "is_active")?,
        deleted_at: get(row, "deleted_at")?,
    })
}

fn resource_from_row(row: &PgRow) -> Result<ResourceRecord, StoreError> {
    let kind: String = get(row, "kind")?;
    let parent: Option<Uuid> = get(row, "parent_resource_id")?;
    Ok(ResourceRecord {
        id: ResourceId::from_uuid(get(row, "id")?),
        module_id: ModuleId::from_uuid(get(row, "module_id")?),
        code: get(row, "code")?,
        name: get(row, "name")?,
        kind: kind.parse::<ResourceKind>().map_err(|e| decode_err("kind", e))?,
        parent_resource_id: parent.map(ResourceId::from_uuid),
        is_active: get(row, "is_active")?,
        is_public: get(row, "is_public")?,
        requires_approval: get(row, "requires_approval")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<PermissionRecord, StoreError> {
    let action: String = get(row, "action")?;
    Ok(PermissionRecord {
        id: PermissionId::from_uuid(get(row, "id")?),
        resource_id: ResourceId::from_uuid(get(row, "resource_id")?),
        action: action.parse::<Action>().map_err(|e| decode_err("action", e))?,
        name: get(row, "name")?,
        display_name: get(row, "display_name")?,
        is_active: get(row, "is_active")?,
        conditions: get(row, "conditions")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<RoleRecord, StoreError> {
    let workspace: Option<Uuid> = get(row, "workspace_id")?;
    let company: Option<Uuid> = get(row, "company_id")?;
    Ok(RoleRecord {
        id: RoleId::from_uuid(get(row, "id")?),
        code: get(row, "code")?,
        name: get(row, "name")?,
        workspace_id: workspace.map(WorkspaceId::from_uuid),
        company_id: company.map(CompanyId::from_uuid),
        is_system: get(row, "is_system")?,
        is_active: get(row, "is_active")?,
        deleted_at: get(row, "deleted_at")?,
    })
}

fn role_grant_from_row(row: &PgRow) -> Result<RoleGrantRecord, StoreError> {
    let company: Option<Uuid> = get(row, "company_id")?;
    let granted_by: Option<Uuid> = get(row, "granted_by")?;
    Ok(RoleGrantRecord {
        role_id: RoleId::from_uuid(get(row, "role_id")?),
        permission_id: PermissionId::from_uuid(get(row, "permission_id")?),
        workspace_id: WorkspaceId::from_uuid(get(row, "workspace_id")?),
        company_id: company.map(CompanyId::from_uuid),
        is_granted: get(row, "is_granted")?,
        expires_at: get(row, "expires_at")?,
        conditions: get(row, "conditions")?,
        granted_by: granted_by.map(UserId::from_uuid),
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn direct_grant_from_row(row: &PgRow) -> Result<DirectGrantRecord, StoreError> {
    let company: Option<Uuid> = get(row, "company_id")?;
    let granted_by: Option<Uuid> = get(row, "granted_by")?;
    Ok(DirectGrantRecord {
        user_id: UserId::from_uuid(get(row, "user_id")?),
        permission_id: PermissionId::from_uuid(get(row, "permission_id")?),
        workspace_id: WorkspaceId::from_uuid(get(row, "workspace_id")?),
        company_id: company.map(CompanyId::from_uuid),
        is_granted: get(row, "is_granted")?,
        expires_at: get(row, "expires_at")?,
        conditions: get(row, "conditions")?,
        granted_by: granted_by.map(UserId::from_uuid),
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn assignment_from_row(row: &PgRow) -> Result<AssignmentRecord, StoreError> {
    let company: Option<Uuid> = get(row, "company_id")?;
    let assigned_by: Option<Uuid> = get(row, "assigned_by")?;
    Ok(AssignmentRecord {
        user_id: UserId::from_uuid(get(row, "user_id")?),
        role_id: RoleId::from_uuid(get(row, "role_id")?),
        workspace_id: WorkspaceId::from_uuid(get(row, "workspace_id")?),
        company_id: company.map(CompanyId::from_uuid),
        is_active: get(row, "is_active")?,
        assigned_by: assigned_by.map(UserId::from_uuid),
        assigned_at: get(row, "assigned_at")?,
    })
}

fn grant_detail_from_row(row: &PgRow) -> Result<GrantDetail, StoreError> {
    let action: String = get(row, "action")?;
    Ok(GrantDetail {
        permission_id: PermissionId::from_uuid(get(row, "permission_id")?),
        permission_name: get(row, "permission_name")?,
        display_name: get(row, "display_name")?,
        action: action.parse::<Action>().map_err(|e| decode_err("action", e))?,
        module_code: get(row, "module_code")?,
        module_name: get(row, "module_name")?,
        resource_code: get(row, "resource_code")?,
        resource_name: get(row, "resource_name")?,
        is_granted: get(row, "is_granted")?,
        expires_at: get(row, "expires_at")?,
    })
}

fn scope_binds(scope: &Scope, mode: ScopeMode) -> (Uuid, Option<Uuid>, bool) {
    (
        *scope.workspace_id.as_uuid(),
        scope.company_id.map(|c| *c.as_uuid()),
        matches!(mode, ScopeMode::Inclusive),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// DirectoryStore
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl DirectoryStore for PostgresAccessStore {
    async fn workspace(&self, id: WorkspaceId) -> Result<Option<WorkspaceRecord>, StoreError> {
        let row = sqlx::query("SELECT id, name, owner_user_id FROM workspaces WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("workspace", e))?;
        row.as_ref().map(workspace_from_row).transpose()
    }

    async fn company(&self, id: CompanyId) -> Result<Option<CompanyRecord>, StoreError> {
        let row = sqlx::query("SELECT id, workspace_id, name FROM companies WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("company", e))?;
        row.as_ref().map(company_from_row).transpose()
    }

    async fn member(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<Option<MemberRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT workspace_id, user_id, restricted_to_company_id
            FROM workspace_members
            WHERE workspace_id = $1 AND user_id = $2
            "#,
        )
        .bind(workspace_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("member", e))?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn insert_workspace(&self, record: WorkspaceRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workspaces (id, name, owner_user_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name,
                owner_user_id = EXCLUDED.owner_user_id
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.name)
        .bind(record.owner_user_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_workspace", e))?;
        Ok(())
    }

    async fn insert_company(&self, record: CompanyRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO companies (id, workspace_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.workspace_id.as_uuid())
        .bind(&record.name)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_company", e))?;
        Ok(())
    }

    async fn upsert_member(&self, record: MemberRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workspace_members (workspace_id, user_id, restricted_to_company_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (workspace_id, user_id)
            DO UPDATE SET restricted_to_company_id = EXCLUDED.restricted_to_company_id
            "#,
        )
        .bind(record.workspace_id.as_uuid())
        .bind(record.user_id.as_uuid())
        .bind(record.restricted_to_company_id.map(|c| *c.as_uuid()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_member", e))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CatalogStore
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl CatalogStore for PostgresAccessStore {
    async fn module(&self, id: ModuleId) -> Result<Option<ModuleRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, code, name, is_core, is_active, deleted_at FROM modules WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("module", e))?;
        row.as_ref().map(module_from_row).transpose()
    }

    async fn resource(&self, id: ResourceId) -> Result<Option<ResourceRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, module_id, code, name, kind, parent_resource_id,
                   is_active, is_public, requires_approval
            FROM resources
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("resource", e))?;
        row.as_ref().map(resource_from_row).transpose()
    }

    async fn permission(&self, id: PermissionId) -> Result<Option<PermissionRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, resource_id, action, name, display_name, is_active, conditions
            FROM permissions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permission", e))?;
        row.as_ref().map(permission_from_row).transpose()
    }

    async fn permissions_by_ids(
        &self,
        ids: &[PermissionId],
    ) -> Result<Vec<PermissionRecord>, StoreError> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, resource_id, action, name, display_name, is_active, conditions
            FROM permissions
            WHERE id = ANY($1)
            "#,
        )
        .bind(&uuids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permissions_by_ids", e))?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn role(&self, id: RoleId) -> Result<Option<RoleRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, code, name, workspace_id, company_id, is_system, is_active, deleted_at
            FROM roles
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self, record), fields(module_id = %record.id), err)]
    async fn insert_module(&self, record: ModuleRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO modules (id, code, name, is_core, is_active, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.code)
        .bind(&record.name)
        .bind(record.is_core)
        .bind(record.is_active)
        .bind(record.deleted_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_module", e))?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(resource_id = %record.id), err)]
    async fn insert_resource(&self, record: ResourceRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO resources
                (id, module_id, code, name, kind, parent_resource_id,
                 is_active, is_public, requires_approval)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.module_id.as_uuid())
        .bind(&record.code)
        .bind(&record.name)
        .bind(record.kind.as_str())
        .bind(record.parent_resource_id.map(|p| *p.as_uuid()))
        .bind(record.is_active)
        .bind(record.is_public)
        .bind(record.requires_approval)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_resource", e))?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(permission_id = %record.id), err)]
    async fn insert_permission(&self, record: PermissionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO permissions
                (id, resource_id, action, name, display_name, is_active, conditions)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.resource_id.as_uuid())
        .bind(record.action.as_str())
        .bind(&record.name)
        .bind(&record.display_name)
        .bind(record.is_active)
        .bind(record.conditions)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_permission", e))?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(role_id = %record.id), err)]
    async fn insert_role(&self, record: RoleRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO roles
                (id, code, name, workspace_id, company_id, is_system, is_active, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.code)
        .bind(&record.name)
        .bind(record.workspace_id.map(|w| *w.as_uuid()))
        .bind(record.company_id.map(|c| *c.as_uuid()))
        .bind(record.is_system)
        .bind(record.is_active)
        .bind(record.deleted_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        Ok(())
    }

    async fn set_module_active(&self, id: ModuleId, active: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE modules SET is_active = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(active)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_module_active", e))?;
        Ok(())
    }

    async fn set_role_active(&self, id: RoleId, active: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE roles SET is_active = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(active)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_role_active", e))?;
        Ok(())
    }

    async fn soft_delete_role(&self, id: RoleId, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE roles SET deleted_at = $2, is_active = FALSE WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("soft_delete_role", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn deactivate_nonoperational_permissions(&self) -> Result<u64, StoreError> {
        let allowed: Vec<&str> = Action::OPERATIONAL.iter().map(Action::as_str).collect();
        let result = sqlx::query(
            "UPDATE permissions SET is_active = FALSE WHERE is_active AND NOT (action = ANY($1))",
        )
        .bind(&allowed)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate_nonoperational_permissions", e))?;
        Ok(result.rows_affected())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GrantStore
// ─────────────────────────────────────────────────────────────────────────────

// The scope predicate duplicated across the queries below. With Exact mode
// the inclusive flag is bound FALSE and the last arm is dead; with Inclusive
// mode workspace-wide rows ($co IS NULL) also match a company-level read.
//
//   workspace_id = $ws AND (
//       ($co::uuid IS NULL AND company_id IS NULL)
//       OR company_id = $co
//       OR ($inc AND $co::uuid IS NOT NULL AND company_id IS NULL)
//   )

#[async_trait]
impl GrantStore for PostgresAccessStore {
    async fn active_assignments(
        &self,
        user_id: UserId,
        scope: &Scope,
        mode: ScopeMode,
    ) -> Result<Vec<AssignmentRecord>, StoreError> {
        let (ws, co, inc) = scope_binds(scope, mode);
        let rows = sqlx::query(
            r#"
            SELECT user_id, role_id, workspace_id, company_id, is_active,
                   assigned_by, assigned_at
            FROM role_assignments
            WHERE user_id = $1 AND is_active
              AND workspace_id = $2
              AND (($3::uuid IS NULL AND company_id IS NULL)
                   OR company_id = $3
                   OR ($4 AND $3::uuid IS NOT NULL AND company_id IS NULL))
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(ws)
        .bind(co)
        .bind(inc)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_assignments", e))?;
        rows.iter().map(assignment_from_row).collect()
    }

    #[instrument(skip(self, role_ids), fields(role_count = role_ids.len()), err)]
    async fn role_grant_details(
        &self,
        role_ids: &[RoleId],
        scope: &Scope,
        mode: ScopeMode,
    ) -> Result<Vec<GrantDetail>, StoreError> {
        let ids: Vec<Uuid> = role_ids.iter().map(|id| *id.as_uuid()).collect();
        let (ws, co, inc) = scope_binds(scope, mode);
        let rows = sqlx::query(
            r#"
            SELECT g.permission_id,
                   p.name AS permission_name,
                   p.display_name,
                   p.action,
                   m.code AS module_code,
                   m.name AS module_name,
                   r.code AS resource_code,
                   r.name AS resource_name,
                   g.is_granted,
                   g.expires_at
            FROM role_permission_grants g
            JOIN permissions p ON p.id = g.permission_id
            JOIN resources r ON r.id = p.resource_id
            JOIN modules m ON m.id = r.module_id
            WHERE g.role_id = ANY($1)
              AND g.workspace_id = $2
              AND (($3::uuid IS NULL AND g.company_id IS NULL)
                   OR g.company_id = $3
                   OR ($4 AND $3::uuid IS NOT NULL AND g.company_id IS NULL))
            "#,
        )
        .bind(&ids)
        .bind(ws)
        .bind(co)
        .bind(inc)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role_grant_details", e))?;
        rows.iter().map(grant_detail_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn direct_grant_details(
        &self,
        user_id: UserId,
        scope: &Scope,
        mode: ScopeMode,
    ) -> Result<Vec<GrantDetail>, StoreError> {
        let (ws, co, inc) = scope_binds(scope, mode);
        let rows = sqlx::query(
            r#"
            SELECT g.permission_id,
                   p.name AS permission_name,
                   p.display_name,
                   p.action,
                   m.code AS module_code,
                   m.name AS module_name,
                   r.code AS resource_code,
                   r.name AS resource_name,
                   g.is_granted,
                   g.expires_at
            FROM user_permission_grants g
            JOIN permissions p ON p.id = g.permission_id
            JOIN resources r ON r.id = p.resource_id
            JOIN modules m ON m.id = r.module_id
            WHERE g.user_id = $1
              AND g.workspace_id = $2
              AND (($3::uuid IS NULL AND g.company_id IS NULL)
                   OR g.company_id = $3
                   OR ($4 AND $3::uuid IS NOT NULL AND g.company_id IS NULL))
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(ws)
        .bind(co)
        .bind(inc)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("direct_grant_details", e))?;
        rows.iter().map(grant_detail_from_row).collect()
    }

    #[instrument(skip(self, change), fields(role_id = %role_id, permission_id = %change.permission_id), err)]
    async fn upsert_role_grant(
        &self,
        role_id: RoleId,
        scope: &Scope,
        change: &GrantChange,
    ) -> Result<RoleGrantRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let record = upsert_role_grant_in(&mut tx, role_id, scope, change).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }

    #[instrument(skip(self, change), fields(user_id = %user_id, permission_id = %change.permission_id), err)]
    async fn upsert_direct_grant(
        &self,
        user_id: UserId,
        scope: &Scope,
        change: &GrantChange,
    ) -> Result<DirectGrantRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let record = upsert_direct_grant_in(&mut tx, user_id, scope, change).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }

    #[instrument(skip(self, changes), fields(user_id = %user_id, change_count = changes.len()), err)]
    async fn bulk_upsert_direct_grants(
        &self,
        user_id: UserId,
        scope: &Scope,
        changes: &[GrantChange],
    ) -> Result<(), StoreError> {
        // All-or-nothing: one transaction for the whole batch.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        for change in changes {
            upsert_direct_grant_in(&mut tx, user_id, scope, change).await?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn delete_direct_grant(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
        scope: &Scope,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM user_permission_grants
            WHERE user_id = $1 AND permission_id = $2 AND workspace_id = $3
              AND company_id IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(permission_id.as_uuid())
        .bind(scope.workspace_id.as_uuid())
        .bind(scope.company_id.map(|c| *c.as_uuid()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_direct_grant", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_assignment(&self, record: AssignmentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO role_assignments
                (user_id, role_id, workspace_id, company_id, is_active, assigned_by, assigned_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, role_id, workspace_id, company_id)
            DO UPDATE SET is_active = EXCLUDED.is_active,
                assigned_by = EXCLUDED.assigned_by,
                assigned_at = EXCLUDED.assigned_at
            "#,
        )
        .bind(record.user_id.as_uuid())
        .bind(record.role_id.as_uuid())
        .bind(record.workspace_id.as_uuid())
        .bind(record.company_id.map(|c| *c.as_uuid()))
        .bind(record.is_active)
        .bind(record.assigned_by.map(|u| *u.as_uuid()))
        .bind(record.assigned_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_assignment", e))?;
        Ok(())
    }

    async fn deactivate_assignment(
        &self,
        user_id: UserId,
        role_id: RoleId,
        scope: &Scope,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE role_assignments SET is_active = FALSE
            WHERE user_id = $1 AND role_id = $2 AND workspace_id = $3
              AND company_id IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(role_id.as_uuid())
        .bind(scope.workspace_id.as_uuid())
        .bind(scope.company_id.map(|c| *c.as_uuid()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate_assignment", e))?;
        Ok(result.rows_affected() > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactional upsert helpers
// ─────────────────────────────────────────────────────────────────────────────

// Select-then-write under the transaction; the NULLS NOT DISTINCT unique key
// on the grant tables catches the race where two transactions insert the same
// key concurrently (mapped to `Conflict` via 23505).

async fn upsert_role_grant_in(
    tx: &mut Transaction<'_, Postgres>,
    role_id: RoleId,
    scope: &Scope,
    change: &GrantChange,
) -> Result<RoleGrantRecord, StoreError> {
    let company = scope.company_id.map(|c| *c.as_uuid());

    let existing = sqlx::query(
        r#"
        SELECT 1 AS present FROM role_permission_grants
        WHERE role_id = $1 AND permission_id = $2 AND workspace_id = $3
          AND company_id IS NOT DISTINCT FROM $4
        FOR UPDATE
        "#,
    )
    .bind(role_id.as_uuid())
    .bind(change.permission_id.as_uuid())
    .bind(scope.workspace_id.as_uuid())
    .bind(company)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("select_role_grant", e))?;

    let row = if existing.is_some() {
        sqlx::query(
            r#"
            UPDATE role_permission_grants
            SET is_granted = $5, expires_at = $6, conditions = $7, granted_by = $8,
                updated_at = NOW()
            WHERE role_id = $1 AND permission_id = $2 AND workspace_id = $3
              AND company_id IS NOT DISTINCT FROM $4
            RETURNING role_id, permission_id, workspace_id, company_id, is_granted,
                      expires_at, conditions, granted_by, created_at, updated_at
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(change.permission_id.as_uuid())
        .bind(scope.workspace_id.as_uuid())
        .bind(company)
        .bind(change.is_granted)
        .bind(change.expires_at)
        .bind(&change.conditions)
        .bind(change.granted_by.map(|u| *u.as_uuid()))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_role_grant", e))?
    } else {
        sqlx::query(
            r#"
            INSERT INTO role_permission_grants
                (role_id, permission_id, workspace_id, company_id, is_granted,
                 expires_at, conditions, granted_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING role_id, permission_id, workspace_id, company_id, is_granted,
                      expires_at, conditions, granted_by, created_at, updated_at
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(change.permission_id.as_uuid())
        .bind(scope.workspace_id.as_uuid())
        .bind(company)
        .bind(change.is_granted)
        .bind(change.expires_at)
        .bind(&change.conditions)
        .bind(change.granted_by.map(|u| *u.as_uuid()))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role_grant", e))?
    };

    role_grant_from_row(&row)
}

async fn upsert_direct_grant_in(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
    scope: &Scope,
    change: &GrantChange,
) -> Result<DirectGrantRecord, StoreError> {
    let company = scope.company_id.map(|c| *c.as_uuid());

    let existing = sqlx::query(
        r#"
        SELECT 1 AS present FROM user_permission_grants
        WHERE user_id = $1 AND permission_id = $2 AND workspace_id = $3
          AND company_id IS NOT DISTINCT FROM $4
        FOR UPDATE
        "#,
    )
    .bind(user_id.as_uuid())
    .bind(change.permission_id.as_uuid())
    .bind(scope.workspace_id.as_uuid())
    .bind(company)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("select_direct_grant", e))?;

    let row = if existing.is_some() {
        sqlx::query(
            r#"
            UPDATE user_permission_grants
            SET is_granted = $5, expires_at = $6, conditions = $7, granted_by = $8,
                updated_at = NOW()
            WHERE user_id = $1 AND permission_id = $2 AND workspace_id = $3
              AND company_id IS NOT DISTINCT FROM $4
            RETURNING user_id, permission_id, workspace_id, company_id, is_granted,
                      expires_at, conditions, granted_by, created_at, updated_at
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(change.permission_id.as_uuid())
        .bind(scope.workspace_id.as_uuid())
        .bind(company)
        .bind(change.is_granted)
        .bind(change.expires_at)
        .bind(&change.conditions)
        .bind(change.granted_by.map(|u| *u.as_uuid()))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_direct_grant", e))?
    } else {
        sqlx::query(
            r#"
            INSERT INTO user_permission_grants
                (user_id, permission_id, workspace_id, company_id, is_granted,
                 expires_at, conditions, granted_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING user_id, permission_id, workspace_id, company_id, is_granted,
                      expires_at, conditions, granted_by, created_at, updated_at
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(change.permission_id.as_uuid())
        .bind(scope.workspace_id.as_uuid())
        .bind(company)
        .bind(change.is_granted)
        .bind(change.expires_at)
        .bind(&change.conditions)
        .bind(change.granted_by.map(|u| *u.as_uuid()))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_direct_grant", e))?
    };

    direct_grant_from_row(&row)
}
