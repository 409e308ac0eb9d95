//! Schema bootstrap for the Postgres backend.
//!
//! Idempotent DDL, applied with [`ensure_schema`] at startup. Requires
//! PostgreSQL 15+ for `UNIQUE NULLS NOT DISTINCT` (the grant and assignment
//! keys treat a NULL company as one value, so workspace-wide rows cannot be
//! duplicated).

use sqlx::PgPool;

use super::{postgres::PostgresAccessStore, StoreError};

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS workspaces (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    owner_user_id UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS companies (
    id UUID PRIMARY KEY,
    workspace_id UUID NOT NULL REFERENCES workspaces(id),
    name TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS workspace_members (
    workspace_id UUID NOT NULL REFERENCES workspaces(id),
    user_id UUID NOT NULL,
    restricted_to_company_id UUID REFERENCES companies(id),
    PRIMARY KEY (workspace_id, user_id)
);

CREATE TABLE IF NOT EXISTS modules (
    id UUID PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    is_core BOOLEAN NOT NULL DEFAULT FALSE,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    deleted_at TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS resources (
    id UUID PRIMARY KEY,
    module_id UUID NOT NULL REFERENCES modules(id),
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    parent_resource_id UUID REFERENCES resources(id),
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    is_public BOOLEAN NOT NULL DEFAULT FALSE,
    requires_approval BOOLEAN NOT NULL DEFAULT FALSE,
    UNIQUE (module_id, code)
);

CREATE TABLE IF NOT EXISTS permissions (
    id UUID PRIMARY KEY,
    resource_id UUID NOT NULL REFERENCES resources(id),
    action TEXT NOT NULL,
    name TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    conditions JSONB,
    UNIQUE (resource_id, action)
);

CREATE TABLE IF NOT EXISTS roles (
    id UUID PRIMARY KEY,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    workspace_id UUID REFERENCES workspaces(id),
    company_id UUID REFERENCES companies(id),
    is_system BOOLEAN NOT NULL DEFAULT FALSE,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    deleted_at TIMESTAMPTZ,
    CHECK ((workspace_id IS NULL) <> (company_id IS NULL))
);

CREATE TABLE IF NOT EXISTS role_permission_grants (
    role_id UUID NOT NULL REFERENCES roles(id),
    permission_id UUID NOT NULL REFERENCES permissions(id),
    workspace_id UUID NOT NULL REFERENCES workspaces(id),
    company_id UUID REFERENCES companies(id),
    is_granted BOOLEAN NOT NULL DEFAULT TRUE,
    expires_at TIMESTAMPTZ,
    conditions JSONB,
    granted_by UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE NULLS NOT DISTINCT (role_id, permission_id, workspace_id, company_id)
);

CREATE TABLE IF NOT EXISTS user_permission_grants (
    user_id UUID NOT NULL,
    permission_id UUID NOT NULL REFERENCES permissions(id),
    workspace_id UUID NOT NULL REFERENCES workspaces(id),
    company_id UUID REFERENCES companies(id),
    is_granted BOOLEAN NOT NULL DEFAULT TRUE,
    expires_at TIMESTAMPTZ,
    conditions JSONB,
    granted_by UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE NULLS NOT DISTINCT (user_id, permission_id, workspace_id, company_id)
);

CREATE TABLE IF NOT EXISTS role_assignments (
    user_id UUID NOT NULL,
    role_id UUID NOT NULL REFERENCES roles(id),
    workspace_id UUID NOT NULL REFERENCES workspaces(id),
    company_id UUID REFERENCES companies(id),
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    assigned_by UUID,
    assigned_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE NULLS NOT DISTINCT (user_id, role_id, workspace_id, company_id)
);

CREATE INDEX IF NOT EXISTS idx_role_assignments_user
    ON role_assignments (user_id, workspace_id) WHERE is_active;
CREATE INDEX IF NOT EXISTS idx_role_grants_role
    ON role_permission_grants (role_id, workspace_id);
CREATE INDEX IF NOT EXISTS idx_user_grants_user
    ON user_permission_grants (user_id, workspace_id);
"#;

/// Apply the schema (no-op when already present) and return a store over
/// the pool.
pub async fn ensure_schema(pool: PgPool) -> Result<PostgresAccessStore, StoreError> {
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Backend(format!("schema bootstrap failed: {e}")))?;
    Ok(PostgresAccessStore::new(pool))
}
