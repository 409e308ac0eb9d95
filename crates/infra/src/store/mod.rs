//! Relational storage boundary for the access-control engine.
//!
//! Two implementations exist, behind the same traits:
//! - [`InMemoryAccessStore`] for tests and development,
//! - `PostgresAccessStore` (feature `postgres`) for production.
//!
//! The traits are deliberately dumb: scope filtering and raw row access only.
//! Revocation/expiry filtering, precondition checks, and protection
//! invariants live in the engine layer ([`crate::aggregator`],
//! [`crate::service`]) so both backends share one set of semantics.

use core::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use atrium_auth::Action;
use atrium_core::{
    CompanyId, DomainError, ModuleId, PermissionId, ResourceId, RoleId, Scope, ScopeMode, UserId,
    WorkspaceId,
};

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod schema;

pub use in_memory::InMemoryAccessStore;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Store operation error.
///
/// These are **infrastructure** failures (connectivity, constraint surprises,
/// poisoned locks) as opposed to domain failures (validation, authorization).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("store conflict: {0}")]
    Conflict(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory records (workspaces, companies, memberships)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub id: WorkspaceId,
    pub name: String,
    /// The owning identity; satisfies any access requirement in this workspace.
    pub owner_user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: CompanyId,
    pub workspace_id: WorkspaceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    /// Typed company restriction (replaces the legacy membership JSON blob).
    pub restricted_to_company_id: Option<CompanyId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog records (modules, resources, permissions, roles)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub code: String,
    pub name: String,
    /// Core modules reject destructive mutation unconditionally.
    pub is_core: bool,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The seven addressable kinds of resource a module can expose.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Page,
    Api,
    Feature,
    Report,
    Action,
    Widget,
    /// A nested grouping of resources.
    Submodule,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Page => "page",
            ResourceKind::Api => "api",
            ResourceKind::Feature => "feature",
            ResourceKind::Report => "report",
            ResourceKind::Action => "action",
            ResourceKind::Widget => "widget",
            ResourceKind::Submodule => "submodule",
        }
    }
}

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page" => Ok(ResourceKind::Page),
            "api" => Ok(ResourceKind::Api),
            "feature" => Ok(ResourceKind::Feature),
            "report" => Ok(ResourceKind::Report),
            "action" => Ok(ResourceKind::Action),
            "widget" => Ok(ResourceKind::Widget),
            "submodule" => Ok(ResourceKind::Submodule),
            other => Err(DomainError::validation(format!(
                "unknown resource kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub module_id: ModuleId,
    pub code: String,
    pub name: String,
    pub kind: ResourceKind,
    /// Self-referential tree; a parent must belong to the same module
    /// (validated at write time by the engine).
    pub parent_resource_id: Option<ResourceId>,
    pub is_active: bool,
    pub is_public: bool,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub id: PermissionId,
    pub resource_id: ResourceId,
    pub action: Action,
    /// Globally unique (e.g. "hr.reports.view").
    pub name: String,
    pub display_name: String,
    pub is_active: bool,
    /// Stored, never evaluated by the engine.
    pub conditions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: RoleId,
    pub code: String,
    pub name: String,
    /// Exactly one of `workspace_id` / `company_id` is set (XOR, enforced at
    /// creation and by a database CHECK).
    pub workspace_id: Option<WorkspaceId>,
    pub company_id: Option<CompanyId>,
    /// System roles reject delete/deactivate unconditionally.
    pub is_system: bool,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RoleRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Grant / assignment records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrantRecord {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
    /// Explicit revocation support: `false` means revoked-but-present.
    pub is_granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub conditions: Option<serde_json::Value>,
    pub granted_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectGrantRecord {
    pub user_id: UserId,
    pub permission_id: PermissionId,
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
    pub is_granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub conditions: Option<serde_json::Value>,
    pub granted_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
    pub is_active: bool,
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
}

/// A grant row joined to its catalog metadata, as the aggregator consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDetail {
    pub permission_id: PermissionId,
    pub permission_name: String,
    pub display_name: String,
    pub action: Action,
    pub module_code: String,
    pub module_name: String,
    pub resource_code: String,
    pub resource_name: String,
    pub is_granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One grant change for the upsert paths (single and bulk).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantChange {
    pub permission_id: PermissionId,
    pub is_granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub conditions: Option<serde_json::Value>,
    pub granted_by: Option<UserId>,
}

impl GrantChange {
    /// A plain grant with defaults (`is_granted = true`, no expiry).
    pub fn grant(permission_id: PermissionId, granted_by: Option<UserId>) -> Self {
        Self {
            permission_id,
            is_granted: true,
            expires_at: None,
            conditions: None,
            granted_by,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Workspace/company/membership lookups (the scope entities this engine
/// reads; their CRUD surfaces live elsewhere).
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn workspace(&self, id: WorkspaceId) -> Result<Option<WorkspaceRecord>, StoreError>;
    async fn company(&self, id: CompanyId) -> Result<Option<CompanyRecord>, StoreError>;
    async fn member(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<Option<MemberRecord>, StoreError>;

    async fn insert_workspace(&self, record: WorkspaceRecord) -> Result<(), StoreError>;
    async fn insert_company(&self, record: CompanyRecord) -> Result<(), StoreError>;
    async fn upsert_member(&self, record: MemberRecord) -> Result<(), StoreError>;
}

/// Module/resource/permission/role catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn module(&self, id: ModuleId) -> Result<Option<ModuleRecord>, StoreError>;
    async fn resource(&self, id: ResourceId) -> Result<Option<ResourceRecord>, StoreError>;
    async fn permission(&self, id: PermissionId) -> Result<Option<PermissionRecord>, StoreError>;
    async fn permissions_by_ids(
        &self,
        ids: &[PermissionId],
    ) -> Result<Vec<PermissionRecord>, StoreError>;
    async fn role(&self, id: RoleId) -> Result<Option<RoleRecord>, StoreError>;

    async fn insert_module(&self, record: ModuleRecord) -> Result<(), StoreError>;
    async fn insert_resource(&self, record: ResourceRecord) -> Result<(), StoreError>;
    async fn insert_permission(&self, record: PermissionRecord) -> Result<(), StoreError>;
    async fn insert_role(&self, record: RoleRecord) -> Result<(), StoreError>;

    async fn set_module_active(&self, id: ModuleId, active: bool) -> Result<(), StoreError>;
    async fn set_role_active(&self, id: RoleId, active: bool) -> Result<(), StoreError>;
    async fn soft_delete_role(&self, id: RoleId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Deactivate active permissions whose action is outside the operational
    /// allow-list. Returns how many rows were touched.
    async fn deactivate_nonoperational_permissions(&self) -> Result<u64, StoreError>;
}

/// Grant and assignment storage.
///
/// All reads are scope-filtered via [`Scope::admits`] (or its SQL
/// equivalent); they return revoked/expired rows as stored so listing
/// surfaces can show them — the aggregator filters for effectiveness.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn active_assignments(
        &self,
        user_id: UserId,
        scope: &Scope,
        mode: ScopeMode,
    ) -> Result<Vec<AssignmentRecord>, StoreError>;

    /// Joined role-derived grant rows for a set of roles.
    async fn role_grant_details(
        &self,
        role_ids: &[RoleId],
        scope: &Scope,
        mode: ScopeMode,
    ) -> Result<Vec<GrantDetail>, StoreError>;

    /// Joined direct grant rows for one user.
    async fn direct_grant_details(
        &self,
        user_id: UserId,
        scope: &Scope,
        mode: ScopeMode,
    ) -> Result<Vec<GrantDetail>, StoreError>;

    /// Upsert on the full scope key (role, permission, workspace,
    /// company-or-null). Never creates a duplicate row; updates advance
    /// `updated_at`.
    async fn upsert_role_grant(
        &self,
        role_id: RoleId,
        scope: &Scope,
        change: &GrantChange,
    ) -> Result<RoleGrantRecord, StoreError>;

    /// Same as [`Self::upsert_role_grant`] keyed by user.
    async fn upsert_direct_grant(
        &self,
        user_id: UserId,
        scope: &Scope,
        change: &GrantChange,
    ) -> Result<DirectGrantRecord, StoreError>;

    /// Apply a batch of direct-grant changes atomically (single transaction
    /// in the relational backend).
    async fn bulk_upsert_direct_grants(
        &self,
        user_id: UserId,
        scope: &Scope,
        changes: &[GrantChange],
    ) -> Result<(), StoreError>;

    /// Remove a stored direct-grant row outright (administrative cleanup,
    /// distinct from revocation). Returns whether a row existed.
    async fn delete_direct_grant(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
        scope: &Scope,
    ) -> Result<bool, StoreError>;

    async fn upsert_assignment(&self, record: AssignmentRecord) -> Result<(), StoreError>;

    /// Flip an assignment inactive. Returns whether a matching row existed.
    async fn deactivate_assignment(
        &self,
        user_id: UserId,
        role_id: RoleId,
        scope: &Scope,
    ) -> Result<bool, StoreError>;
}

/// The full storage surface the engine needs, as one object-safe bound.
pub trait AccessStore: DirectoryStore + CatalogStore + GrantStore {}

impl<T: DirectoryStore + CatalogStore + GrantStore> AccessStore for T {}
