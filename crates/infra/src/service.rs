//! `AccessService`: the mutation and decision surface over the store.
//!
//! All preconditions and protection invariants live here, so both store
//! backends get identical semantics:
//! - grant/assignment mutations verify role, permission, and scope first;
//! - system roles and core modules reject destructive mutation
//!   unconditionally, owner or not;
//! - the bulk path validates every permission id before a single write.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use atrium_auth::{
    AccessFacts, AccessRequirement, Decision, MembershipScope, RoleCode, WorkspaceMembership,
};
use atrium_core::{
    CompanyId, DomainError, ModuleId, PermissionId, ResourceId, RoleId, Scope, ScopeMode, UserId,
    WorkspaceId,
};

use crate::aggregator::{EffectivePermission, effective_permissions};
use crate::resolver::{ResolveError, resolve_scope};
use crate::store::{
    AccessStore, AssignmentRecord, CatalogStore, DirectoryStore, GrantChange, GrantDetail,
    GrantStore, ModuleRecord, PermissionRecord, ResourceKind, ResourceRecord, RoleGrantRecord,
    RoleRecord, StoreError,
};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("invalid or inactive permission ids in batch")]
    InvalidPermissions { invalid: Vec<PermissionId> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ResolveError> for AccessError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Store(e) => AccessError::Store(e),
            other => AccessError::Domain(DomainError::not_found(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────────────────────────

/// Role creation input. Exactly one of `workspace_id` / `company_id` must be
/// set.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub code: String,
    pub name: String,
    pub workspace_id: Option<WorkspaceId>,
    pub company_id: Option<CompanyId>,
    #[serde(default)]
    pub is_system: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewResource {
    pub module_id: ModuleId,
    pub code: String,
    pub name: String,
    pub kind: ResourceKind,
    pub parent_resource_id: Option<ResourceId>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPermission {
    pub resource_id: ResourceId,
    pub action: atrium_auth::Action,
    pub name: String,
    pub display_name: String,
    pub conditions: Option<serde_json::Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AccessService {
    store: Arc<dyn AccessStore>,
}

impl AccessService {
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        Self { store }
    }

    /// The underlying store (used by the HTTP layer for directory reads).
    pub fn store(&self) -> &Arc<dyn AccessStore> {
        &self.store
    }

    async fn resolve(
        &self,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
    ) -> Result<Scope, AccessError> {
        Ok(resolve_scope(self.store.as_ref(), workspace_id, company_id).await?)
    }

    // ── Decision ────────────────────────────────────────────────────────────

    /// Gather facts and run the decision state machine for `user_id` against
    /// `requirement` in the given scope.
    ///
    /// Fact gathering uses inclusive scope matching: a workspace-wide grant
    /// or assignment authorizes company-scoped operations.
    #[instrument(skip(self, requirement), fields(user_id = %user_id, workspace_id = %workspace_id))]
    pub async fn check_access(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
        requirement: &AccessRequirement,
    ) -> Result<Decision, AccessError> {
        let scope = self.resolve(workspace_id, company_id).await?;

        let workspace = self
            .store
            .workspace(workspace_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("workspace {workspace_id}")))?;
        let is_owner = workspace.owner_user_id == user_id;
        let member = self.store.member(workspace_id, user_id).await?;

        // The owner is a member by definition, with or without a member row.
        let membership = if is_owner || member.is_some() {
            Some(WorkspaceMembership {
                workspace_id,
                user_id,
                is_owner,
                scope: MembershipScope::from_restriction(
                    member.and_then(|m| m.restricted_to_company_id),
                ),
            })
        } else {
            None
        };

        let assignments = self
            .store
            .active_assignments(user_id, &scope, ScopeMode::Inclusive)
            .await?;
        let mut held_roles = Vec::with_capacity(assignments.len());
        for assignment in &assignments {
            if let Some(role) = self.store.role(assignment.role_id).await? {
                if role.is_active && !role.is_deleted() {
                    held_roles.push(RoleCode::new(role.code));
                }
            }
        }

        let effective =
            effective_permissions(self.store.as_ref(), user_id, &scope, ScopeMode::Inclusive)
                .await?;
        let granted: HashSet<String> = effective.into_iter().map(|e| e.name).collect();

        let facts = AccessFacts {
            membership: membership.as_ref(),
            scope: &scope,
            held_roles: &held_roles,
            granted_permissions: &granted,
        };
        Ok(atrium_auth::decide(&facts, requirement))
    }

    // ── Aggregation / listing ───────────────────────────────────────────────

    pub async fn effective_permissions(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
        mode: ScopeMode,
    ) -> Result<Vec<EffectivePermission>, AccessError> {
        let scope = self.resolve(workspace_id, company_id).await?;
        Ok(effective_permissions(self.store.as_ref(), user_id, &scope, mode).await?)
    }

    /// Stored grant rows for one role, including revoked and expired ones
    /// (administrative listing, not the effective set).
    pub async fn list_role_grants(
        &self,
        role_id: RoleId,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
    ) -> Result<Vec<GrantDetail>, AccessError> {
        self.require_role(role_id).await?;
        let scope = self.resolve(workspace_id, company_id).await?;
        Ok(self
            .store
            .role_grant_details(&[role_id], &scope, ScopeMode::Exact)
            .await?)
    }

    /// Stored direct-grant rows for one user, including revoked and expired
    /// ones.
    pub async fn list_direct_grants(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
    ) -> Result<Vec<GrantDetail>, AccessError> {
        let scope = self.resolve(workspace_id, company_id).await?;
        Ok(self
            .store
            .direct_grant_details(user_id, &scope, ScopeMode::Exact)
            .await?)
    }

    // ── Grant mutation ──────────────────────────────────────────────────────

    #[instrument(skip(self, change), fields(role_id = %role_id))]
    pub async fn upsert_role_grant(
        &self,
        role_id: RoleId,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
        change: GrantChange,
    ) -> Result<RoleGrantRecord, AccessError> {
        self.require_role(role_id).await?;
        self.require_permission(change.permission_id).await?;
        let scope = self.resolve(workspace_id, company_id).await?;
        Ok(self.store.upsert_role_grant(role_id, &scope, &change).await?)
    }

    #[instrument(skip(self, change), fields(user_id = %user_id))]
    pub async fn upsert_direct_grant(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
        change: GrantChange,
    ) -> Result<crate::store::DirectGrantRecord, AccessError> {
        self.require_permission(change.permission_id).await?;
        let scope = self.resolve(workspace_id, company_id).await?;
        Ok(self
            .store
            .upsert_direct_grant(user_id, &scope, &change)
            .await?)
    }

    /// Apply a batch of direct-grant changes atomically.
    ///
    /// Every permission id is validated (known and active) before any write;
    /// invalid ids fail the whole batch and are reported back.
    #[instrument(skip(self, changes), fields(user_id = %user_id, change_count = changes.len()))]
    pub async fn bulk_direct_grants(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
        changes: Vec<GrantChange>,
    ) -> Result<(), AccessError> {
        let scope = self.resolve(workspace_id, company_id).await?;

        let ids: Vec<PermissionId> = changes.iter().map(|c| c.permission_id).collect();
        let known = self.store.permissions_by_ids(&ids).await?;
        let active: HashSet<PermissionId> = known
            .iter()
            .filter(|p| p.is_active)
            .map(|p| p.id)
            .collect();
        let mut invalid: Vec<PermissionId> = ids
            .iter()
            .copied()
            .filter(|id| !active.contains(id))
            .collect();
        invalid.sort();
        invalid.dedup();
        if !invalid.is_empty() {
            return Err(AccessError::InvalidPermissions { invalid });
        }

        Ok(self
            .store
            .bulk_upsert_direct_grants(user_id, &scope, &changes)
            .await?)
    }

    /// Remove a stored direct-grant row outright (administrative cleanup,
    /// distinct from revocation).
    #[instrument(skip(self), fields(user_id = %user_id, permission_id = %permission_id))]
    pub async fn delete_direct_grant(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
    ) -> Result<(), AccessError> {
        let scope = self.resolve(workspace_id, company_id).await?;
        let removed = self
            .store
            .delete_direct_grant(user_id, permission_id, &scope)
            .await?;
        if !removed {
            return Err(DomainError::not_found(format!(
                "no stored grant of {permission_id} for {user_id} at {scope}"
            ))
            .into());
        }
        Ok(())
    }

    // ── Role assignment ─────────────────────────────────────────────────────

    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id))]
    pub async fn assign_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
        assigned_by: Option<UserId>,
    ) -> Result<(), AccessError> {
        let role = self.require_role(role_id).await?;
        if !role.is_active {
            return Err(DomainError::validation(format!("role {role_id} is inactive")).into());
        }
        let scope = self.resolve(workspace_id, company_id).await?;
        Ok(self
            .store
            .upsert_assignment(AssignmentRecord {
                user_id,
                role_id,
                workspace_id: scope.workspace_id,
                company_id: scope.company_id,
                is_active: true,
                assigned_by,
                assigned_at: Utc::now(),
            })
            .await?)
    }

    /// Revocation flips the assignment inactive rather than deleting it.
    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id))]
    pub async fn revoke_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
        workspace_id: WorkspaceId,
        company_id: Option<CompanyId>,
    ) -> Result<(), AccessError> {
        let scope = self.resolve(workspace_id, company_id).await?;
        let found = self
            .store
            .deactivate_assignment(user_id, role_id, &scope)
            .await?;
        if !found {
            return Err(DomainError::not_found(format!(
                "no assignment of role {role_id} for {user_id} at {scope}"
            ))
            .into());
        }
        Ok(())
    }

    // ── Catalog mutation ────────────────────────────────────────────────────

    /// Create a role scoped to exactly one of workspace / company.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_role(&self, input: NewRole) -> Result<RoleRecord, AccessError> {
        match (input.workspace_id, input.company_id) {
            (Some(workspace_id), None) => {
                if self.store.workspace(workspace_id).await?.is_none() {
                    return Err(
                        DomainError::not_found(format!("workspace {workspace_id}")).into(),
                    );
                }
            }
            (None, Some(company_id)) => {
                if self.store.company(company_id).await?.is_none() {
                    return Err(DomainError::not_found(format!("company {company_id}")).into());
                }
            }
            _ => {
                return Err(DomainError::validation(
                    "a role must be scoped to exactly one of workspace_id or company_id",
                )
                .into());
            }
        }

        let record = RoleRecord {
            id: RoleId::new(),
            code: input.code,
            name: input.name,
            workspace_id: input.workspace_id,
            company_id: input.company_id,
            is_system: input.is_system,
            is_active: true,
            deleted_at: None,
        };
        self.store.insert_role(record.clone()).await?;
        Ok(record)
    }

    #[instrument(skip(self), fields(role_id = %role_id))]
    pub async fn deactivate_role(&self, role_id: RoleId) -> Result<(), AccessError> {
        let role = self.require_role(role_id).await?;
        self.reject_system_role(&role)?;
        Ok(self.store.set_role_active(role_id, false).await?)
    }

    /// Soft delete: the row is retained with `deleted_at` set.
    #[instrument(skip(self), fields(role_id = %role_id))]
    pub async fn delete_role(&self, role_id: RoleId) -> Result<(), AccessError> {
        let role = self.require_role(role_id).await?;
        self.reject_system_role(&role)?;
        Ok(self.store.soft_delete_role(role_id, Utc::now()).await?)
    }

    #[instrument(skip(self), fields(module_id = %module_id))]
    pub async fn deactivate_module(&self, module_id: ModuleId) -> Result<(), AccessError> {
        let module = self
            .store
            .module(module_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("module {module_id}")))?;
        if module.is_core {
            return Err(DomainError::protected(format!(
                "module '{}' is a core module and cannot be deactivated",
                module.code
            ))
            .into());
        }
        Ok(self.store.set_module_active(module_id, false).await?)
    }

    /// Create a resource; a parent, when given, must belong to the same
    /// module.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_resource(&self, input: NewResource) -> Result<ResourceRecord, AccessError> {
        let module = self
            .store
            .module(input.module_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("module {}", input.module_id)))?;
        if !module.is_active {
            return Err(DomainError::validation(format!(
                "module '{}' is inactive",
                module.code
            ))
            .into());
        }
        if let Some(parent_id) = input.parent_resource_id {
            let parent = self
                .store
                .resource(parent_id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("resource {parent_id}")))?;
            if parent.module_id != input.module_id {
                return Err(DomainError::validation(format!(
                    "parent resource '{}' belongs to another module",
                    parent.code
                ))
                .into());
            }
        }

        let record = ResourceRecord {
            id: ResourceId::new(),
            module_id: input.module_id,
            code: input.code,
            name: input.name,
            kind: input.kind,
            parent_resource_id: input.parent_resource_id,
            is_active: true,
            is_public: input.is_public,
            requires_approval: input.requires_approval,
        };
        self.store.insert_resource(record.clone()).await?;
        Ok(record)
    }

    /// Create a permission; the action must be on the operational allow-list.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_permission(
        &self,
        input: NewPermission,
    ) -> Result<PermissionRecord, AccessError> {
        if !input.action.is_operational() {
            return Err(DomainError::validation(format!(
                "action '{}' is not admitted for new permissions",
                input.action
            ))
            .into());
        }
        if self.store.resource(input.resource_id).await?.is_none() {
            return Err(DomainError::not_found(format!("resource {}", input.resource_id)).into());
        }

        let record = PermissionRecord {
            id: PermissionId::new(),
            resource_id: input.resource_id,
            action: input.action,
            name: input.name,
            display_name: input.display_name,
            is_active: true,
            conditions: input.conditions,
        };
        self.store.insert_permission(record.clone()).await?;
        Ok(record)
    }

    pub async fn create_module(&self, record: ModuleRecord) -> Result<(), AccessError> {
        Ok(self.store.insert_module(record).await?)
    }

    /// Deactivate catalog permissions whose action fell off the operational
    /// allow-list. Returns the number of rows touched.
    #[instrument(skip(self))]
    pub async fn normalize_permission_actions(&self) -> Result<u64, AccessError> {
        Ok(self.store.deactivate_nonoperational_permissions().await?)
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    async fn require_role(&self, role_id: RoleId) -> Result<RoleRecord, AccessError> {
        let role = self
            .store
            .role(role_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("role {role_id}")))?;
        if role.is_deleted() {
            return Err(DomainError::not_found(format!("role {role_id} is deleted")).into());
        }
        Ok(role)
    }

    async fn require_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<PermissionRecord, AccessError> {
        self.store
            .permission(permission_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("permission {permission_id}")).into())
    }

    fn reject_system_role(&self, role: &RoleRecord) -> Result<(), AccessError> {
        if role.is_system {
            return Err(DomainError::protected(format!(
                "role '{}' is a system role and cannot be deleted or deactivated",
                role.code
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        CompanyRecord, InMemoryAccessStore, MemberRecord, ResourceKind, WorkspaceRecord,
    };
    use atrium_auth::{Action, AllowReason, DenyReason, PermissionName};

    struct Fixture {
        service: AccessService,
        workspace_id: WorkspaceId,
        company_id: CompanyId,
        owner_id: UserId,
        module_id: ModuleId,
        resource_id: ResourceId,
        view_permission: PermissionId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryAccessStore::new());
        let service = AccessService::new(store.clone());

        let workspace_id = WorkspaceId::new();
        let company_id = CompanyId::new();
        let owner_id = UserId::new();
        store
            .insert_workspace(WorkspaceRecord {
                id: workspace_id,
                name: "acme".into(),
                owner_user_id: owner_id,
            })
            .await
            .unwrap();
        store
            .insert_company(CompanyRecord {
                id: company_id,
                workspace_id,
                name: "acme gmbh".into(),
            })
            .await
            .unwrap();

        let module_id = ModuleId::new();
        store
            .insert_module(ModuleRecord {
                id: module_id,
                code: "hr".into(),
                name: "HR".into(),
                is_core: false,
                is_active: true,
                deleted_at: None,
            })
            .await
            .unwrap();
        let resource = service
            .create_resource(NewResource {
                module_id,
                code: "reports".into(),
                name: "Reports".into(),
                kind: ResourceKind::Page,
                parent_resource_id: None,
                is_public: false,
                requires_approval: false,
            })
            .await
            .unwrap();
        let view = service
            .create_permission(NewPermission {
                resource_id: resource.id,
                action: Action::View,
                name: "hr.reports.view".into(),
                display_name: "View reports".into(),
                conditions: None,
            })
            .await
            .unwrap();

        Fixture {
            service,
            workspace_id,
            company_id,
            owner_id,
            module_id,
            resource_id: resource.id,
            view_permission: view.id,
        }
    }

    async fn add_member(f: &Fixture, restricted_to: Option<CompanyId>) -> UserId {
        let user_id = UserId::new();
        f.service
            .store()
            .upsert_member(MemberRecord {
                workspace_id: f.workspace_id,
                user_id,
                restricted_to_company_id: restricted_to,
            })
            .await
            .unwrap();
        user_id
    }

    fn requirement(name: &'static str) -> AccessRequirement {
        AccessRequirement::Permission(PermissionName::new(name))
    }

    // ── Decision ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn owner_is_allowed_without_any_grants() {
        let f = fixture().await;
        let decision = f
            .service
            .check_access(f.owner_id, f.workspace_id, None, &requirement("hr.reports.view"))
            .await
            .unwrap();
        assert_eq!(decision, Decision::Allow(AllowReason::OwnerBypass));
    }

    #[tokio::test]
    async fn non_member_is_denied() {
        let f = fixture().await;
        let decision = f
            .service
            .check_access(
                UserId::new(),
                f.workspace_id,
                None,
                &requirement("hr.reports.view"),
            )
            .await
            .unwrap();
        assert_eq!(decision, Decision::Deny(DenyReason::NotMember));
    }

    #[tokio::test]
    async fn direct_grant_satisfies_permission_requirement() {
        let f = fixture().await;
        let user_id = add_member(&f, None).await;
        f.service
            .upsert_direct_grant(
                user_id,
                f.workspace_id,
                None,
                GrantChange::grant(f.view_permission, Some(f.owner_id)),
            )
            .await
            .unwrap();

        let decision = f
            .service
            .check_access(user_id, f.workspace_id, None, &requirement("hr.reports.view"))
            .await
            .unwrap();
        assert_eq!(decision, Decision::Allow(AllowReason::PermissionGranted));
    }

    #[tokio::test]
    async fn workspace_wide_grant_authorizes_company_scope() {
        let f = fixture().await;
        let user_id = add_member(&f, None).await;
        f.service
            .upsert_direct_grant(
                user_id,
                f.workspace_id,
                None,
                GrantChange::grant(f.view_permission, None),
            )
            .await
            .unwrap();

        let decision = f
            .service
            .check_access(
                user_id,
                f.workspace_id,
                Some(f.company_id),
                &requirement("hr.reports.view"),
            )
            .await
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn restricted_member_is_denied_outside_their_company() {
        let f = fixture().await;
        let user_id = add_member(&f, Some(f.company_id)).await;
        f.service
            .upsert_direct_grant(
                user_id,
                f.workspace_id,
                None,
                GrantChange::grant(f.view_permission, None),
            )
            .await
            .unwrap();

        // Workspace-wide request is outside the restriction.
        let decision = f
            .service
            .check_access(user_id, f.workspace_id, None, &requirement("hr.reports.view"))
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Deny(DenyReason::CompanyRestricted { .. })
        ));

        // The restricted company itself is allowed.
        let decision = f
            .service
            .check_access(
                user_id,
                f.workspace_id,
                Some(f.company_id),
                &requirement("hr.reports.view"),
            )
            .await
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn unknown_scope_is_not_found_rather_than_denied() {
        let f = fixture().await;
        let err = f
            .service
            .check_access(
                f.owner_id,
                WorkspaceId::new(),
                None,
                &requirement("hr.reports.view"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::Domain(DomainError::NotFound(_))
        ));
    }

    // ── Grant mutation ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn grant_upsert_is_idempotent_on_the_scope_key() {
        let f = fixture().await;
        let user_id = add_member(&f, None).await;

        let first = f
            .service
            .upsert_direct_grant(
                user_id,
                f.workspace_id,
                None,
                GrantChange::grant(f.view_permission, None),
            )
            .await
            .unwrap();
        // Ensure the second write lands on a strictly later clock reading.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = f
            .service
            .upsert_direct_grant(
                user_id,
                f.workspace_id,
                None,
                GrantChange {
                    is_granted: false,
                    ..GrantChange::grant(f.view_permission, None)
                },
            )
            .await
            .unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at > first.updated_at);
        assert!(!second.is_granted);

        let stored = f
            .service
            .list_direct_grants(user_id, f.workspace_id, None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn grant_for_unknown_permission_is_rejected() {
        let f = fixture().await;
        let user_id = add_member(&f, None).await;
        let err = f
            .service
            .upsert_direct_grant(
                user_id,
                f.workspace_id,
                None,
                GrantChange::grant(PermissionId::new(), None),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::Domain(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bulk_rejects_whole_batch_when_any_id_is_invalid() {
        let f = fixture().await;
        let user_id = add_member(&f, None).await;
        let bogus = PermissionId::new();

        let err = f
            .service
            .bulk_direct_grants(
                user_id,
                f.workspace_id,
                None,
                vec![
                    GrantChange::grant(f.view_permission, None),
                    GrantChange::grant(bogus, None),
                ],
            )
            .await
            .unwrap_err();
        match err {
            AccessError::InvalidPermissions { invalid } => assert_eq!(invalid, vec![bogus]),
            other => panic!("unexpected error: {other}"),
        }

        // Nothing was written for the valid id either.
        let stored = f
            .service
            .list_direct_grants(user_id, f.workspace_id, None)
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn bulk_revocation_keeps_the_row_and_drops_effectiveness() {
        let f = fixture().await;
        let user_id = add_member(&f, None).await;
        f.service
            .bulk_direct_grants(
                user_id,
                f.workspace_id,
                None,
                vec![GrantChange {
                    is_granted: false,
                    ..GrantChange::grant(f.view_permission, None)
                }],
            )
            .await
            .unwrap();

        let stored = f
            .service
            .list_direct_grants(user_id, f.workspace_id, None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].is_granted);

        let effective = f
            .service
            .effective_permissions(user_id, f.workspace_id, None, ScopeMode::Exact)
            .await
            .unwrap();
        assert!(effective.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_the_stored_row() {
        let f = fixture().await;
        let user_id = add_member(&f, None).await;
        f.service
            .upsert_direct_grant(
                user_id,
                f.workspace_id,
                None,
                GrantChange::grant(f.view_permission, None),
            )
            .await
            .unwrap();

        f.service
            .delete_direct_grant(user_id, f.view_permission, f.workspace_id, None)
            .await
            .unwrap();
        let stored = f
            .service
            .list_direct_grants(user_id, f.workspace_id, None)
            .await
            .unwrap();
        assert!(stored.is_empty());

        // A second delete is a 404-class error.
        let err = f
            .service
            .delete_direct_grant(user_id, f.view_permission, f.workspace_id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::Domain(DomainError::NotFound(_))
        ));
    }

    // ── Role lifecycle and protections ──────────────────────────────────────

    #[tokio::test]
    async fn role_scope_is_workspace_xor_company() {
        let f = fixture().await;
        for (workspace_id, company_id) in [
            (None, None),
            (Some(f.workspace_id), Some(f.company_id)),
        ] {
            let err = f
                .service
                .create_role(NewRole {
                    code: "clerk".into(),
                    name: "Clerk".into(),
                    workspace_id,
                    company_id,
                    is_system: false,
                })
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                AccessError::Domain(DomainError::Validation(_))
            ));
        }

        let role = f
            .service
            .create_role(NewRole {
                code: "clerk".into(),
                name: "Clerk".into(),
                workspace_id: Some(f.workspace_id),
                company_id: None,
                is_system: false,
            })
            .await
            .unwrap();
        assert!(role.is_active);
    }

    #[tokio::test]
    async fn system_role_rejects_destruction_even_without_permission_checks() {
        let f = fixture().await;
        let role = f
            .service
            .create_role(NewRole {
                code: "workspace-admin".into(),
                name: "Workspace Admin".into(),
                workspace_id: Some(f.workspace_id),
                company_id: None,
                is_system: true,
            })
            .await
            .unwrap();

        for result in [
            f.service.deactivate_role(role.id).await,
            f.service.delete_role(role.id).await,
        ] {
            assert!(matches!(
                result.unwrap_err(),
                AccessError::Domain(DomainError::Protected(_))
            ));
        }
    }

    #[tokio::test]
    async fn assignments_to_deleted_roles_are_rejected() {
        let f = fixture().await;
        let user_id = add_member(&f, None).await;
        let role = f
            .service
            .create_role(NewRole {
                code: "clerk".into(),
                name: "Clerk".into(),
                workspace_id: Some(f.workspace_id),
                company_id: None,
                is_system: false,
            })
            .await
            .unwrap();
        f.service.delete_role(role.id).await.unwrap();

        let err = f
            .service
            .assign_role(user_id, role.id, f.workspace_id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::Domain(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn revoking_an_assignment_empties_the_effective_set() {
        let f = fixture().await;
        let user_id = add_member(&f, None).await;
        let role = f
            .service
            .create_role(NewRole {
                code: "clerk".into(),
                name: "Clerk".into(),
                workspace_id: Some(f.workspace_id),
                company_id: None,
                is_system: false,
            })
            .await
            .unwrap();
        f.service
            .upsert_role_grant(
                role.id,
                f.workspace_id,
                None,
                GrantChange::grant(f.view_permission, None),
            )
            .await
            .unwrap();
        f.service
            .assign_role(user_id, role.id, f.workspace_id, None, Some(f.owner_id))
            .await
            .unwrap();

        let effective = f
            .service
            .effective_permissions(user_id, f.workspace_id, None, ScopeMode::Exact)
            .await
            .unwrap();
        assert_eq!(effective.len(), 1);

        f.service
            .revoke_role(user_id, role.id, f.workspace_id, None)
            .await
            .unwrap();
        let effective = f
            .service
            .effective_permissions(user_id, f.workspace_id, None, ScopeMode::Exact)
            .await
            .unwrap();
        assert!(effective.is_empty());
    }

    // ── Catalog protections ─────────────────────────────────────────────────

    #[tokio::test]
    async fn core_module_cannot_be_deactivated() {
        let f = fixture().await;
        let core_id = ModuleId::new();
        f.service
            .create_module(ModuleRecord {
                id: core_id,
                code: "system".into(),
                name: "System".into(),
                is_core: true,
                is_active: true,
                deleted_at: None,
            })
            .await
            .unwrap();

        let err = f.service.deactivate_module(core_id).await.unwrap_err();
        assert!(matches!(
            err,
            AccessError::Domain(DomainError::Protected(_))
        ));

        // Non-core modules deactivate fine.
        f.service.deactivate_module(f.module_id).await.unwrap();
    }

    #[tokio::test]
    async fn resource_parent_must_share_the_module() {
        let f = fixture().await;
        let other_module = ModuleId::new();
        f.service
            .create_module(ModuleRecord {
                id: other_module,
                code: "sales".into(),
                name: "Sales".into(),
                is_core: false,
                is_active: true,
                deleted_at: None,
            })
            .await
            .unwrap();

        let err = f
            .service
            .create_resource(NewResource {
                module_id: other_module,
                code: "report-child".into(),
                name: "Child".into(),
                kind: ResourceKind::Submodule,
                parent_resource_id: Some(f.resource_id),
                is_public: false,
                requires_approval: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::Domain(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn permission_creation_enforces_the_action_allow_list() {
        let f = fixture().await;
        let err = f
            .service
            .create_permission(NewPermission {
                resource_id: f.resource_id,
                action: Action::Delete,
                name: "hr.reports.delete".into(),
                display_name: "Delete reports".into(),
                conditions: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::Domain(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn normalize_deactivates_off_list_actions_only() {
        let f = fixture().await;
        // A legacy row that predates the allow-list.
        f.service
            .store()
            .insert_permission(PermissionRecord {
                id: PermissionId::new(),
                resource_id: f.resource_id,
                action: Action::Export,
                name: "hr.reports.export".into(),
                display_name: "Export reports".into(),
                is_active: true,
                conditions: None,
            })
            .await
            .unwrap();

        let touched = f.service.normalize_permission_actions().await.unwrap();
        assert_eq!(touched, 1);

        // Idempotent.
        let touched = f.service.normalize_permission_actions().await.unwrap();
        assert_eq!(touched, 0);

        let view = f
            .service
            .store()
            .permission(f.view_permission)
            .await
            .unwrap()
            .unwrap();
        assert!(view.is_active);
    }
}
