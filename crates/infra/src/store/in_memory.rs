//! In-memory store for tests and development.
//!
//! Mirrors the relational backend's semantics exactly: scope filtering via
//! [`Scope::admits`], upserts keyed on the full scope key, and bulk writes
//! applied under one write lock.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use atrium_core::{
    CompanyId, ModuleId, PermissionId, ResourceId, RoleId, Scope, ScopeMode, UserId, WorkspaceId,
};

use super::{
    AssignmentRecord, CatalogStore, CompanyRecord, DirectGrantRecord, DirectoryStore, GrantChange,
    GrantDetail, GrantStore, MemberRecord, ModuleRecord, PermissionRecord, ResourceRecord,
    RoleGrantRecord, RoleRecord, StoreError, WorkspaceRecord,
};

#[derive(Debug, Default)]
struct Inner {
    workspaces: HashMap<WorkspaceId, WorkspaceRecord>,
    companies: HashMap<CompanyId, CompanyRecord>,
    members: HashMap<(WorkspaceId, UserId), MemberRecord>,
    modules: HashMap<ModuleId, ModuleRecord>,
    resources: HashMap<ResourceId, ResourceRecord>,
    permissions: HashMap<PermissionId, PermissionRecord>,
    roles: HashMap<RoleId, RoleRecord>,
    role_grants: Vec<RoleGrantRecord>,
    direct_grants: Vec<DirectGrantRecord>,
    assignments: Vec<AssignmentRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryAccessStore {
    inner: RwLock<Inner>,
}

impl InMemoryAccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }
}

fn detail_for(
    inner: &Inner,
    permission_id: PermissionId,
    is_granted: bool,
    expires_at: Option<DateTime<Utc>>,
) -> Option<GrantDetail> {
    let permission = inner.permissions.get(&permission_id)?;
    let resource = inner.resources.get(&permission.resource_id)?;
    let module = inner.modules.get(&resource.module_id)?;
    Some(GrantDetail {
        permission_id,
        permission_name: permission.name.clone(),
        display_name: permission.display_name.clone(),
        action: permission.action,
        module_code: module.code.clone(),
        module_name: module.name.clone(),
        resource_code: resource.code.clone(),
        resource_name: resource.name.clone(),
        is_granted,
        expires_at,
    })
}

#[async_trait]
impl DirectoryStore for InMemoryAccessStore {
    async fn workspace(&self, id: WorkspaceId) -> Result<Option<WorkspaceRecord>, StoreError> {
        Ok(self.read()?.workspaces.get(&id).cloned())
    }

    async fn company(&self, id: CompanyId) -> Result<Option<CompanyRecord>, StoreError> {
        Ok(self.read()?.companies.get(&id).cloned())
    }

    async fn member(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<Option<MemberRecord>, StoreError> {
        Ok(self.read()?.members.get(&(workspace_id, user_id)).cloned())
    }

    async fn insert_workspace(&self, record: WorkspaceRecord) -> Result<(), StoreError> {
        self.write()?.workspaces.insert(record.id, record);
        Ok(())
    }

    async fn insert_company(&self, record: CompanyRecord) -> Result<(), StoreError> {
        self.write()?.companies.insert(record.id, record);
        Ok(())
    }

    async fn upsert_member(&self, record: MemberRecord) -> Result<(), StoreError> {
        self.write()?
            .members
            .insert((record.workspace_id, record.user_id), record);
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for InMemoryAccessStore {
    async fn module(&self, id: ModuleId) -> Result<Option<ModuleRecord>, StoreError> {
        Ok(self.read()?.modules.get(&id).cloned())
    }

    async fn resource(&self, id: ResourceId) -> Result<Option<ResourceRecord>, StoreError> {
        Ok(self.read()?.resources.get(&id).cloned())
    }

    async fn permission(&self, id: PermissionId) -> Result<Option<PermissionRecord>, StoreError> {
        Ok(self.read()?.permissions.get(&id).cloned())
    }

    async fn permissions_by_ids(
        &self,
        ids: &[PermissionId],
    ) -> Result<Vec<PermissionRecord>, StoreError> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.permissions.get(id).cloned())
            .collect())
    }

    async fn role(&self, id: RoleId) -> Result<Option<RoleRecord>, StoreError> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn insert_module(&self, record: ModuleRecord) -> Result<(), StoreError> {
        self.write()?.modules.insert(record.id, record);
        Ok(())
    }

    async fn insert_resource(&self, record: ResourceRecord) -> Result<(), StoreError> {
        self.write()?.resources.insert(record.id, record);
        Ok(())
    }

    async fn insert_permission(&self, record: PermissionRecord) -> Result<(), StoreError> {
        self.write()?.permissions.insert(record.id, record);
        Ok(())
    }

    async fn insert_role(&self, record: RoleRecord) -> Result<(), StoreError> {
        self.write()?.roles.insert(record.id, record);
        Ok(())
    }

    async fn set_module_active(&self, id: ModuleId, active: bool) -> Result<(), StoreError> {
        if let Some(module) = self.write()?.modules.get_mut(&id) {
            module.is_active = active;
        }
        Ok(())
    }

    async fn set_role_active(&self, id: RoleId, active: bool) -> Result<(), StoreError> {
        if let Some(role) = self.write()?.roles.get_mut(&id) {
            role.is_active = active;
        }
        Ok(())
    }

    async fn soft_delete_role(&self, id: RoleId, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(role) = self.write()?.roles.get_mut(&id) {
            role.deleted_at = Some(at);
            role.is_active = false;
        }
        Ok(())
    }

    async fn deactivate_nonoperational_permissions(&self) -> Result<u64, StoreError> {
        let mut inner = self.write()?;
        let mut touched = 0;
        for permission in inner.permissions.values_mut() {
            if permission.is_active && !permission.action.is_operational() {
                permission.is_active = false;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[async_trait]
impl GrantStore for InMemoryAccessStore {
    async fn active_assignments(
        &self,
        user_id: UserId,
        scope: &Scope,
        mode: ScopeMode,
    ) -> Result<Vec<AssignmentRecord>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .assignments
            .iter()
            .filter(|a| {
                a.user_id == user_id
                    && a.is_active
                    && scope.admits(mode, a.workspace_id, a.company_id)
            })
            .cloned()
            .collect())
    }

    async fn role_grant_details(
        &self,
        role_ids: &[RoleId],
        scope: &Scope,
        mode: ScopeMode,
    ) -> Result<Vec<GrantDetail>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .role_grants
            .iter()
            .filter(|g| {
                role_ids.contains(&g.role_id) && scope.admits(mode, g.workspace_id, g.company_id)
            })
            .filter_map(|g| detail_for(&inner, g.permission_id, g.is_granted, g.expires_at))
            .collect())
    }

    async fn direct_grant_details(
        &self,
        user_id: UserId,
        scope: &Scope,
        mode: ScopeMode,
    ) -> Result<Vec<GrantDetail>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .direct_grants
            .iter()
            .filter(|g| g.user_id == user_id && scope.admits(mode, g.workspace_id, g.company_id))
            .filter_map(|g| detail_for(&inner, g.permission_id, g.is_granted, g.expires_at))
            .collect())
    }

    async fn upsert_role_grant(
        &self,
        role_id: RoleId,
        scope: &Scope,
        change: &GrantChange,
    ) -> Result<RoleGrantRecord, StoreError> {
        let mut inner = self.write()?;
        let now = Utc::now();

        if let Some(existing) = inner.role_grants.iter_mut().find(|g| {
            g.role_id == role_id
                && g.permission_id == change.permission_id
                && g.workspace_id == scope.workspace_id
                && g.company_id == scope.company_id
        }) {
            existing.is_granted = change.is_granted;
            existing.expires_at = change.expires_at;
            existing.conditions = change.conditions.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let record = RoleGrantRecord {
            role_id,
            permission_id: change.permission_id,
            workspace_id: scope.workspace_id,
            company_id: scope.company_id,
            is_granted: change.is_granted,
            expires_at: change.expires_at,
            conditions: change.conditions.clone(),
            granted_by: change.granted_by,
            created_at: now,
            updated_at: now,
        };
        inner.role_grants.push(record.clone());
        Ok(record)
    }

    async fn upsert_direct_grant(
        &self,
        user_id: UserId,
        scope: &Scope,
        change: &GrantChange,
    ) -> Result<DirectGrantRecord, StoreError> {
        let mut inner = self.write()?;
        let now = Utc::now();

        if let Some(existing) = inner.direct_grants.iter_mut().find(|g| {
            g.user_id == user_id
                && g.permission_id == change.permission_id
                && g.workspace_id == scope.workspace_id
                && g.company_id == scope.company_id
        }) {
            existing.is_granted = change.is_granted;
            existing.expires_at = change.expires_at;
            existing.conditions = change.conditions.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let record = DirectGrantRecord {
            user_id,
            permission_id: change.permission_id,
            workspace_id: scope.workspace_id,
            company_id: scope.company_id,
            is_granted: change.is_granted,
            expires_at: change.expires_at,
            conditions: change.conditions.clone(),
            granted_by: change.granted_by,
            created_at: now,
            updated_at: now,
        };
        inner.direct_grants.push(record.clone());
        Ok(record)
    }

    async fn bulk_upsert_direct_grants(
        &self,
        user_id: UserId,
        scope: &Scope,
        changes: &[GrantChange],
    ) -> Result<(), StoreError> {
        // One write lock for the whole batch: readers never observe a
        // half-applied bulk update.
        let mut inner = self.write()?;
        let now = Utc::now();

        for change in changes {
            if let Some(existing) = inner.direct_grants.iter_mut().find(|g| {
                g.user_id == user_id
                    && g.permission_id == change.permission_id
                    && g.workspace_id == scope.workspace_id
                    && g.company_id == scope.company_id
            }) {
                existing.is_granted = change.is_granted;
                existing.expires_at = change.expires_at;
                existing.conditions = change.conditions.clone();
                existing.updated_at = now;
                continue;
            }

            inner.direct_grants.push(DirectGrantRecord {
                user_id,
                permission_id: change.permission_id,
                workspace_id: scope.workspace_id,
                company_id: scope.company_id,
                is_granted: change.is_granted,
                expires_at: change.expires_at,
                conditions: change.conditions.clone(),
                granted_by: change.granted_by,
                created_at: now,
                updated_at: now,
            });
        }
        Ok(())
    }

    async fn delete_direct_grant(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
        scope: &Scope,
    ) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let before = inner.direct_grants.len();
        inner.direct_grants.retain(|g| {
            !(g.user_id == user_id
                && g.permission_id == permission_id
                && g.workspace_id == scope.workspace_id
                && g.company_id == scope.company_id)
        });
        Ok(inner.direct_grants.len() < before)
    }

    async fn upsert_assignment(&self, record: AssignmentRecord) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if let Some(existing) = inner.assignments.iter_mut().find(|a| {
            a.user_id == record.user_id
                && a.role_id == record.role_id
                && a.workspace_id == record.workspace_id
                && a.company_id == record.company_id
        }) {
            *existing = record;
            return Ok(());
        }
        inner.assignments.push(record);
        Ok(())
    }

    async fn deactivate_assignment(
        &self,
        user_id: UserId,
        role_id: RoleId,
        scope: &Scope,
    ) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let mut found = false;
        for a in inner.assignments.iter_mut() {
            if a.user_id == user_id
                && a.role_id == role_id
                && a.workspace_id == scope.workspace_id
                && a.company_id == scope.company_id
            {
                a.is_active = false;
                found = true;
            }
        }
        Ok(found)
    }
}
