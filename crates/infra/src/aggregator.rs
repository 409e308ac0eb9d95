//! Grant aggregation: compute the effective permission set for a user in a
//! scope.
//!
//! Pure read path. Role-derived and direct grants are fetched concurrently,
//! revoked (`is_granted = false`) and expired rows are dropped, and the
//! remainder is merged by permission id with source provenance preserved.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atrium_auth::Action;
use atrium_core::{PermissionId, RoleId, Scope, ScopeMode, UserId};

use crate::store::{AccessStore, GrantDetail, GrantStore, StoreError};

/// Where an effective permission came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantSource {
    Role,
    Direct,
}

/// One entry of the effective permission set, with catalog metadata and
/// provenance. A permission granted both through a role and directly appears
/// once, carrying both sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermission {
    pub permission_id: PermissionId,
    pub name: String,
    pub display_name: String,
    pub action: Action,
    pub module_code: String,
    pub module_name: String,
    pub resource_code: String,
    pub resource_name: String,
    pub sources: Vec<GrantSource>,
    pub expires_at: Option<DateTime<Utc>>,
}

fn is_effective(detail: &GrantDetail, now: DateTime<Utc>) -> bool {
    detail.is_granted && detail.expires_at.map_or(true, |at| at > now)
}

fn entry_from(detail: GrantDetail, source: GrantSource) -> EffectivePermission {
    EffectivePermission {
        permission_id: detail.permission_id,
        name: detail.permission_name,
        display_name: detail.display_name,
        action: detail.action,
        module_code: detail.module_code,
        module_name: detail.module_name,
        resource_code: detail.resource_code,
        resource_name: detail.resource_name,
        sources: vec![source],
        expires_at: detail.expires_at,
    }
}

/// Compute the effective permission set for `user_id` in `scope`.
///
/// Order is deterministic: (module name, resource name, action).
pub async fn effective_permissions(
    store: &dyn AccessStore,
    user_id: UserId,
    scope: &Scope,
    mode: ScopeMode,
) -> Result<Vec<EffectivePermission>, StoreError> {
    let now = Utc::now();

    let assignments = store.active_assignments(user_id, scope, mode).await?;
    let mut role_ids: Vec<RoleId> = assignments.iter().map(|a| a.role_id).collect();
    role_ids.sort();
    role_ids.dedup();

    // Both fetches are independent of each other; run them concurrently.
    let (role_details, direct_details) = tokio::join!(
        async {
            if role_ids.is_empty() {
                Ok(Vec::new())
            } else {
                store.role_grant_details(&role_ids, scope, mode).await
            }
        },
        store.direct_grant_details(user_id, scope, mode),
    );
    let role_details = role_details?;
    let direct_details = direct_details?;

    let mut merged: BTreeMap<PermissionId, EffectivePermission> = BTreeMap::new();

    for detail in role_details {
        if is_effective(&detail, now) {
            merged
                .entry(detail.permission_id)
                .or_insert_with(|| entry_from(detail, GrantSource::Role));
        }
    }
    for detail in direct_details {
        if !is_effective(&detail, now) {
            continue;
        }
        merged
            .entry(detail.permission_id)
            .and_modify(|entry| {
                if !entry.sources.contains(&GrantSource::Direct) {
                    entry.sources.push(GrantSource::Direct);
                }
            })
            .or_insert_with(|| entry_from(detail, GrantSource::Direct));
    }

    let mut entries: Vec<EffectivePermission> = merged.into_values().collect();
    entries.sort_by(|a, b| {
        (&a.module_name, &a.resource_name, a.action.as_str()).cmp(&(
            &b.module_name,
            &b.resource_name,
            b.action.as_str(),
        ))
    });
    Ok(entries)
}

/// Collapse the flat set into `{ permission_name: true }` for fast
/// existence checks on the client.
pub fn to_permission_map(entries: &[EffectivePermission]) -> BTreeMap<String, bool> {
    entries
        .iter()
        .map(|entry| (entry.name.clone(), true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        AssignmentRecord, CatalogStore, DirectoryStore, GrantChange, GrantStore,
        InMemoryAccessStore, ModuleRecord, PermissionRecord, ResourceKind, ResourceRecord,
        RoleRecord, WorkspaceRecord,
    };
    use atrium_core::{CompanyId, ModuleId, ResourceId, WorkspaceId};
    use chrono::Duration;

    struct Fixture {
        store: InMemoryAccessStore,
        workspace_id: WorkspaceId,
        user_id: UserId,
        role_id: RoleId,
        view_reports: PermissionId,
        edit_reports: PermissionId,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryAccessStore::new();
        let workspace_id = WorkspaceId::new();
        let user_id = UserId::new();
        let module_id = ModuleId::new();
        let resource_id = ResourceId::new();
        let role_id = RoleId::new();
        let view_reports = PermissionId::new();
        let edit_reports = PermissionId::new();

        store
            .insert_workspace(WorkspaceRecord {
                id: workspace_id,
                name: "acme".into(),
                owner_user_id: UserId::new(),
            })
            .await
            .unwrap();
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
        store
            .insert_resource(ResourceRecord {
                id: resource_id,
                module_id,
                code: "reports".into(),
                name: "Reports".into(),
                kind: ResourceKind::Page,
                parent_resource_id: None,
                is_active: true,
                is_public: false,
                requires_approval: false,
            })
            .await
            .unwrap();
        for (id, action, name) in [
            (view_reports, Action::View, "hr.reports.view"),
            (edit_reports, Action::Edit, "hr.reports.edit"),
        ] {
            store
                .insert_permission(PermissionRecord {
                    id,
                    resource_id,
                    action,
                    name: name.into(),
                    display_name: name.into(),
                    is_active: true,
                    conditions: None,
                })
                .await
                .unwrap();
        }
        store
            .insert_role(RoleRecord {
                id: role_id,
                code: "hr-clerk".into(),
                name: "HR Clerk".into(),
                workspace_id: Some(workspace_id),
                company_id: None,
                is_system: false,
                is_active: true,
                deleted_at: None,
            })
            .await
            .unwrap();

        Fixture {
            store,
            workspace_id,
            user_id,
            role_id,
            view_reports,
            edit_reports,
        }
    }

    async fn assign(f: &Fixture, scope: &Scope) {
        f.store
            .upsert_assignment(AssignmentRecord {
                user_id: f.user_id,
                role_id: f.role_id,
                workspace_id: scope.workspace_id,
                company_id: scope.company_id,
                is_active: true,
                assigned_by: None,
                assigned_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn no_assignments_and_no_grants_yields_empty_set() {
        let f = fixture().await;
        let scope = Scope::workspace(f.workspace_id);
        let entries = effective_permissions(&f.store, f.user_id, &scope, ScopeMode::Exact)
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn role_and_direct_grants_merge_with_both_sources() {
        let f = fixture().await;
        let scope = Scope::workspace(f.workspace_id);
        assign(&f, &scope).await;
        f.store
            .upsert_role_grant(f.role_id, &scope, &GrantChange::grant(f.view_reports, None))
            .await
            .unwrap();
        f.store
            .upsert_direct_grant(f.user_id, &scope, &GrantChange::grant(f.view_reports, None))
            .await
            .unwrap();
        f.store
            .upsert_direct_grant(f.user_id, &scope, &GrantChange::grant(f.edit_reports, None))
            .await
            .unwrap();

        let entries = effective_permissions(&f.store, f.user_id, &scope, ScopeMode::Exact)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);

        let view = entries
            .iter()
            .find(|e| e.permission_id == f.view_reports)
            .unwrap();
        assert_eq!(view.sources, vec![GrantSource::Role, GrantSource::Direct]);

        let edit = entries
            .iter()
            .find(|e| e.permission_id == f.edit_reports)
            .unwrap();
        assert_eq!(edit.sources, vec![GrantSource::Direct]);
    }

    #[tokio::test]
    async fn revoked_and_expired_grants_are_filtered() {
        let f = fixture().await;
        let scope = Scope::workspace(f.workspace_id);

        let revoked = GrantChange {
            is_granted: false,
            ..GrantChange::grant(f.view_reports, None)
        };
        f.store
            .upsert_direct_grant(f.user_id, &scope, &revoked)
            .await
            .unwrap();

        let expired = GrantChange {
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            ..GrantChange::grant(f.edit_reports, None)
        };
        f.store
            .upsert_direct_grant(f.user_id, &scope, &expired)
            .await
            .unwrap();

        let entries = effective_permissions(&f.store, f.user_id, &scope, ScopeMode::Exact)
            .await
            .unwrap();
        assert!(entries.is_empty());

        // The rows themselves are retained for listing surfaces.
        let stored = f
            .store
            .direct_grant_details(f.user_id, &scope, ScopeMode::Exact)
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|g| !g.is_granted));
    }

    #[tokio::test]
    async fn workspace_wide_grant_needs_inclusive_mode_in_company_scope() {
        let f = fixture().await;
        let wide = Scope::workspace(f.workspace_id);
        let company = Scope::company(f.workspace_id, CompanyId::new());
        assign(&f, &wide).await;
        assign(&f, &company).await;
        f.store
            .upsert_role_grant(f.role_id, &wide, &GrantChange::grant(f.view_reports, None))
            .await
            .unwrap();

        let in_wide = effective_permissions(&f.store, f.user_id, &wide, ScopeMode::Exact)
            .await
            .unwrap();
        assert_eq!(in_wide.len(), 1);

        let exact = effective_permissions(&f.store, f.user_id, &company, ScopeMode::Exact)
            .await
            .unwrap();
        assert!(exact.is_empty());

        let inclusive = effective_permissions(&f.store, f.user_id, &company, ScopeMode::Inclusive)
            .await
            .unwrap();
        assert_eq!(inclusive.len(), 1);
        assert_eq!(inclusive[0].name, "hr.reports.view");
    }

    #[tokio::test]
    async fn entries_are_ordered_and_map_shape_collapses_names() {
        let f = fixture().await;
        let scope = Scope::workspace(f.workspace_id);
        f.store
            .upsert_direct_grant(f.user_id, &scope, &GrantChange::grant(f.edit_reports, None))
            .await
            .unwrap();
        f.store
            .upsert_direct_grant(f.user_id, &scope, &GrantChange::grant(f.view_reports, None))
            .await
            .unwrap();

        let entries = effective_permissions(&f.store, f.user_id, &scope, ScopeMode::Exact)
            .await
            .unwrap();
        // "edit" sorts before "view" within the same resource.
        assert_eq!(entries[0].action, Action::Edit);
        assert_eq!(entries[1].action, Action::View);

        let map = to_permission_map(&entries);
        assert_eq!(map.get("hr.reports.view"), Some(&true));
        assert_eq!(map.get("hr.reports.edit"), Some(&true));
    }
}
