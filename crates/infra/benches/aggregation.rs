use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use chrono::Utc;
use tokio::runtime::Runtime;

use atrium_auth::Action;
use atrium_core::{ModuleId, PermissionId, ResourceId, RoleId, Scope, ScopeMode, UserId, WorkspaceId};
use atrium_infra::effective_permissions;
use atrium_infra::store::{
    AccessStore, AssignmentRecord, CatalogStore, DirectoryStore, GrantChange, GrantStore,
    InMemoryAccessStore, ModuleRecord, PermissionRecord, ResourceKind, ResourceRecord, RoleRecord,
    WorkspaceRecord,
};

struct Setup {
    store: Arc<InMemoryAccessStore>,
    user_id: UserId,
    scope: Scope,
}

/// Seed a workspace with one role assignment, `n` role-derived grants, and
/// `n / 2` direct grants overlapping the first half of the role grants.
fn seed(rt: &Runtime, n: usize) -> Setup {
    let store = Arc::new(InMemoryAccessStore::new());
    let workspace_id = WorkspaceId::new();
    let user_id = UserId::new();
    let role_id = RoleId::new();
    let module_id = ModuleId::new();
    let resource_id = ResourceId::new();
    let scope = Scope::workspace(workspace_id);

    rt.block_on(async {
        store
            .insert_workspace(WorkspaceRecord {
                id: workspace_id,
                name: "bench".into(),
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
        store
            .insert_role(RoleRecord {
                id: role_id,
                code: "clerk".into(),
                name: "Clerk".into(),
                workspace_id: Some(workspace_id),
                company_id: None,
                is_system: false,
                is_active: true,
                deleted_at: None,
            })
            .await
            .unwrap();
        store
            .upsert_assignment(AssignmentRecord {
                user_id,
                role_id,
                workspace_id,
                company_id: None,
                is_active: true,
                assigned_by: None,
                assigned_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut permission_ids = Vec::with_capacity(n);
        for i in 0..n {
            let id = PermissionId::new();
            store
                .insert_permission(PermissionRecord {
                    id,
                    resource_id,
                    action: Action::View,
                    name: format!("hr.reports.view.{i}"),
                    display_name: format!("View {i}"),
                    is_active: true,
                    conditions: None,
                })
                .await
                .unwrap();
            permission_ids.push(id);
        }
        for id in &permission_ids {
            store
                .upsert_role_grant(role_id, &scope, &GrantChange::grant(*id, None))
                .await
                .unwrap();
        }
        for id in permission_ids.iter().take(n / 2) {
            store
                .upsert_direct_grant(user_id, &scope, &GrantChange::grant(*id, None))
                .await
                .unwrap();
        }
    });

    Setup {
        store,
        user_id,
        scope,
    }
}

fn bench_effective_permissions(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("effective_permissions");

    for n in [16usize, 128, 1024] {
        let setup = seed(&rt, n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("merge", n), &setup, |b, setup| {
            b.iter(|| {
                let entries = rt
                    .block_on(effective_permissions(
                        setup.store.as_ref() as &dyn AccessStore,
                        setup.user_id,
                        &setup.scope,
                        ScopeMode::Exact,
                    ))
                    .unwrap();
                black_box(entries)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_effective_permissions);
criterion_main!(benches);
