//! Scope resolution: turn raw (workspace, company?) identifiers into a
//! validated [`Scope`] before anything queries with it.

use thiserror::Error;

use atrium_core::{CompanyId, Scope, WorkspaceId};

use crate::store::{DirectoryStore, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(WorkspaceId),

    #[error("company not found: {0}")]
    CompanyNotFound(CompanyId),

    #[error("company {company_id} does not belong to workspace {workspace_id}")]
    CompanyOutsideWorkspace {
        company_id: CompanyId,
        workspace_id: WorkspaceId,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validate that the workspace exists and, when present, that the company
/// exists and belongs to it.
///
/// Every request-facing operation resolves its scope through here exactly
/// once; downstream code can then trust `Scope` without re-checking.
pub async fn resolve_scope(
    store: &dyn DirectoryStore,
    workspace_id: WorkspaceId,
    company_id: Option<CompanyId>,
) -> Result<Scope, ResolveError> {
    if store.workspace(workspace_id).await?.is_none() {
        return Err(ResolveError::WorkspaceNotFound(workspace_id));
    }

    match company_id {
        None => Ok(Scope::workspace(workspace_id)),
        Some(company_id) => {
            let company = store
                .company(company_id)
                .await?
                .ok_or(ResolveError::CompanyNotFound(company_id))?;
            if company.workspace_id != workspace_id {
                return Err(ResolveError::CompanyOutsideWorkspace {
                    company_id,
                    workspace_id,
                });
            }
            Ok(Scope::company(workspace_id, company_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CompanyRecord, InMemoryAccessStore, WorkspaceRecord};
    use atrium_core::UserId;

    async fn seeded() -> (InMemoryAccessStore, WorkspaceId, CompanyId) {
        let store = InMemoryAccessStore::new();
        let workspace_id = WorkspaceId::new();
        let company_id = CompanyId::new();
        store
            .insert_workspace(WorkspaceRecord {
                id: workspace_id,
                name: "acme".into(),
                owner_user_id: UserId::new(),
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
        (store, workspace_id, company_id)
    }

    #[tokio::test]
    async fn resolves_workspace_wide_scope() {
        let (store, workspace_id, _) = seeded().await;
        let scope = resolve_scope(&store, workspace_id, None).await.unwrap();
        assert!(scope.is_workspace_wide());
        assert_eq!(scope.workspace_id, workspace_id);
    }

    #[tokio::test]
    async fn resolves_company_scope() {
        let (store, workspace_id, company_id) = seeded().await;
        let scope = resolve_scope(&store, workspace_id, Some(company_id))
            .await
            .unwrap();
        assert_eq!(scope.company_id, Some(company_id));
    }

    #[tokio::test]
    async fn unknown_workspace_is_rejected() {
        let (store, _, company_id) = seeded().await;
        let err = resolve_scope(&store, WorkspaceId::new(), Some(company_id))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::WorkspaceNotFound(_)));
    }

    #[tokio::test]
    async fn unknown_company_is_rejected() {
        let (store, workspace_id, _) = seeded().await;
        let err = resolve_scope(&store, workspace_id, Some(CompanyId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::CompanyNotFound(_)));
    }

    #[tokio::test]
    async fn company_from_another_workspace_is_rejected() {
        let (store, _, company_id) = seeded().await;
        let other_workspace = WorkspaceId::new();
        store
            .insert_workspace(WorkspaceRecord {
                id: other_workspace,
                name: "other".into(),
                owner_user_id: UserId::new(),
            })
            .await
            .unwrap();
        let err = resolve_scope(&store, other_workspace, Some(company_id))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::CompanyOutsideWorkspace { .. }));
    }
}
