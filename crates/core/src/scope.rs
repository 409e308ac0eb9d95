//! Scope: the (workspace, company-or-null) pair that narrows where a grant,
//! assignment, or check applies.
//!
//! Scoping convention used by every grant/assignment table:
//! - `company_id = None` on a record means it applies **workspace-wide**.
//! - `company_id = Some(c)` means it applies **only within company `c`**.
//!
//! A single lookup never mixes the two filters ambiguously; callers pick a
//! [`ScopeMode`] instead:
//! - [`ScopeMode::Exact`] — a company-scoped query sees only records for that
//!   exact company; a workspace-wide query sees only workspace-wide records.
//! - [`ScopeMode::Inclusive`] — a company-scoped query additionally admits
//!   workspace-wide records. A workspace-wide query never admits
//!   company-scoped records in either mode (they are strictly narrower).

use serde::{Deserialize, Serialize};

use crate::id::{CompanyId, WorkspaceId};

/// A resolved (workspace, company|null) scope descriptor.
///
/// Construction does not validate existence; the scope resolver is
/// responsible for checking that the workspace exists and that the company
/// belongs to it before a `Scope` enters the query pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub workspace_id: WorkspaceId,
    pub company_id: Option<CompanyId>,
}

/// How workspace-wide records interact with a company-scoped query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    /// Scope-exact matching (the default; preserves the original non-merging
    /// behavior).
    #[default]
    Exact,
    /// Company-scoped queries also admit workspace-wide records.
    Inclusive,
}

impl Scope {
    /// Workspace-wide scope (`company_id = None`).
    pub fn workspace(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            company_id: None,
        }
    }

    /// Company-restricted scope.
    pub fn company(workspace_id: WorkspaceId, company_id: CompanyId) -> Self {
        Self {
            workspace_id,
            company_id: Some(company_id),
        }
    }

    /// True when this scope applies workspace-wide.
    pub fn is_workspace_wide(&self) -> bool {
        self.company_id.is_none()
    }

    /// Exact scope predicate: the record's (workspace, company) must equal
    /// this scope's pair, with `None == None` for workspace-wide records.
    pub fn matches(
        &self,
        record_workspace: WorkspaceId,
        record_company: Option<CompanyId>,
    ) -> bool {
        self.workspace_id == record_workspace && self.company_id == record_company
    }

    /// Mode-aware scope predicate used by both store implementations.
    pub fn admits(
        &self,
        mode: ScopeMode,
        record_workspace: WorkspaceId,
        record_company: Option<CompanyId>,
    ) -> bool {
        if self.workspace_id != record_workspace {
            return false;
        }
        match (mode, self.company_id, record_company) {
            // Exact: company pair must match, including None == None.
            (ScopeMode::Exact, want, got) => want == got,
            // Inclusive, company-scoped query: exact company or workspace-wide record.
            (ScopeMode::Inclusive, Some(want), got) => got == Some(want) || got.is_none(),
            // Inclusive, workspace-wide query: never widens into company records.
            (ScopeMode::Inclusive, None, got) => got.is_none(),
        }
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.company_id {
            Some(c) => write!(f, "{}/{}", self.workspace_id, c),
            None => write!(f, "{}/*", self.workspace_id),
        }
    }
}
