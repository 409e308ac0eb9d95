use serde::{Deserialize, Serialize};

use atrium_core::{CompanyId, Scope, UserId, WorkspaceId};

/// Company restriction carried by a workspace membership.
///
/// Modeled as a tagged union instead of the loosely-typed JSON blob it
/// replaces, so the read path never parses ad hoc structures.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MembershipScope {
    /// The member may operate in any scope of the workspace.
    Unrestricted,
    /// The member is constrained to exactly one company, regardless of role.
    RestrictedToCompany { company_id: CompanyId },
}

impl MembershipScope {
    pub fn from_restriction(restricted_to: Option<CompanyId>) -> Self {
        match restricted_to {
            Some(company_id) => Self::RestrictedToCompany { company_id },
            None => Self::Unrestricted,
        }
    }

    /// Whether a request for `scope` is admissible under this restriction.
    ///
    /// A restricted member is denied for any scope whose company differs from
    /// the restriction, including workspace-wide scopes.
    pub fn permits(&self, scope: &Scope) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::RestrictedToCompany { company_id } => scope.company_id == Some(*company_id),
        }
    }
}

/// A user's membership in a workspace, as the decision point sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMembership {
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    /// Whether this user is the owning identity of the workspace.
    pub is_owner: bool,
    pub scope: MembershipScope,
}
