use core::str::FromStr;
use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use atrium_core::DomainError;

/// Permission name.
///
/// Permissions are addressed by an opaque unique name (e.g. "hr.reports.view")
/// at this layer; the catalog ties the name to a concrete (resource, action)
/// pair and display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionName(Cow<'static, str>);

impl PermissionName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PermissionName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The action half of a (resource, action) permission.
///
/// The nominal enum is wider than what is admitted for new data: only
/// [`Action::OPERATIONAL`] actions may be used when creating permissions, and
/// a cleanup routine deactivates catalog entries outside that allow-list.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Execute,
    Export,
    Import,
    Approve,
    Manage,
}

impl Action {
    /// Actions admitted for newly created permissions.
    pub const OPERATIONAL: [Action; 4] =
        [Action::View, Action::Edit, Action::Approve, Action::Manage];

    pub fn is_operational(&self) -> bool {
        Self::OPERATIONAL.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Execute => "execute",
            Action::Export => "export",
            Action::Import => "import",
            Action::Approve => "approve",
            Action::Manage => "manage",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Action::View),
            "create" => Ok(Action::Create),
            "edit" => Ok(Action::Edit),
            "delete" => Ok(Action::Delete),
            "execute" => Ok(Action::Execute),
            "export" => Ok(Action::Export),
            "import" => Ok(Action::Import),
            "approve" => Ok(Action::Approve),
            "manage" => Ok(Action::Manage),
            other => Err(DomainError::validation(format!("unknown action: {other}"))),
        }
    }
}
