use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role code used for RBAC checks.
///
/// Codes are intentionally opaque strings at this layer; the catalog ties a
/// code to its scope (workspace XOR company), system flag, and grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleCode(Cow<'static, str>);

impl RoleCode {
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
