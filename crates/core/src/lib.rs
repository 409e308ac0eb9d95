//! `atrium-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod scope;

pub use error::{DomainError, DomainResult};
pub use id::{CompanyId, ModuleId, PermissionId, ResourceId, RoleId, UserId, WorkspaceId};
pub use scope::{Scope, ScopeMode};
