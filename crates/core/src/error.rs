//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, authorization outcomes). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested entity or scope was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflict occurred (e.g. duplicate scope key).
    #[error("conflict: {0}")]
    Conflict(String),

    /// No authenticated identity could be resolved.
    #[error("unauthorized")]
    Unauthorized,

    /// The caller is authenticated but not allowed to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The target is a protected system/core entity; destructive mutation is
    /// rejected regardless of caller authority.
    #[error("protected entity: {0}")]
    Protected(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn protected(msg: impl Into<String>) -> Self {
        Self::Protected(msg.into())
    }
}
