//! `atrium-infra` — storage and the access-control engine built on it.
//!
//! The engine is request-scoped and stateless between invocations: every
//! decision and every aggregation is a fresh set of relational queries. The
//! only in-process state is the connection pool (or the in-memory store used
//! for tests/dev).

pub mod aggregator;
pub mod resolver;
pub mod service;
pub mod store;

pub use aggregator::{EffectivePermission, GrantSource, effective_permissions, to_permission_map};
pub use resolver::{ResolveError, resolve_scope};
pub use service::{AccessError, AccessService};
pub use store::{AccessStore, InMemoryAccessStore, StoreError};
#[cfg(feature = "postgres")]
pub use store::postgres::PostgresAccessStore;
