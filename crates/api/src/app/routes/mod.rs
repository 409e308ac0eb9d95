use axum::{Router, routing::get};

pub mod catalog;
pub mod role_grants;
pub mod system;
pub mod user_grants;
pub mod user_roles;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/system", catalog::router().merge(role_grants::router()))
        .nest(
            "/users/:user_id",
            user_grants::router().merge(user_roles::router()),
        )
}
