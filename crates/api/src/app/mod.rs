//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (store + access service)
//! - `routes/`: HTTP routes + handlers (one file per surface)
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use atrium_infra::store::AccessStore;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests, which pass a pre-seeded store).
pub fn build_app(store: Arc<dyn AccessStore>, jwt_secret: String) -> Router {
    let jwt = Arc::new(atrium_auth::Hs256TokenCodec::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let services = Arc::new(services::build_services(store));

    // Protected routes: require a valid bearer token.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
