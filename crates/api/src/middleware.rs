use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, middleware::Next, response::Response};
use chrono::Utc;

use atrium_auth::TokenValidator;
use atrium_core::DomainError;

use crate::app::errors;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn TokenValidator>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers())?;

    let claims = state
        .jwt
        .validate(token, Utc::now())
        .map_err(|_e| unauthorized())?;

    req.extensions_mut()
        .insert(PrincipalContext::new(claims.sub));

    Ok(next.run(req).await)
}

// Auth failures use the same error-body shape as every other surface.
fn unauthorized() -> Response {
    errors::domain_error_to_response(DomainError::Unauthorized)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, Response> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(unauthorized)?;

    let header = header.to_str().map_err(|_| unauthorized())?;

    let header = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(unauthorized());
    }

    Ok(token)
}
