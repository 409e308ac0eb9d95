use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": principal.user_id().to_string(),
    }))
}
