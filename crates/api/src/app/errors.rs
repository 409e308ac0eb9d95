use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use atrium_core::DomainError;
use atrium_infra::AccessError;

pub fn access_error_to_response(err: AccessError) -> axum::response::Response {
    match err {
        AccessError::Domain(e) => domain_error_to_response(e),
        AccessError::InvalidPermissions { invalid } => json_error_with_details(
            StatusCode::BAD_REQUEST,
            "invalid_permissions",
            "batch contains unknown or inactive permission ids",
            json!({ "invalid": invalid }),
        ),
        AccessError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            // Backend details stay in the logs; the body is generic.
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
            )
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) | DomainError::InvalidId(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        DomainError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        DomainError::Unauthorized => {
            json_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
        }
        DomainError::Forbidden(_) => json_error(StatusCode::FORBIDDEN, "forbidden", message),
        DomainError::Protected(_) => {
            json_error(StatusCode::FORBIDDEN, "protected_entity", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn json_error_with_details(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    details: serde_json::Value,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "details": details,
        })),
    )
        .into_response()
}
