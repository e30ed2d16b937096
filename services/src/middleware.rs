//! Request guards applied as layers.

use axum::{
    extract::Request,
    http::{HeaderName, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::response::ApiResponse;

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Rejects requests whose `x-api-key` header does not equal `expected`.
pub async fn require_api_key(expected: Arc<str>, req: Request, next: Next) -> Response {
    let presented = req
        .headers()
        .get(&API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if presented != Some(expected.as_ref()) {
        tracing::debug!(present = presented.is_some(), "Rejected API key");
        return (
            StatusCode::UNAUTHORIZED,
            ApiResponse::message(false, "Unauthorized: Invalid API key"),
        )
            .into_response();
    }

    next.run(req).await
}
