//! Bearer token authentication middleware

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

/// Authentication middleware
///
/// Accepts `Authorization: Bearer <token>`, or a `token` query parameter for
/// WebSocket clients that cannot set headers.
pub async fn auth_middleware(
    State(expected_token): State<String>,
    Query(params): Query<HashMap<String, String>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let token = match request.headers().get(header::AUTHORIZATION) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AuthError::InvalidFormat)?
            .to_string(),
        None => params.get("token").cloned().ok_or(AuthError::MissingToken)?,
    };

    if token != expected_token {
        debug!("rejected request to {} with invalid token", request.uri().path());
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(request).await)
}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing Authorization header"),
            AuthError::InvalidFormat => (
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization format (expected: Bearer <token>)",
            ),
            AuthError::InvalidToken => (StatusCode::FORBIDDEN, "Invalid token"),
        };

        (status, message).into_response()
    }
}
