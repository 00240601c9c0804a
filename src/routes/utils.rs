use std::sync::Arc;

use axum::{
    extract::{FromRequest, Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};

use super::auth::AuthService;
use crate::{db::utils::RecordId, error::AppError};

/// `Json` whose rejection goes through the error boundary.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Identity of the caller, placed in the request extensions by [require_auth].
#[derive(Debug, Clone)]
pub struct AuthUser(pub RecordId);

#[inline]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return None;
    }
    Some(token.trim())
}

/// Rejects the request unless it carries a valid bearer token.
pub async fn require_auth(
    State(service): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers()).ok_or_else(|| {
        tracing::warn!("missing bearer token");
        AppError::unauthorized("Unauthorized")
    })?;

    let user_id = service.verify_token(token)?;
    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}

/// Logs every request path, and the path again when the response is an error.
pub async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    tracing::info!("{method} {path}");

    let response = next.run(request).await;
    let status = response.status();
    if status.is_server_error() {
        tracing::error!("Error occurred on PATH: {path} ({status})");
    } else if status.is_client_error() {
        tracing::warn!("Error occurred on PATH: {path} ({status})");
    }
    response
}
