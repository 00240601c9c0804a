use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Extension, Json, Router};
use serde_json::json;

use super::{auth::AuthService, utils::AuthUser};
use crate::error::AppError;

async fn get_current_user(
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    State(service): State<Arc<AuthService>>,
) -> Result<impl IntoResponse, AppError> {
    let user = service.current_user(&user_id).await?;
    tracing::info!("User found: {}", user_id);

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "User retrieved successfully", "user": user })),
    ))
}

pub fn user_routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/user/me", get(get_current_user))
        .with_state(service)
}
