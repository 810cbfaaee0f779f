use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::AdminUser;
use crate::error::AppError;
use crate::routes::{blocking, optional_json};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DecisionBody {
    #[serde(default)]
    pub comment: Option<String>,
}

/// GET approval_request/
pub async fn list_approval_requests(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let requests = blocking(move || service.approval_requests()).await?;
    Ok(Json(serde_json::to_value(requests)?))
}

/// GET approval_request/{id}/
pub async fn get_approval_request(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let request = blocking(move || service.approval_request(id)).await?;
    Ok(Json(serde_json::to_value(request)?))
}

/// POST approval_request/{id}/approve/: approve and sign. 409 if the
/// request was already decided.
pub async fn approve(
    State(app): State<AppState>,
    Extension(user): Extension<AdminUser>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let DecisionBody { comment } = optional_json(&body)?;
    let service = app.service.clone();
    let request = blocking(move || service.approve(id, Some(user.0), comment)).await?;
    Ok(Json(serde_json::to_value(request)?))
}

/// POST approval_request/{id}/reject/
pub async fn reject(
    State(app): State<AppState>,
    Extension(user): Extension<AdminUser>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let DecisionBody { comment } = optional_json(&body)?;
    let service = app.service.clone();
    let request = blocking(move || service.reject(id, Some(user.0), comment)).await?;
    Ok(Json(serde_json::to_value(request)?))
}

/// POST approval_request/{id}/close/: withdraw a pending request.
pub async fn close(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let request = blocking(move || service.close(id)).await?;
    tracing::debug!(request_id = request.id, "closed via api");
    Ok(Json(serde_json::json!({ "closed": request.id })))
}
