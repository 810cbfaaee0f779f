use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::auth::AdminUser;
use crate::error::AppError;
use crate::routes::blocking;
use crate::state::AppState;

/// GET recipe_revision/
pub async fn list_revisions(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let revisions = blocking(move || service.revisions()).await?;
    let list: Vec<serde_json::Value> = revisions.iter().map(|r| r.to_json()).collect();
    Ok(Json(serde_json::json!(list)))
}

/// GET recipe_revision/{id}/
pub async fn get_revision(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let revision = blocking(move || service.revision(id)).await?;
    Ok(Json(revision.to_json()))
}

/// POST recipe_revision/{id}/request_approval/: 409 while another request
/// for the revision is pending or approved.
pub async fn request_approval(
    State(app): State<AppState>,
    Extension(user): Extension<AdminUser>,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let service = app.service.clone();
    let request = blocking(move || service.request_approval(id, Some(user.0))).await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(request)?)))
}
