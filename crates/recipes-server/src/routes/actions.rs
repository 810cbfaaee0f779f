use axum::extract::{NestedPath, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppError;
use crate::routes::blocking;
use crate::state::AppState;

/// GET action/: all actions.
pub async fn list_actions(
    State(app): State<AppState>,
    api_root: NestedPath,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let actions = blocking(move || service.actions()).await?;
    let list: Vec<serde_json::Value> = actions
        .iter()
        .map(|a| a.to_json(api_root.as_str()))
        .collect();
    Ok(Json(serde_json::json!(list)))
}

/// GET action/signed/: actions carrying a current signature.
pub async fn signed_actions(
    State(app): State<AppState>,
    api_root: NestedPath,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let actions = blocking(move || service.signed_actions()).await?;
    let list: Vec<serde_json::Value> = actions
        .iter()
        .map(|a| {
            serde_json::json!({
                "action": a.to_json(api_root.as_str()),
                "signature": a.current_signature(),
            })
        })
        .collect();
    Ok(Json(serde_json::json!(list)))
}

/// GET action/{name}/
pub async fn get_action(
    State(app): State<AppState>,
    api_root: NestedPath,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let action = blocking(move || service.action(&name)).await?;
    Ok(Json(action.to_json(api_root.as_str())))
}

/// GET action/{name}/implementation/{hash}/: the code itself. 404 unless
/// `hash` is the current implementation hash.
pub async fn get_implementation(
    State(app): State<AppState>,
    Path((name, hash)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let service = app.service.clone();
    let action = blocking(move || service.action_implementation(&name, &hash)).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        action.implementation,
    ))
}
