use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use recipes_core::filter::FilterSet;
use recipes_core::recipe::RecipeFields;
use recipes_core::types::RecipeStatus;

use crate::auth::AdminUser;
use crate::error::AppError;
use crate::routes::{blocking, json_body};
use crate::state::AppState;

/// GET recipe/: `status` selects enabled/disabled, every other known
/// parameter is a filter.
pub async fn list_recipes(
    State(app): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = params.get("status").and_then(|s| RecipeStatus::parse(s));
    let filters = FilterSet::from_query(&params)?;
    let service = app.service.clone();
    let recipes = blocking(move || service.list_recipes(status, &filters)).await?;
    let list: Vec<serde_json::Value> = recipes.iter().map(|r| r.to_json()).collect();
    Ok(Json(serde_json::json!(list)))
}

/// GET recipe/signed/: `[{recipe, signature}]` for recipes whose signature
/// covers their latest revision.
pub async fn signed_recipes(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let recipes = blocking(move || service.signed_recipes()).await?;
    let list: Vec<serde_json::Value> = recipes
        .iter()
        .filter_map(|r| {
            let signature = r.valid_signature()?;
            Some(serde_json::json!({
                "recipe": r.to_json(),
                "signature": signature,
            }))
        })
        .collect();
    Ok(Json(serde_json::json!(list)))
}

/// GET recipe/{id}/
pub async fn get_recipe(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let recipe = blocking(move || service.recipe(id)).await?;
    Ok(Json(recipe.to_json()))
}

/// GET recipe/{id}/history/: revisions, newest first.
pub async fn recipe_history(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let history = blocking(move || service.history(id)).await?;
    let list: Vec<serde_json::Value> = history.iter().map(|r| r.to_json()).collect();
    Ok(Json(serde_json::json!(list)))
}

/// POST recipe/: create a recipe and its first revision.
pub async fn create_recipe(
    State(app): State<AppState>,
    Extension(user): Extension<AdminUser>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let fields: RecipeFields = json_body(&body)?;
    let service = app.service.clone();
    let recipe = blocking(move || service.create_recipe(fields, Some(user.0))).await?;
    Ok((StatusCode::CREATED, Json(recipe.to_json())))
}

/// PATCH recipe/{id}/: append a revision; omitted fields keep their values.
pub async fn update_recipe(
    State(app): State<AppState>,
    Extension(user): Extension<AdminUser>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let fields: RecipeFields = json_body(&body)?;
    let service = app.service.clone();
    let recipe = blocking(move || service.update_recipe(id, fields, Some(user.0))).await?;
    Ok(Json(recipe.to_json()))
}

/// POST recipe/{id}/enable/
pub async fn enable_recipe(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let recipe = blocking(move || service.enable(id)).await?;
    Ok(Json(recipe.to_json()))
}

/// POST recipe/{id}/disable/
pub async fn disable_recipe(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let recipe = blocking(move || service.disable(id)).await?;
    Ok(Json(recipe.to_json()))
}

/// GET filters/: valid values for each recipe filter.
pub async fn filters(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let options = blocking(move || service.filter_options()).await?;
    Ok(Json(serde_json::to_value(options)?))
}
