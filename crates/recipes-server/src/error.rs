use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use recipes_core::error::RecipeError;

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// 400 for a malformed request body.
    pub fn bad_request(field: &str, msg: impl Into<String>) -> Self {
        Self(RecipeError::validation(field, msg).into())
    }

    /// 403 for a write that the caller may not perform.
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self(RecipeError::PermissionDenied(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Some(e) = self.0.downcast_ref::<RecipeError>() else {
            tracing::error!(error = %self.0, "unhandled error");
            let body = serde_json::json!({ "error": self.0.to_string() });
            return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response();
        };

        let status = match e {
            RecipeError::RecipeNotFound(_)
            | RecipeError::RevisionNotFound(_)
            | RecipeError::ActionNotFound(_)
            | RecipeError::ApprovalRequestNotFound(_) => StatusCode::NOT_FOUND,
            RecipeError::Validation { .. } | RecipeError::NotInitialized => StatusCode::BAD_REQUEST,
            RecipeError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            RecipeError::ApprovalConflict(_) | RecipeError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            RecipeError::Signing(_)
            | RecipeError::Store(_)
            | RecipeError::Io(_)
            | RecipeError::Yaml(_)
            | RecipeError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %e, "request failed");
        }

        let body = match e {
            RecipeError::Validation { field, message } => serde_json::json!({
                "error": message,
                "field": field,
            }),
            other => serde_json::json!({ "error": other.to_string() }),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn status_of(err: RecipeError) -> StatusCode {
        AppError(err.into()).into_response().status()
    }

    #[test]
    fn not_found_variants_map_to_404() {
        assert_eq!(status_of(RecipeError::RecipeNotFound(1)), StatusCode::NOT_FOUND);
        assert_eq!(status_of(RecipeError::RevisionNotFound(1)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(RecipeError::ActionNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(RecipeError::ApprovalRequestNotFound(1)),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn conflicts_map_to_409() {
        assert_eq!(
            status_of(RecipeError::ApprovalConflict("already approved".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(RecipeError::InvalidTransition {
                from: "disabled".into(),
                to: "enabled".into(),
                reason: "not approved".into(),
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn permission_denied_maps_to_403() {
        assert_eq!(
            AppError::forbidden("no token").into_response().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn not_initialized_maps_to_400() {
        assert_eq!(status_of(RecipeError::NotInitialized), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_failure_maps_to_500() {
        assert_eq!(
            status_of(RecipeError::Store("corrupt".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let err = AppError(anyhow::anyhow!("something unexpected"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn validation_body_names_the_field() {
        let response = AppError::bad_request("channels", "unknown channel code(s): aurora")
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["field"], "channels");
        assert!(body["error"].as_str().unwrap().contains("aurora"));
    }
}
