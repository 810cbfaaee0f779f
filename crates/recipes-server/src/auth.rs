use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::state::AppState;

/// The user a write request was authenticated as, inserted into request
/// extensions by [`require_admin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminUser(pub String);

/// Gate for write endpoints.
///
/// 1. `server.admin_enabled` is false → 403
/// 2. `Authorization: Bearer <token>` names a configured token → pass, with
///    the token's user attached as [`AdminUser`]
/// 3. Anything else → 403
pub async fn require_admin(State(app): State<AppState>, mut req: Request, next: Next) -> Response {
    if !app.config.server.admin_enabled {
        return AppError::forbidden("the admin API is disabled").into_response();
    }

    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);
    let Some(user) = token.and_then(|t| app.config.server.user_for_token(t)) else {
        tracing::debug!(path = %req.uri().path(), "rejected write without a valid token");
        return AppError::forbidden("authentication credentials were not provided or are invalid")
            .into_response();
    };

    req.extensions_mut().insert(AdminUser(user.to_string()));
    next.run(req).await
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::{body::Body, http::Request, middleware, routing::post, Extension, Router};
    use recipes_core::config::Config;
    use recipes_core::workflow::RecipeService;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn whoami(Extension(user): Extension<AdminUser>) -> String {
        user.0
    }

    fn test_app(dir: &TempDir, admin_enabled: bool) -> Router {
        let mut config = Config::initial();
        config.server.admin_enabled = admin_enabled;
        config
            .server
            .admin_tokens
            .insert("s3cret".into(), "alice".into());
        let service = RecipeService::open(dir.path(), &config).unwrap();
        let state = AppState::new(dir.path().to_path_buf(), config, service);
        Router::new()
            .route("/write", post(whoami))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
            .with_state(state)
    }

    fn post_with(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/write");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn valid_token_attaches_user() {
        let dir = TempDir::new().unwrap();
        let resp = test_app(&dir, true)
            .oneshot(post_with(Some("Bearer s3cret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"alice");
    }

    #[tokio::test]
    async fn missing_or_unknown_token_is_forbidden() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir, true);
        let resp = app.clone().oneshot(post_with(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = app.oneshot(post_with(Some("Bearer nope"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn disabled_admin_rejects_even_valid_tokens() {
        let dir = TempDir::new().unwrap();
        let resp = test_app(&dir, false)
            .oneshot(post_with(Some("Bearer s3cret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
