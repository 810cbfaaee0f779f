pub mod auth;
pub mod cache;
pub mod error;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::middleware;
use axum::routing::{get, patch, post, MethodRouter};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use recipes_core::paths::PUBLIC_API_ROOT;

use crate::cache::CachePolicy;
use crate::state::AppState;

/// Routes for one API prefix. `/api/v1` is read-only; `/api/v3` adds the
/// admin write endpoints.
fn api_routes(app: &AppState, writable: bool) -> Router<AppState> {
    let api = CachePolicy::api(&app.config.cache);
    let immutable = CachePolicy::immutable(&app.config.cache);

    let read = |policy: CachePolicy, route: MethodRouter<AppState>| {
        route.layer(middleware::from_fn_with_state(policy, cache::apply_cache_policy))
    };

    let mut router = Router::new()
        // Actions
        .route("/action/", read(api, get(routes::actions::list_actions)))
        .route("/action/signed/", read(api, get(routes::actions::signed_actions)))
        .route("/action/{name}/", read(api, get(routes::actions::get_action)))
        .route(
            "/action/{name}/implementation/{hash}/",
            read(immutable, get(routes::actions::get_implementation)),
        )
        // Recipes
        .route("/recipe/", read(api, get(routes::recipes::list_recipes)))
        .route("/recipe/signed/", read(api, get(routes::recipes::signed_recipes)))
        .route("/recipe/{id}/", read(api, get(routes::recipes::get_recipe)))
        .route(
            "/recipe/{id}/history/",
            read(api, get(routes::recipes::recipe_history)),
        )
        // Revisions
        .route(
            "/recipe_revision/",
            read(api, get(routes::revisions::list_revisions)),
        )
        .route(
            "/recipe_revision/{id}/",
            read(api, get(routes::revisions::get_revision)),
        )
        // Approval requests
        .route(
            "/approval_request/",
            read(api, get(routes::approvals::list_approval_requests)),
        )
        .route(
            "/approval_request/{id}/",
            read(api, get(routes::approvals::get_approval_request)),
        )
        // Client attributes and filter values
        .route(
            "/classify_client/",
            read(CachePolicy::NoCache, get(routes::classify::classify_client)),
        )
        .route("/filters/", read(api, get(routes::recipes::filters)));

    if writable {
        let admin = middleware::from_fn_with_state(app.clone(), auth::require_admin);
        let write = |route: MethodRouter<AppState>| {
            route
                .route_layer(admin.clone())
                .layer(middleware::from_fn_with_state(
                    CachePolicy::NoCache,
                    cache::apply_cache_policy,
                ))
        };

        router = router
            .route("/recipe/", write(post(routes::recipes::create_recipe)))
            .route("/recipe/{id}/", write(patch(routes::recipes::update_recipe)))
            .route(
                "/recipe/{id}/enable/",
                write(post(routes::recipes::enable_recipe)),
            )
            .route(
                "/recipe/{id}/disable/",
                write(post(routes::recipes::disable_recipe)),
            )
            .route(
                "/recipe_revision/{id}/request_approval/",
                write(post(routes::revisions::request_approval)),
            )
            .route(
                "/approval_request/{id}/approve/",
                write(post(routes::approvals::approve)),
            )
            .route(
                "/approval_request/{id}/reject/",
                write(post(routes::approvals::reject)),
            )
            .route(
                "/approval_request/{id}/close/",
                write(post(routes::approvals::close)),
            );
    }

    router
}

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest(PUBLIC_API_ROOT, api_routes(&app, false))
        .nest("/api/v3", api_routes(&app, true))
        .route("/__heartbeat__", get(heartbeat))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn heartbeat(
    axum::extract::State(app): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, error::AppError> {
    let service = app.service.clone();
    let actions = routes::blocking(move || service.actions().map(|a| a.len())).await?;
    Ok(axum::Json(serde_json::json!({
        "status": "ok",
        "actions": actions,
        "public_key": app.service.public_key(),
    })))
}

/// Open the project at `root` and serve the API on `port`.
pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(root, listener).await
}

/// Serve on a pre-bound listener (port 0 lets the OS pick).
pub async fn serve_on(root: PathBuf, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let port = listener.local_addr()?.port();
    let app = tokio::task::spawn_blocking(move || AppState::open(root)).await??;
    let router = build_router(app);

    tracing::info!("recipe server listening on http://localhost:{port}");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
