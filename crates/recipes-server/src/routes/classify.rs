use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::Json;
use recipes_core::classify::RequestInfo;

use crate::error::AppError;
use crate::state::AppState;

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// GET classify_client/: the attributes targeting would see for this
/// request. Never fails; unknown country falls back to `"unknown"`.
pub async fn classify_client(
    State(app): State<AppState>,
    req: Request,
) -> Result<Json<serde_json::Value>, AppError> {
    let headers = req.headers();
    let info = RequestInfo {
        peer: req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip()),
        forwarded_for: header(headers, "x-forwarded-for"),
        real_ip: header(headers, "x-real-ip"),
        accept_language: header(headers, "accept-language"),
        channel: app
            .config
            .classify
            .channel_header
            .as_deref()
            .and_then(|name| header(headers, name)),
    };
    let client = app.classifier.classify(&info);
    Ok(Json(serde_json::to_value(client)?))
}
