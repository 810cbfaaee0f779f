//! Cache-Control interceptor.
//!
//! Each route is wrapped with the [`CachePolicy`] it should advertise. The
//! header is only set on successful responses; errors are never cacheable.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use recipes_core::config::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// `no-cache, no-store, must-revalidate`
    NoCache,
    Cache {
        max_age: u64,
        scope: CacheScope,
        immutable: bool,
    },
}

impl CachePolicy {
    /// Ordinary read endpoints.
    pub fn api(cfg: &CacheConfig) -> Self {
        CachePolicy::Cache {
            max_age: cfg.api_max_age,
            scope: CacheScope::Public,
            immutable: false,
        }
    }

    /// Content-addressed responses such as action implementations.
    pub fn immutable(cfg: &CacheConfig) -> Self {
        CachePolicy::Cache {
            max_age: cfg.immutable_max_age,
            scope: CacheScope::Public,
            immutable: true,
        }
    }

    pub fn header_value(&self) -> String {
        match self {
            CachePolicy::NoCache => "no-cache, no-store, must-revalidate".to_string(),
            CachePolicy::Cache {
                max_age,
                scope,
                immutable,
            } => {
                let scope = match scope {
                    CacheScope::Public => "public",
                    CacheScope::Private => "private",
                };
                let mut value = format!("{scope}, max-age={max_age}");
                if *immutable {
                    value.push_str(", immutable");
                }
                value
            }
        }
    }
}

/// Middleware applying `policy` to successful responses.
pub async fn apply_cache_policy(
    State(policy): State<CachePolicy>,
    req: Request,
    next: Next,
) -> Response {
    let mut resp = next.run(req).await;
    let value = if resp.status().is_success() {
        policy.header_value()
    } else {
        CachePolicy::NoCache.header_value()
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        resp.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    resp
}
