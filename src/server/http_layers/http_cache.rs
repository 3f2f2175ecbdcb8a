//! HTTP caching middleware

use crate::partition::Partition;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Cache policy for served files of one partition.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub partition: Partition,
    pub max_age_sec: usize,
}

impl CachePolicy {
    pub fn header_value(&self) -> HeaderValue {
        match self.partition {
            // Restricted bytes must never land in a shared cache
            Partition::Restricted => HeaderValue::from_static("private"),
            Partition::Public => HeaderValue::from_str(&format!("max-age={}", self.max_age_sec))
                .unwrap_or_else(|_| HeaderValue::from_static("no-cache")),
        }
    }
}

/// Adds `Cache-Control` to successful and not-modified responses that did
/// not set one themselves. Proxied upstream responses keep theirs.
pub async fn http_cache(
    State(policy): State<CachePolicy>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await.into_response();

    let status = response.status();
    let cacheable = status.is_success() || status == axum::http::StatusCode::NOT_MODIFIED;
    if cacheable && !response.headers().contains_key(header::CACHE_CONTROL) {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, policy.header_value());
    }
    response
}
