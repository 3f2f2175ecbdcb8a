//! Upstream fallback for aliases this librarian cannot serve.
//!
//! Responses are streamed straight through and never cached, so the same
//! miss falls through again on the next request.

use crate::error::{LibrarianError, LibrarianResult};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, Response},
};
use std::time::Duration;
use tracing::debug;

/// Request headers passed on to the upstream.
const FORWARDED_REQUEST_HEADERS: &[HeaderName] = &[
    header::RANGE,
    header::IF_NONE_MATCH,
    header::IF_MODIFIED_SINCE,
];

/// Response headers passed back to the client.
const FORWARDED_RESPONSE_HEADERS: &[HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::ETAG,
    header::LAST_MODIFIED,
    header::CACHE_CONTROL,
    header::LOCATION,
];

pub struct UpstreamProxy {
    client: reqwest::Client,
    base_url: String,
}

impl UpstreamProxy {
    /// `upstream` is `host:port` of another librarian serving the same
    /// partition.
    pub fn new(upstream: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create upstream HTTP client")?;

        let upstream = upstream.trim_end_matches('/');
        let base_url = if upstream.starts_with("http://") || upstream.starts_with("https://") {
            upstream.to_string()
        } else {
            format!("http://{}", upstream)
        };

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch `path` from the upstream and relay status, relevant headers
    /// and body.
    pub async fn forward(&self, path: &str, headers: &HeaderMap) -> LibrarianResult<Response<Body>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Proxying {} to upstream", url);

        let mut request = self.client.get(&url);
        for name in FORWARDED_REQUEST_HEADERS {
            if let Some(value) = headers.get(name) {
                request = request.header(name, value);
            }
        }

        let upstream = request
            .send()
            .await
            .map_err(|e| LibrarianError::UpstreamUnavailable(format!("{}: {}", url, e)))?;

        let mut builder = Response::builder().status(upstream.status());
        for name in FORWARDED_RESPONSE_HEADERS {
            if let Some(value) = upstream.headers().get(name) {
                builder = builder.header(name, value);
            }
        }

        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| LibrarianError::UpstreamUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};

    #[test]
    fn base_url_gets_scheme() {
        let proxy = UpstreamProxy::new("upstream:8080", Duration::from_secs(1)).unwrap();
        assert_eq!(proxy.base_url(), "http://upstream:8080");
        let proxy = UpstreamProxy::new("https://upstream/", Duration::from_secs(1)).unwrap();
        assert_eq!(proxy.base_url(), "https://upstream");
    }

    #[tokio::test]
    async fn relays_status_headers_and_body() {
        async fn file(headers: HeaderMap) -> Response<Body> {
            let range = headers
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::ETAG, "\"abc\"")
                .header("X-Internal", "secret")
                .body(Body::from(range))
                .unwrap()
        }
        let app = Router::new().route("/{id}/{name}", get(file));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let proxy = UpstreamProxy::new(&addr.to_string(), Duration::from_secs(5)).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, "bytes=0-1".parse().unwrap());
        let response = proxy.forward("/7/a.txt", &headers).await.unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::ETAG], "\"abc\"");
        assert!(response.headers().get("X-Internal").is_none());
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"bytes=0-1");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_reported() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = UpstreamProxy::new(&addr.to_string(), Duration::from_secs(1)).unwrap();
        let result = proxy.forward("/1/x", &HeaderMap::new()).await;
        assert!(matches!(result, Err(LibrarianError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn stalled_upstream_times_out() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let proxy = UpstreamProxy::new(&addr.to_string(), Duration::from_millis(200)).unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            proxy.forward("/1/x", &HeaderMap::new()),
        )
        .await
        .expect("stalled upstream held the request open");
        assert!(matches!(result, Err(LibrarianError::UpstreamUnavailable(_))));
    }
}
