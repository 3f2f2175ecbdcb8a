//! Serving stored files by alias id.

use super::byte_range::ByteRange;
use super::metrics;
use super::state::ServerState;
use crate::catalog_store::{AliasId, ResolvedAlias};
use crate::error::{LibrarianError, LibrarianResult};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// What the catalog knows about a requested alias.
enum Lookup {
    Servable(ResolvedAlias),
    /// Known here but expired or deleted.
    Gone,
    /// Unknown in this partition.
    Missing,
}

fn lookup(state: &ServerState, alias_id: &str) -> LibrarianResult<Lookup> {
    let alias_id: AliasId = match alias_id.parse() {
        Ok(id) if id > 0 => id,
        _ => return Ok(Lookup::Missing),
    };
    let now = chrono::Utc::now().timestamp();
    Ok(match state.storage.catalog().get_alias(alias_id)? {
        Some(resolved) if resolved.is_servable(now) => Lookup::Servable(resolved),
        Some(_) => Lookup::Gone,
        None => Lookup::Missing,
    })
}

fn etag_for(digest: &str) -> String {
    format!("\"{}\"", digest)
}

/// Whether an `If-None-Match` header value covers `etag`.
fn if_none_match_hits(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    value.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

fn http_date(unix_secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(unix_secs, 0)
        .map(|t| t.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

async fn fall_back_upstream(
    state: &ServerState,
    path: &str,
    headers: &HeaderMap,
) -> LibrarianResult<Response> {
    match &state.proxy {
        Some(proxy) => {
            metrics::record_download(state.config.partition.as_str(), "upstream");
            proxy.forward(path, headers).await
        }
        None => Err(LibrarianError::NotFound),
    }
}

/// `GET /{alias_id}/{filename}`. The filename segment is informational.
pub async fn serve_file(
    State(state): State<ServerState>,
    Path((alias_id, filename)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let upstream_path = format!("/{}/{}", alias_id, urlencoding::encode(&filename));
    let result = match lookup(&state, &alias_id) {
        Ok(Lookup::Servable(resolved)) => {
            match serve_resolved(&state, resolved, &headers).await {
                Err(LibrarianError::NotFound) => {
                    debug!("Alias {} has no bytes here, trying upstream", alias_id);
                    fall_back_upstream(&state, &upstream_path, &headers).await
                }
                other => other,
            }
        }
        Ok(Lookup::Gone) => Err(LibrarianError::NotFound),
        Ok(Lookup::Missing) => fall_back_upstream(&state, &upstream_path, &headers).await,
        Err(e) => Err(e),
    };
    result.into_response()
}

async fn serve_resolved(
    state: &ServerState,
    resolved: ResolvedAlias,
    headers: &HeaderMap,
) -> LibrarianResult<Response> {
    let ResolvedAlias { alias, content } = resolved;
    let etag = etag_for(&content.digest);
    let last_modified = http_date(content.created_at);

    let mut builder = Response::builder()
        .header(header::ETAG, &etag)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(last_modified) = &last_modified {
        builder = builder.header(header::LAST_MODIFIED, last_modified);
    }

    // Conditional and range replies only describe bytes that can be served.
    let opened = state.storage.open(content.id).await?;

    if if_none_match_hits(headers, &etag) {
        return Ok(builder
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())
            .map_err(|e| anyhow::anyhow!(e))?);
    }

    let size = content.size;
    let (status, start, len) = match ByteRange::from_headers(headers) {
        None => (StatusCode::OK, 0, size),
        Some(range) => match range.resolve(size) {
            Ok((start, end)) => {
                builder = builder.header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, size),
                );
                (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
            }
            Err(_) => {
                return Ok(builder
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{}", size))
                    .body(Body::empty())
                    .map_err(|e| anyhow::anyhow!(e))?);
            }
        },
    };

    let source = if opened.is_local() { "local" } else { "object_store" };
    metrics::record_download(state.config.partition.as_str(), source);
    let reader = opened.into_reader(start, len).await?;
    let stream = ReaderStream::with_capacity(reader, STREAM_CHUNK_SIZE);

    let content_type = HeaderValue::from_str(&alias.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    Ok(builder
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len)
        .body(Body::from_stream(stream))
        .map_err(|e| anyhow::anyhow!(e))?)
}

/// `GET /{alias_id}` redirects to the canonical URL with the filename.
pub async fn redirect_alias(
    State(state): State<ServerState>,
    Path(alias_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let result = match lookup(&state, &alias_id) {
        Ok(Lookup::Servable(resolved)) => {
            let location = format!(
                "/{}/{}",
                resolved.alias.id,
                urlencoding::encode(&resolved.alias.filename)
            );
            Ok((
                StatusCode::MOVED_PERMANENTLY,
                [(header::LOCATION, location)],
            )
                .into_response())
        }
        Ok(Lookup::Gone) => Err(LibrarianError::NotFound),
        Ok(Lookup::Missing) => fall_back_upstream(&state, &format!("/{}", alias_id), &headers).await,
        Err(e) => Err(e),
    };
    result.into_response()
}

pub async fn robots_txt() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        "User-agent: *\nDisallow: /\n",
    )
}

pub async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    ([("X-Librarian-Revision", state.hash.clone())], "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_none_match_variants() {
        let etag = etag_for("abc");
        let mut headers = HeaderMap::new();
        assert!(!if_none_match_hits(&headers, &etag));

        headers.insert(header::IF_NONE_MATCH, "\"abc\"".parse().unwrap());
        assert!(if_none_match_hits(&headers, &etag));

        headers.insert(header::IF_NONE_MATCH, "\"x\", W/\"abc\"".parse().unwrap());
        assert!(if_none_match_hits(&headers, &etag));

        headers.insert(header::IF_NONE_MATCH, "*".parse().unwrap());
        assert!(if_none_match_hits(&headers, &etag));

        headers.insert(header::IF_NONE_MATCH, "\"abd\"".parse().unwrap());
        assert!(!if_none_match_hits(&headers, &etag));
    }

    #[test]
    fn formats_http_dates() {
        assert_eq!(
            http_date(0).as_deref(),
            Some("Thu, 01 Jan 1970 00:00:00 GMT")
        );
    }
}
