//! Digest search API

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::state::ServerState;
use crate::catalog_store::{AliasId, ContentId, ResolvedAlias};

#[derive(Deserialize)]
struct SearchParams {
    digest: Option<String>,
}

/// One live alias whose content matches the searched digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub alias_id: AliasId,
    pub content_id: ContentId,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub digest: String,
    pub expires: Option<i64>,
    /// Path of the file on the server that answered the search.
    pub url: String,
}

impl From<ResolvedAlias> for SearchHit {
    fn from(resolved: ResolvedAlias) -> Self {
        let url = format!(
            "/{}/{}",
            resolved.alias.id,
            urlencoding::encode(&resolved.alias.filename)
        );
        SearchHit {
            alias_id: resolved.alias.id,
            content_id: resolved.content.id,
            filename: resolved.alias.filename,
            mime_type: resolved.alias.mime_type,
            size: resolved.content.size,
            digest: resolved.content.digest,
            expires: resolved.alias.expires,
            url,
        }
    }
}

async fn search_by_digest(
    State(state): State<ServerState>,
    Query(params): Query<SearchParams>,
) -> Response {
    let digest = match params.digest {
        Some(digest) if state.storage.digest_algorithm().is_valid_hex(&digest) => digest,
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };

    let now = chrono::Utc::now().timestamp();
    match state.storage.catalog().find_by_digest(&digest, now) {
        Ok(found) => {
            let hits: Vec<SearchHit> = found.into_iter().map(SearchHit::from).collect();
            Json(hits).into_response()
        }
        Err(err) => {
            error!("Digest search failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn make_search_routes(state: ServerState) -> Router {
    Router::new()
        .route("/search", get(search_by_digest))
        .with_state(state)
}
