use anyhow::Result;
use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::download::{health, redirect_alias, robots_txt, serve_file};
use super::metrics::metrics_handler;
use super::{http_cache, log_requests, make_search_routes, state::ServerState, CachePolicy};

/// Router for one partition's download listener.
pub fn make_app(state: ServerState) -> Router {
    let cache_policy = CachePolicy {
        partition: state.config.partition,
        max_age_sec: state.config.content_cache_age_sec,
    };

    let file_routes: Router = Router::new()
        .route("/{alias_id}", get(redirect_alias))
        .route("/{alias_id}/{filename}", get(serve_file))
        .layer(middleware::from_fn_with_state(cache_policy, http_cache))
        .with_state(state.clone());

    let service_routes: Router = Router::new()
        .route("/robots.txt", get(robots_txt))
        .route("/health", get(health))
        .with_state(state.clone());

    service_routes
        .merge(make_search_routes(state.clone()))
        .merge(file_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serve downloads on `listener` until `shutdown` fires.
pub async fn run_server(
    state: ServerState,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let partition = state.config.partition;
    info!(
        "Download server for {} listening on {}",
        partition,
        listener.local_addr()?
    );
    let app = make_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Download server for {} stopped", partition);
    Ok(())
}

pub async fn run_metrics_server(listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
    info!("Metrics available at {}", listener.local_addr()?);
    axum::serve(listener, make_metrics_app())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
